//! Operations: the atomic, authored and timestamped changes to a ticket.
//!
//! An [`Operation`] is immutable once created. Its id is the BLAKE3 hash of
//! its canonical JSON, so two replicas holding the same operation agree on
//! its id. The payload is a closed sum type, [`OpData`], serialized with an
//! inline `type` tag:
//!
//! ```json
//! {"author":{"name":"Ren","email":"ren@example.com"},"timestamp":1700000000,
//!  "type":"set_title","title":"New title","was":"Old title"}
//! ```

mod apply;
pub mod validate;

pub use validate::ValidationError;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::to_canonical_string;
use crate::checklist::Checklist;
use crate::id::Id;
use crate::identity::Identity;
use crate::label::Label;
use crate::repository::Hash;
use crate::review::ReviewInfo;
use crate::status::Status;

// ---------------------------------------------------------------------------
// OpType
// ---------------------------------------------------------------------------

/// The kind of an operation, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Create,
    SetTitle,
    AddComment,
    EditComment,
    SetStatus,
    LabelChange,
    SetAssignee,
    SetChecklist,
    SetReview,
    SetMetadata,
    NoOp,
}

impl OpType {
    pub const ALL: [Self; 11] = [
        Self::Create,
        Self::SetTitle,
        Self::AddComment,
        Self::EditComment,
        Self::SetStatus,
        Self::LabelChange,
        Self::SetAssignee,
        Self::SetChecklist,
        Self::SetReview,
        Self::SetMetadata,
        Self::NoOp,
    ];

    /// The serialized `type` tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::SetTitle => "set_title",
            Self::AddComment => "add_comment",
            Self::EditComment => "edit_comment",
            Self::SetStatus => "set_status",
            Self::LabelChange => "label_change",
            Self::SetAssignee => "set_assignee",
            Self::SetChecklist => "set_checklist",
            Self::SetReview => "set_review",
            Self::SetMetadata => "set_metadata",
            Self::NoOp => "no_op",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateData {
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTitleData {
    pub title: String,
    pub was: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCommentData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditCommentData {
    /// Id of the operation that created the comment.
    pub target: Id,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStatusData {
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelChangeData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<Label>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<Label>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAssigneeData {
    pub assignee: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetChecklistData {
    pub checklist: Checklist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReviewData {
    pub review: ReviewInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMetadataData {
    /// Id of the operation whose metadata is extended.
    pub target: Id,
    pub new_metadata: BTreeMap<String, String>,
}

/// Kind-specific payload of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpData {
    Create(CreateData),
    SetTitle(SetTitleData),
    AddComment(AddCommentData),
    EditComment(EditCommentData),
    SetStatus(SetStatusData),
    LabelChange(LabelChangeData),
    SetAssignee(SetAssigneeData),
    SetChecklist(SetChecklistData),
    SetReview(SetReviewData),
    SetMetadata(SetMetadataData),
    NoOp,
}

impl OpData {
    #[must_use]
    pub const fn op_type(&self) -> OpType {
        match self {
            Self::Create(_) => OpType::Create,
            Self::SetTitle(_) => OpType::SetTitle,
            Self::AddComment(_) => OpType::AddComment,
            Self::EditComment(_) => OpType::EditComment,
            Self::SetStatus(_) => OpType::SetStatus,
            Self::LabelChange(_) => OpType::LabelChange,
            Self::SetAssignee(_) => OpType::SetAssignee,
            Self::SetChecklist(_) => OpType::SetChecklist,
            Self::SetReview(_) => OpType::SetReview,
            Self::SetMetadata(_) => OpType::SetMetadata,
            Self::NoOp => OpType::NoOp,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub author: Identity,
    #[serde(rename = "timestamp")]
    pub unix_time: i64,
    /// Set at creation, never changed afterwards. Later additions go through
    /// a set-metadata operation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub data: OpData,
}

impl Operation {
    #[must_use]
    pub const fn new(author: Identity, unix_time: i64, data: OpData) -> Self {
        Self {
            author,
            unix_time,
            metadata: BTreeMap::new(),
            data,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Content id: BLAKE3 over the canonical JSON of the operation.
    ///
    /// Resolving a stub author does not change the id, since full and stub
    /// identities serialize the same way.
    #[must_use]
    pub fn id(&self) -> Id {
        Id::derive(to_canonical_string(self).as_bytes())
    }

    #[must_use]
    pub const fn op_type(&self) -> OpType {
        self.data.op_type()
    }

    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.unix_time, 0).unwrap_or_default()
    }

    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn create(
        author: Identity,
        unix_time: i64,
        title: impl Into<String>,
        message: impl Into<String>,
        files: Vec<Hash>,
    ) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::Create(CreateData {
                title: title.into(),
                message: message.into(),
                files,
            }),
        )
    }

    #[must_use]
    pub fn set_title(
        author: Identity,
        unix_time: i64,
        title: impl Into<String>,
        was: impl Into<String>,
    ) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::SetTitle(SetTitleData {
                title: title.into(),
                was: was.into(),
            }),
        )
    }

    #[must_use]
    pub fn add_comment(
        author: Identity,
        unix_time: i64,
        message: impl Into<String>,
        files: Vec<Hash>,
    ) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::AddComment(AddCommentData {
                message: message.into(),
                files,
            }),
        )
    }

    #[must_use]
    pub fn edit_comment(
        author: Identity,
        unix_time: i64,
        target: Id,
        message: impl Into<String>,
        files: Vec<Hash>,
    ) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::EditComment(EditCommentData {
                target,
                message: message.into(),
                files,
            }),
        )
    }

    #[must_use]
    pub const fn set_status(author: Identity, unix_time: i64, status: Status) -> Self {
        Self::new(author, unix_time, OpData::SetStatus(SetStatusData { status }))
    }

    #[must_use]
    pub const fn label_change(
        author: Identity,
        unix_time: i64,
        added: Vec<Label>,
        removed: Vec<Label>,
    ) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::LabelChange(LabelChangeData { added, removed }),
        )
    }

    #[must_use]
    pub const fn set_assignee(author: Identity, unix_time: i64, assignee: Identity) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::SetAssignee(SetAssigneeData { assignee }),
        )
    }

    #[must_use]
    pub const fn set_checklist(author: Identity, unix_time: i64, checklist: Checklist) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::SetChecklist(SetChecklistData { checklist }),
        )
    }

    #[must_use]
    pub const fn set_review(author: Identity, unix_time: i64, review: ReviewInfo) -> Self {
        Self::new(author, unix_time, OpData::SetReview(SetReviewData { review }))
    }

    #[must_use]
    pub const fn set_metadata(
        author: Identity,
        unix_time: i64,
        target: Id,
        new_metadata: BTreeMap<String, String>,
    ) -> Self {
        Self::new(
            author,
            unix_time,
            OpData::SetMetadata(SetMetadataData {
                target,
                new_metadata,
            }),
        )
    }

    #[must_use]
    pub const fn noop(author: Identity, unix_time: i64) -> Self {
        Self::new(author, unix_time, OpData::NoOp)
    }
}
