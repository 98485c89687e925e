//! Operation validation.
//!
//! Every operation passes the base checks (well-formed author, timestamp
//! not before the epoch, non-empty metadata keys) before its kind-specific
//! checks run. A failing validation stops the operation from being staged at all.

use crate::checklist::Checklist;
use crate::id::IdError;
use crate::label::Label;
use crate::review::{REMOVE_REVIEW_INFO, validate_revision_id};

use super::{OpData, Operation};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is empty")]
    Empty(&'static str),

    #[error("{0} must be a single line")]
    MultiLine(&'static str),

    #[error("{0} contains control characters")]
    ControlCharacters(&'static str),

    #[error("invalid timestamp {0}")]
    InvalidTime(i64),

    #[error("metadata keys must not be empty")]
    EmptyMetadataKey,

    #[error("label change neither adds nor removes a label")]
    NoLabelChange,

    #[error("invalid checklist {label}: {reason}")]
    InvalidChecklist { label: Label, reason: String },

    #[error("invalid revision id {0:?}, expected D<number>")]
    InvalidRevisionId(String),

    #[error("review update has an empty transaction id")]
    EmptyTransactionId,

    #[error("the first operation must be a create operation")]
    FirstNotCreate,

    #[error("only the first operation may be a create operation")]
    DuplicateCreate,

    #[error("ticket has no operations")]
    NoOperations,

    #[error("operation timestamps go backwards within a pack")]
    NonMonotonicTime,

    #[error("identity {0} does not match its record")]
    IdentityIdMismatch(crate::id::Id),

    #[error(transparent)]
    InvalidId(#[from] IdError),

    #[error("no metadata to set")]
    EmptyMetadata,
}

/// Non-empty, a single line, and free of control characters.
pub(crate) fn check_one_line(field: &'static str, s: &str) -> Result<(), ValidationError> {
    if s.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if s.contains('\n') || s.contains('\r') {
        return Err(ValidationError::MultiLine(field));
    }
    if s.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters(field));
    }
    Ok(())
}

/// Free of control characters other than newlines and tabs. May be empty.
pub(crate) fn check_no_control(field: &'static str, s: &str) -> Result<(), ValidationError> {
    if s.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(ValidationError::ControlCharacters(field));
    }
    Ok(())
}

fn check_message(field: &'static str, s: &str) -> Result<(), ValidationError> {
    if s.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    check_no_control(field, s)
}

fn check_checklist(checklist: &Checklist) -> Result<(), ValidationError> {
    checklist.validate()?;
    for q in checklist.sections.iter().flat_map(|s| &s.questions) {
        check_no_control("checklist comment", &q.comment).map_err(|e| {
            ValidationError::InvalidChecklist {
                label: checklist.label.clone(),
                reason: e.to_string(),
            }
        })?;
    }
    Ok(())
}

impl Operation {
    /// Run the base checks and then the checks for this operation's kind.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.author.validate()?;
        if self.unix_time < 0 {
            return Err(ValidationError::InvalidTime(self.unix_time));
        }
        if self.metadata.keys().any(String::is_empty) {
            return Err(ValidationError::EmptyMetadataKey);
        }

        match &self.data {
            OpData::Create(d) => {
                check_one_line("title", &d.title)?;
                check_no_control("message", &d.message)
            }
            OpData::SetTitle(d) => {
                check_one_line("title", &d.title)?;
                check_no_control("previous title", &d.was)
            }
            OpData::AddComment(d) => check_message("message", &d.message),
            OpData::EditComment(d) => check_no_control("message", &d.message),
            OpData::SetStatus(_) | OpData::NoOp => Ok(()),
            OpData::LabelChange(d) => {
                if d.added.is_empty() && d.removed.is_empty() {
                    return Err(ValidationError::NoLabelChange);
                }
                d.added.iter().chain(&d.removed).try_for_each(Label::validate)
            }
            OpData::SetAssignee(d) => d.assignee.validate(),
            OpData::SetChecklist(d) => check_checklist(&d.checklist),
            OpData::SetReview(d) => {
                let review = &d.review;
                validate_revision_id(&review.revision_id)
                    .map_err(|_| ValidationError::InvalidRevisionId(review.revision_id.clone()))?;
                if review.last_transaction == REMOVE_REVIEW_INFO {
                    return Ok(());
                }
                check_no_control("review title", &review.title)?;
                for u in &review.updates {
                    if u.trans_id().is_empty() {
                        return Err(ValidationError::EmptyTransactionId);
                    }
                    if let Some(author) = &u.author {
                        author.validate()?;
                    }
                }
                Ok(())
            }
            OpData::SetMetadata(d) => {
                if d.new_metadata.is_empty() {
                    return Err(ValidationError::EmptyMetadata);
                }
                if d.new_metadata.keys().any(String::is_empty) {
                    return Err(ValidationError::EmptyMetadataKey);
                }
                Ok(())
            }
        }
    }
}
