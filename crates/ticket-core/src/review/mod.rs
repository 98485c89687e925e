//! External code-review data attached to tickets.
//!
//! A [`ReviewInfo`] aggregates one revision's transactions (comments,
//! overall status changes, per-reviewer status changes and new diffs) as
//! pulled from the review server. The watermark in `last_transaction` lets
//! the next fetch ask only for newer transactions.

pub(crate) mod fetch;

pub use fetch::{
    Cursor, FetchOutcome, RawComment, RawTransaction, ReconcileError, TransactionPage,
    TransactionSearchRequest, TransactionSource, fetch_review_info, validate_revision_id,
};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// `last_transaction` value that removes a review from its ticket.
pub const REMOVE_REVIEW_INFO: &str = "-1";

/// Width a one-line comment is truncated or padded to.
const ONE_LINE_WIDTH: usize = 50;

/// Type-specific part of a review transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    Comment {
        /// Diff an inline comment was made against.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u64>,
        text: String,
    },
    /// The revision's overall status changed.
    Status { status: String },
    /// One reviewer accepted, requested changes, ...
    UserStatus { status: String },
    /// A new diff was uploaded.
    Diff { diff_id: u64 },
}

impl TransactionKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Comment { .. } => "comment",
            Self::Status { .. } => "status",
            Self::UserStatus { .. } => "user status",
            Self::Diff { .. } => "diff",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One transaction as received from the review server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhabTransaction {
    pub trans_id: String,
    /// Review-server user reference of whoever made the change.
    pub phab_user: String,
    pub timestamp: i64,
    pub kind: TransactionKind,
}

impl PhabTransaction {
    /// The comment text on one line, truncated or padded to 50 characters,
    /// followed by ` [path:line@diff]` for inline comments. Empty for
    /// anything that is not a comment.
    #[must_use]
    pub fn one_line_comment(&self) -> String {
        let TransactionKind::Comment {
            diff,
            path,
            line,
            text,
        } = &self.kind
        else {
            return String::new();
        };

        let flat = text.replace('\n', " ");
        let mut out = if flat.chars().count() > ONE_LINE_WIDTH {
            let head: String = flat.chars().take(ONE_LINE_WIDTH - 3).collect();
            format!("{head}...")
        } else {
            format!("{flat:<ONE_LINE_WIDTH$}")
        };

        if let Some(path) = path.as_deref().filter(|p| !p.is_empty()) {
            out.push_str(&format!(
                " [{path}:{}@{}]",
                line.unwrap_or_default(),
                diff.unwrap_or_default()
            ));
        }
        out
    }
}

/// A transaction plus the ticket-side author it maps to, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub transaction: PhabTransaction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Identity>,
}

impl ReviewUpdate {
    #[must_use]
    pub const fn new(transaction: PhabTransaction) -> Self {
        Self {
            transaction,
            author: None,
        }
    }

    #[must_use]
    pub fn trans_id(&self) -> &str {
        &self.transaction.trans_id
    }

    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.transaction.timestamp
    }
}

/// Aggregated state of one external review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInfo {
    /// e.g. `D1234`
    pub revision_id: String,
    #[serde(default)]
    pub title: String,
    /// Watermark for incremental fetches, or [`REMOVE_REVIEW_INFO`].
    #[serde(default)]
    pub last_transaction: String,
    #[serde(default)]
    pub updates: Vec<ReviewUpdate>,
}

impl ReviewInfo {
    /// A payload that removes `revision_id` from a ticket.
    #[must_use]
    pub fn removal(revision_id: impl Into<String>) -> Self {
        Self {
            revision_id: revision_id.into(),
            last_transaction: REMOVE_REVIEW_INFO.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.last_transaction == REMOVE_REVIEW_INFO
    }

    /// The most recent overall status, if any was ever set.
    ///
    /// Among updates sharing the latest timestamp the first one wins.
    #[must_use]
    pub fn latest_overall_status(&self) -> Option<&str> {
        let mut latest: Option<(i64, &str)> = None;
        for u in &self.updates {
            if let TransactionKind::Status { status } = &u.transaction.kind {
                if latest.is_none_or(|(ts, _)| u.timestamp() > ts) {
                    latest = Some((u.timestamp(), status));
                }
            }
        }
        latest.map(|(_, s)| s)
    }

    /// Each reviewer's most recent status update, keyed by review-server user.
    #[must_use]
    pub fn latest_user_statuses(&self) -> BTreeMap<&str, &ReviewUpdate> {
        let mut latest: BTreeMap<&str, &ReviewUpdate> = BTreeMap::new();
        for u in &self.updates {
            if !matches!(u.transaction.kind, TransactionKind::UserStatus { .. }) {
                continue;
            }
            let user = u.transaction.phab_user.as_str();
            let newer = latest
                .get(user)
                .is_none_or(|seen| u.timestamp() > seen.timestamp());
            if newer {
                latest.insert(user, u);
            }
        }
        latest
    }
}
