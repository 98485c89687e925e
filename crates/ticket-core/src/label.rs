//! Ticket labels.
//!
//! Labels are free-form, but two prefixes carry meaning: `workflow:<name>`
//! selects the ticket's workflow and `checklist:<name>` attaches a review
//! checklist.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operation::ValidationError;
use crate::operation::validate::check_one_line;

/// Prefix of labels naming a workflow.
pub const WORKFLOW_PREFIX: &str = "workflow:";

/// Prefix of labels naming a checklist.
pub const CHECKLIST_PREFIX: &str = "checklist:";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_workflow(&self) -> bool {
        self.0.starts_with(WORKFLOW_PREFIX)
    }

    #[must_use]
    pub fn is_checklist(&self) -> bool {
        self.0.starts_with(CHECKLIST_PREFIX)
    }

    /// Check the label is non-empty, one line and free of control characters.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_one_line("label", &self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outcome for one label of a label change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelChangeStatus {
    Added,
    Removed,
    DuplicateInOp,
    AlreadySet,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelChangeResult {
    pub label: Label,
    pub status: LabelChangeStatus,
}

impl fmt::Display for LabelChangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            LabelChangeStatus::Added => write!(f, "label {} added", self.label),
            LabelChangeStatus::Removed => write!(f, "label {} removed", self.label),
            LabelChangeStatus::DuplicateInOp => {
                write!(f, "label {} is a duplicate", self.label)
            }
            LabelChangeStatus::AlreadySet => write!(f, "label {} was already set", self.label),
            LabelChangeStatus::DoesNotExist => write!(f, "label {} doesn't exist", self.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert!(Label::from("workflow:eng").is_workflow());
        assert!(!Label::from("workflow").is_workflow());
        assert!(Label::from("checklist:review").is_checklist());
    }

    #[test]
    fn validation() {
        assert!(Label::from("bug").validate().is_ok());
        assert!(Label::from("").validate().is_err());
        assert!(Label::from("two\nlines").validate().is_err());
        assert!(Label::from("bell\u{7}").validate().is_err());
    }

    #[test]
    fn change_result_display() {
        let r = LabelChangeResult {
            label: Label::from("bug"),
            status: LabelChangeStatus::AlreadySet,
        };
        assert_eq!(r.to_string(), "label bug was already set");
    }
}
