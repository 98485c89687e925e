//! Review checklists and their compound-state reduction.
//!
//! A [`Checklist`] template comes from the [`ChecklistStore`]; every reviewer
//! files their own copy with a Set-Checklist operation. State is reduced at
//! two levels:
//!
//! 1. One filled checklist: any Failed question => Failed, else any Pending
//!    => Pending, else Passed (NotApplicable counts as passed).
//! 2. All reviewers of one label: any Failed => Failed, all Passed =>
//!    Passed, else Pending. No reviewers at all is Pending.
//!
//! Both reductions are order independent.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::label::Label;
use crate::operation::ValidationError;
use crate::operation::validate::check_one_line;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistState {
    #[default]
    Pending,
    Passed,
    Failed,
    NotApplicable,
}

/// Error returned when parsing an unknown checklist state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown checklist state: {0}")]
pub struct UnknownChecklistState(pub String);

impl ChecklistState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::NotApplicable => "NOT APPLICABLE",
        }
    }
}

impl fmt::Display for ChecklistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecklistState {
    type Err = UnknownChecklistState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "not applicable" => Ok(Self::NotApplicable),
            other => Err(UnknownChecklistState(other.to_string())),
        }
    }
}

/// Fold per-reviewer compound states into the ticket-level state.
///
/// Failed if any input is Failed; Passed if there is at least one input and
/// every input is Passed; Pending otherwise.
pub fn reduce_compound_states(states: impl IntoIterator<Item = ChecklistState>) -> ChecklistState {
    let mut any = false;
    let mut all_passed = true;
    for state in states {
        any = true;
        match state {
            ChecklistState::Failed => return ChecklistState::Failed,
            ChecklistState::Passed => {}
            ChecklistState::Pending | ChecklistState::NotApplicable => all_passed = false,
        }
    }
    if any && all_passed {
        ChecklistState::Passed
    } else {
        ChecklistState::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistQuestion {
    pub question: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default)]
    pub state: ChecklistState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistSection {
    pub title: String,
    pub questions: Vec<ChecklistQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    pub label: Label,
    pub title: String,
    pub sections: Vec<ChecklistSection>,
}

impl Checklist {
    /// State of this one filled-in checklist.
    #[must_use]
    pub fn compound_state(&self) -> ChecklistState {
        let mut pending = false;
        for q in self.sections.iter().flat_map(|s| &s.questions) {
            match q.state {
                ChecklistState::Failed => return ChecklistState::Failed,
                ChecklistState::Pending => pending = true,
                ChecklistState::Passed | ChecklistState::NotApplicable => {}
            }
        }
        if pending {
            ChecklistState::Pending
        } else {
            ChecklistState::Passed
        }
    }

    pub fn questions_mut(&mut self) -> impl Iterator<Item = &mut ChecklistQuestion> {
        self.sections.iter_mut().flat_map(|s| s.questions.iter_mut())
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidChecklist`] if the label lacks the
    /// `checklist:` prefix or a title or question is blank or multi-line.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidChecklist {
            label: self.label.clone(),
            reason,
        };
        self.label.validate()?;
        if !self.label.is_checklist() {
            return Err(invalid("label must start with `checklist:`".to_string()));
        }
        check_one_line("checklist title", &self.title).map_err(|e| invalid(e.to_string()))?;
        for section in &self.sections {
            check_one_line("section title", &section.title)
                .map_err(|e| invalid(e.to_string()))?;
            for q in &section.questions {
                check_one_line("question", &q.question).map_err(|e| invalid(e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Checklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} [{}]", self.title, self.compound_state())?;
        for (sn, s) in self.sections.iter().enumerate() {
            writeln!(f, "#### {} ####", s.title)?;
            for (qn, q) in s.questions.iter().enumerate() {
                writeln!(f, "({}.{}) {} [{}]", sn + 1, qn + 1, q.question, q.state)?;
                if !q.comment.is_empty() {
                    writeln!(f, "# {}", q.comment.replace('\n', "\n# "))?;
                }
            }
        }
        Ok(())
    }
}

/// One reviewer's filled checklist as held by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistSnapshot {
    pub checklist: Checklist,
    pub last_edit: i64,
}

/// Immutable registry of checklist templates keyed by label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistStore {
    checklists: BTreeMap<Label, Checklist>,
}

impl ChecklistStore {
    #[must_use]
    pub fn new(checklists: impl IntoIterator<Item = Checklist>) -> Self {
        Self {
            checklists: checklists
                .into_iter()
                .map(|c| (c.label.clone(), c))
                .collect(),
        }
    }

    /// Parse the JSON object stored in the `checklists` config ref.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the blob is not a map of checklists.
    pub fn from_json(data: &[u8]) -> Result<Self, ConfigError> {
        let checklists: BTreeMap<Label, Checklist> =
            serde_json::from_slice(data).map_err(|source| ConfigError::Parse {
                name: "checklists".to_string(),
                source,
            })?;
        Ok(Self { checklists })
    }

    /// The template for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownChecklist`] if no such template exists.
    pub fn get(&self, label: &Label) -> Result<&Checklist, ConfigError> {
        self.checklists
            .get(label)
            .ok_or_else(|| ConfigError::UnknownChecklist(label.clone()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.checklists.keys()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checklists.is_empty()
    }
}
