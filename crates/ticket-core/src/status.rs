//! Ticket status values.
//!
//! The ordering of variants is only a presentation order: which moves are
//! legal is decided by the ticket's workflow.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Proposed,
    Vetted,
    #[serde(rename = "inprogress")]
    InProgress,
    #[serde(rename = "inreview")]
    InReview,
    Reviewed,
    Accepted,
    Merged,
    Done,
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl Status {
    /// Every status in presentation order.
    pub const ALL: [Self; 8] = [
        Self::Proposed,
        Self::Vetted,
        Self::InProgress,
        Self::InReview,
        Self::Reviewed,
        Self::Accepted,
        Self::Merged,
        Self::Done,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Vetted => "vetted",
            Self::InProgress => "inprogress",
            Self::InReview => "inreview",
            Self::Reviewed => "reviewed",
            Self::Accepted => "accepted",
            Self::Merged => "merged",
            Self::Done => "done",
        }
    }

    /// Verb phrase used in timeline entries.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Proposed => "set PROPOSED",
            Self::Vetted => "set VETTED",
            Self::InProgress => "set IN PROGRESS",
            Self::InReview => "set IN REVIEW",
            Self::Reviewed => "set REVIEWED",
            Self::Accepted => "set ACCEPTED",
            Self::Merged => "set MERGED",
            Self::Done => "set DONE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == cleaned)
            .ok_or(UnknownStatus(cleaned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_and_space_insensitive() {
        assert_eq!(" InProgress ".parse::<Status>(), Ok(Status::InProgress));
        assert_eq!("DONE".parse::<Status>(), Ok(Status::Done));
        assert_eq!(
            "open".parse::<Status>(),
            Err(UnknownStatus("open".to_string()))
        );
    }

    #[test]
    fn display_matches_serde() {
        for s in Status::ALL {
            let json = serde_json::to_string(&s).expect("serialize");
            assert_eq!(json, format!("\"{s}\""));
            assert_eq!(s.as_str().parse::<Status>(), Ok(s));
        }
    }

    #[test]
    fn actions() {
        assert_eq!(Status::InReview.action(), "set IN REVIEW");
    }
}
