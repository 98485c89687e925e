use std::fmt;

use crate::config::ConfigError;
use crate::id::Id;
use crate::identity::ResolveError;
use crate::operation::ValidationError;
use crate::repository::{Hash, StorageError};
use crate::review::ReconcileError;
use crate::workflow::TransitionError;

/// Machine-readable error codes for scripting and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    UnknownChecklist,
    InvalidOperation,
    InvalidStateTransition,
    NoWorkflow,
    HookFailed,
    NothingToCommit,
    UnresolvedIdentity,
    TicketNotFound,
    TicketMismatch,
    UncommittedOperations,
    CorruptPack,
    UnsupportedFormat,
    ObjectNotFound,
    RefNotFound,
    ReviewFeedMalformed,
    ReviewSourceFailed,
    StorageFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::UnknownChecklist => "E1003",
            Self::InvalidOperation => "E2001",
            Self::InvalidStateTransition => "E2002",
            Self::NoWorkflow => "E2003",
            Self::HookFailed => "E2004",
            Self::NothingToCommit => "E2005",
            Self::UnresolvedIdentity => "E2006",
            Self::TicketNotFound => "E2007",
            Self::TicketMismatch => "E2008",
            Self::UncommittedOperations => "E2009",
            Self::CorruptPack => "E3001",
            Self::UnsupportedFormat => "E3002",
            Self::ObjectNotFound => "E3003",
            Self::RefNotFound => "E3004",
            Self::ReviewFeedMalformed => "E4001",
            Self::ReviewSourceFailed => "E4002",
            Self::StorageFailure => "E5001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config parse error",
            Self::UnknownChecklist => "Unknown checklist",
            Self::InvalidOperation => "Invalid operation",
            Self::InvalidStateTransition => "Invalid status transition",
            Self::NoWorkflow => "No usable workflow",
            Self::HookFailed => "Transition hook failed",
            Self::NothingToCommit => "Nothing to commit",
            Self::UnresolvedIdentity => "Identity could not be resolved",
            Self::TicketNotFound => "Ticket not found",
            Self::TicketMismatch => "Tickets do not match",
            Self::UncommittedOperations => "Uncommitted operations",
            Self::CorruptPack => "Corrupt operation pack",
            Self::UnsupportedFormat => "Unsupported pack format",
            Self::ObjectNotFound => "Object not found",
            Self::RefNotFound => "Ref not found",
            Self::ReviewFeedMalformed => "Malformed review data",
            Self::ReviewSourceFailed => "Review source unavailable",
            Self::StorageFailure => "Storage failure",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => {
                Some("Fix the JSON in refs/configs/<name> or .ticket/config.toml and retry.")
            }
            Self::UnknownChecklist => Some("Add the checklist to the `checklists` config."),
            Self::InvalidStateTransition => {
                Some("List the legal next states for the ticket's workflow first.")
            }
            Self::NoWorkflow => Some("Give the ticket exactly one `workflow:<name>` label."),
            Self::HookFailed => Some("Inspect the hook's output; the status was not changed."),
            Self::UnresolvedIdentity => {
                Some("Fetch identities from the remote that authored the ticket.")
            }
            Self::UncommittedOperations => Some("Commit pending operations before merging."),
            Self::UnsupportedFormat => Some("Upgrade to a version that reads this pack format."),
            Self::ReviewSourceFailed => Some("Retry once the review server is reachable."),
            Self::InvalidOperation
            | Self::NothingToCommit
            | Self::TicketNotFound
            | Self::TicketMismatch
            | Self::CorruptPack
            | Self::ObjectNotFound
            | Self::RefNotFound
            | Self::ReviewFeedMalformed
            | Self::StorageFailure => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("corrupt operation pack in commit {commit}: {reason}")]
    CorruptPack { commit: Hash, reason: String },

    #[error("unsupported operation pack format version {0}")]
    UnsupportedFormat(u32),

    #[error("nothing to commit: no staged operations")]
    NothingToCommit,

    #[error("ticket has uncommitted operations")]
    UncommittedOperations,

    #[error("cannot merge ticket {remote} into ticket {local}")]
    TicketMismatch { local: Id, remote: Id },

    #[error("ticket not found: {0}")]
    TicketNotFound(String),
}

/// Shorthand for results carrying [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

fn storage_code(err: &StorageError) -> ErrorCode {
    match err {
        StorageError::ObjectNotFound(_) => ErrorCode::ObjectNotFound,
        StorageError::RefNotFound(_) => ErrorCode::RefNotFound,
        _ => ErrorCode::StorageFailure,
    }
}

impl Error {
    /// The stable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::InvalidOperation,
            Self::Resolve(ResolveError::Storage(e)) => storage_code(e),
            Self::Resolve(_) => ErrorCode::UnresolvedIdentity,
            Self::Transition(e) => match e {
                TransitionError::Invalid { .. } => ErrorCode::InvalidStateTransition,
                TransitionError::HookFailed { .. } | TransitionError::HookSpawn { .. } => {
                    ErrorCode::HookFailed
                }
                TransitionError::NoWorkflow
                | TransitionError::MultipleWorkflows(_)
                | TransitionError::UnknownWorkflow(_) => ErrorCode::NoWorkflow,
            },
            Self::Storage(e) => storage_code(e),
            Self::Reconcile(ReconcileError::Source(_)) => ErrorCode::ReviewSourceFailed,
            Self::Reconcile(_) => ErrorCode::ReviewFeedMalformed,
            Self::Config(e) => match e {
                ConfigError::UnknownChecklist(_) => ErrorCode::UnknownChecklist,
                ConfigError::Storage(s) => storage_code(s),
                ConfigError::Parse { .. }
                | ConfigError::MissingBlob(_)
                | ConfigError::InvalidName(_) => ErrorCode::ConfigParseError,
            },
            Self::CorruptPack { .. } => ErrorCode::CorruptPack,
            Self::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            Self::NothingToCommit => ErrorCode::NothingToCommit,
            Self::UncommittedOperations => ErrorCode::UncommittedOperations,
            Self::TicketMismatch { .. } => ErrorCode::TicketMismatch,
            Self::TicketNotFound(_) => ErrorCode::TicketNotFound,
        }
    }
}
