//! Merging a remote copy of a ticket into the local one.

use std::fmt;

use tracing::{info, warn};

use super::{Ticket, local_ref, remote_prefix};
use crate::error::{Error, Result};
use crate::id::Id;
use crate::operation::ValidationError;
use crate::pack::OperationPack;
use crate::repository::Repository;

/// What a merge did to the local ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    /// No local copy existed; the remote history was adopted.
    New,
    /// The local copy already contains the remote history.
    UpToDate,
    /// The local head was an ancestor of the remote head and moved to it.
    FastForward,
    /// Both sides had new packs; a merge pack joins them.
    Merged,
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::UpToDate => "up to date",
            Self::FastForward => "fast-forward",
            Self::Merged => "merged",
        })
    }
}

/// Outcome of merging one ticket in [`merge_all`].
#[derive(Debug)]
pub struct MergeResult {
    pub id: Id,
    pub outcome: Result<MergeStatus>,
}

impl Ticket {
    /// Bring `other` (usually read from a remote-tracking ref) into this
    /// ticket and move `refs/tickets/<id>` accordingly.
    ///
    /// Merge packs list their parents sorted, so two replicas merging the
    /// same heads write the same commit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TicketMismatch`] if the tickets differ,
    /// [`Error::UncommittedOperations`] if this ticket has staged
    /// operations, and [`Error::Storage`] if the histories are unrelated or
    /// cannot be written.
    pub fn merge<R: Repository + ?Sized>(&mut self, repo: &R, other: &Self) -> Result<MergeStatus> {
        let remote_id = other.id().ok_or(ValidationError::NoOperations)?;
        if let Some(local_id) = self.id() {
            if local_id != remote_id {
                return Err(Error::TicketMismatch {
                    local: local_id,
                    remote: remote_id,
                });
            }
        }
        if self.has_pending_operations() {
            return Err(Error::UncommittedOperations);
        }
        let remote_head = other.head().ok_or(ValidationError::NoOperations)?.clone();
        let target = local_ref(&remote_id);

        let Some(local_head) = self.head().cloned() else {
            repo.update_ref(&target, &remote_head)?;
            self.packs.clone_from(&other.packs);
            info!(ticket = %remote_id.human(), "adopted remote ticket");
            return Ok(MergeStatus::New);
        };
        if local_head == remote_head {
            return Ok(MergeStatus::UpToDate);
        }

        let lca = repo.find_common_ancestor(&local_head, &remote_head)?;
        if lca == remote_head {
            return Ok(MergeStatus::UpToDate);
        }
        if lca == local_head {
            repo.update_ref(&target, &remote_head)?;
            self.packs.clone_from(&other.packs);
            info!(ticket = %remote_id.human(), head = %remote_head, "fast-forwarded ticket");
            return Ok(MergeStatus::FastForward);
        }

        let mut parents = vec![local_head, remote_head];
        parents.sort();
        let merge = OperationPack::new().write(repo, &parents)?;
        repo.update_ref(&target, &merge.commit)?;
        *self = Self::read_commit(repo, &merge.commit)?;
        info!(ticket = %remote_id.human(), head = %merge.commit, "merged ticket");
        Ok(MergeStatus::Merged)
    }
}

/// Merge every ticket fetched from `remote` into the local refs.
///
/// A failure on one ticket is reported in its [`MergeResult`] and does not
/// stop the others.
///
/// # Errors
///
/// Returns [`Error::Storage`] only if the remote refs cannot be listed.
pub fn merge_all<R: Repository + ?Sized>(repo: &R, remote: &str) -> Result<Vec<MergeResult>> {
    let prefix = remote_prefix(remote);
    let mut results = Vec::new();
    for name in repo.list_refs(&prefix)? {
        let Some(id) = name.strip_prefix(&prefix).and_then(|raw| raw.parse::<Id>().ok()) else {
            warn!(refname = %name, "skipping malformed remote ticket ref");
            continue;
        };
        let outcome = merge_one(repo, remote, &id);
        if let Err(e) = &outcome {
            warn!(ticket = %id.human(), error = %e, "merge failed");
        }
        results.push(MergeResult { id, outcome });
    }
    Ok(results)
}

fn merge_one<R: Repository + ?Sized>(repo: &R, remote: &str, id: &Id) -> Result<MergeStatus> {
    let theirs = Ticket::read_remote(repo, remote, id)?;
    let mut ours = match Ticket::read_local(repo, id) {
        Ok(t) => t,
        Err(Error::TicketNotFound(_)) => Ticket::new(),
        Err(e) => return Err(e),
    };
    ours.merge(repo, &theirs)
}
