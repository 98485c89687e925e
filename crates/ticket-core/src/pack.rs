//! Operation packs: one commit's worth of operations.
//!
//! # Storage layout
//!
//! Each pack is one commit whose tree holds two entries:
//!
//! - `ops`: JSON `{"version": 1, "ops": [...]}`.
//! - `edit-clock-<n>`: an empty blob whose name carries the pack's logical
//!   time, one more than the highest clock among its parent packs.
//!
//! Parents chain the packs of one ticket into a DAG that is usually a line
//! and forks when two replicas edit concurrently. A merge commit is a pack
//! with no operations and two parents.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::operation::{Operation, ValidationError};
use crate::repository::{Hash, Repository, TreeEntry};

/// Version of the `ops` blob written by this crate.
pub const FORMAT_VERSION: u32 = 1;

const OPS_ENTRY: &str = "ops";
const CLOCK_PREFIX: &str = "edit-clock-";

#[derive(Serialize)]
struct PackFileOut<'a> {
    version: u32,
    ops: &'a [Operation],
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Deserialize)]
struct PackFileIn {
    ops: Vec<Operation>,
}

/// An ordered list of operations applied in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPack {
    pub operations: Vec<Operation>,
}

impl OperationPack {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    pub fn append(&mut self, op: Operation) {
        self.operations.push(op);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Validate every operation and check timestamps never go backwards.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for op in &self.operations {
            op.validate()?;
        }
        let monotonic = self
            .operations
            .windows(2)
            .all(|w| w[0].unix_time <= w[1].unix_time);
        if monotonic {
            Ok(())
        } else {
            Err(ValidationError::NonMonotonicTime)
        }
    }

    /// Store this pack as a commit on top of `parents`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on write failure, or the errors of
    /// [`read_clock`] for a malformed parent.
    pub fn write<R: Repository + ?Sized>(&self, repo: &R, parents: &[Hash]) -> Result<StoredPack> {
        let mut clock = 0;
        for parent in parents {
            clock = clock.max(read_clock(repo, parent)?);
        }
        let clock = clock + 1;

        let data = serde_json::to_vec(&PackFileOut {
            version: FORMAT_VERSION,
            ops: &self.operations,
        })
        .expect("operations always serialize");
        let ops_blob = repo.store_data(&data)?;
        let empty = repo.store_data(b"")?;
        let tree = repo.store_tree(&[
            TreeEntry::blob(ops_blob, OPS_ENTRY),
            TreeEntry::blob(empty, format!("{CLOCK_PREFIX}{clock}")),
        ])?;
        let commit = repo.store_commit(&tree, parents)?;
        debug!(%commit, clock, ops = self.len(), "wrote operation pack");

        Ok(StoredPack {
            commit,
            parents: parents.to_vec(),
            clock,
            pack: self.clone(),
        })
    }
}

/// A pack as found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPack {
    pub commit: Hash,
    pub parents: Vec<Hash>,
    pub clock: u64,
    pub pack: OperationPack,
}

impl StoredPack {
    /// Load the pack stored in `commit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for an unknown format version,
    /// [`Error::CorruptPack`] for a malformed tree or blob, and
    /// [`Error::Storage`] on read failure.
    pub fn read<R: Repository + ?Sized>(repo: &R, commit: &Hash) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptPack {
            commit: commit.clone(),
            reason,
        };
        let header = repo.read_commit(commit)?;
        let entries = repo.read_tree(&header.tree)?;
        let clock = clock_from_entries(&entries).ok_or_else(|| corrupt("missing edit clock".into()))?;
        let ops_entry = entries
            .iter()
            .find(|e| e.name == OPS_ENTRY)
            .ok_or_else(|| corrupt("missing ops entry".into()))?;
        let data = repo.read_data(&ops_entry.hash)?;

        let header_version: VersionHeader =
            serde_json::from_slice(&data).map_err(|e| corrupt(e.to_string()))?;
        if header_version.version != FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(header_version.version));
        }
        let file: PackFileIn = serde_json::from_slice(&data).map_err(|e| corrupt(e.to_string()))?;

        Ok(Self {
            commit: commit.clone(),
            parents: header.parents,
            clock,
            pack: OperationPack {
                operations: file.ops,
            },
        })
    }
}

fn clock_from_entries(entries: &[TreeEntry]) -> Option<u64> {
    entries
        .iter()
        .find_map(|e| e.name.strip_prefix(CLOCK_PREFIX))
        .and_then(|n| n.parse().ok())
}

/// The edit clock of the pack stored in `commit`.
///
/// # Errors
///
/// Returns [`Error::CorruptPack`] if the tree carries no clock entry.
pub fn read_clock<R: Repository + ?Sized>(repo: &R, commit: &Hash) -> Result<u64> {
    let tree = repo.tree_hash(commit)?;
    clock_from_entries(&repo.read_tree(&tree)?).ok_or_else(|| Error::CorruptPack {
        commit: commit.clone(),
        reason: "missing edit clock".to_string(),
    })
}
