//! The content-addressed store that ticket history lives in.
//!
//! The [`Repository`] trait is the whole contract the engine needs from
//! storage: blobs, trees and commits addressed by hash, named refs, and a
//! common-ancestor query. [`memory::MemRepository`] implements it in
//! process; [`git::GitRepository`] drives a real git object database through
//! the `git` binary.

pub mod ancestry;
pub mod git;
pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Object model
// ---------------------------------------------------------------------------

/// Address of an object in the store.
///
/// The digest algorithm belongs to the backend (SHA-1 for git, BLAKE3 for the
/// in-memory store), so the hash is kept as opaque lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(String);

impl Hash {
    /// Wrap a hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidHash`] when `s` is empty or not
    /// lowercase hex.
    pub fn new(s: impl Into<String>) -> Result<Self, StorageError> {
        let s = s.into();
        if s.is_empty() || !s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(StorageError::InvalidHash(s));
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
}

impl ObjectType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
        }
    }
}

/// One named entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeEntry {
    pub object_type: ObjectType,
    pub hash: Hash,
    pub name: String,
}

impl TreeEntry {
    #[must_use]
    pub fn blob(hash: Hash, name: impl Into<String>) -> Self {
        Self {
            object_type: ObjectType::Blob,
            hash,
            name: name.into(),
        }
    }
}

/// A stored commit: a tree plus zero or more parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: Hash,
    pub parents: Vec<Hash>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the underlying store. Always propagated to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("invalid ref name: {0:?}")]
    InvalidRefName(String),

    #[error("invalid object hash: {0:?}")]
    InvalidHash(String),

    #[error("object {hash} is not a {expected}")]
    WrongObjectType { hash: Hash, expected: &'static str },

    #[error("commits {0} and {1} share no common ancestor")]
    NoCommonAncestor(Hash, Hash),

    #[error("corrupt object {hash}: {reason}")]
    Corrupt { hash: Hash, reason: String },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check that `name` is usable as a ref.
///
/// # Errors
///
/// Returns [`StorageError::InvalidRefName`] unless `name` starts with
/// `refs/` and contains no empty components, `..`, whitespace, control
/// characters or any of `~^:?*[\`.
pub fn validate_ref_name(name: &str) -> Result<(), StorageError> {
    let bad = !name.starts_with("refs/")
        || name.ends_with('/')
        || name.contains("//")
        || name.contains("..")
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if bad {
        return Err(StorageError::InvalidRefName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Content-addressed object storage with named refs.
///
/// All methods take `&self`; implementations synchronise internally.
pub trait Repository {
    /// Store a blob, returning its hash.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn store_data(&self, data: &[u8]) -> Result<Hash, StorageError>;

    /// Read a blob back.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ObjectNotFound`] for unknown hashes.
    fn read_data(&self, hash: &Hash) -> Result<Vec<u8>, StorageError>;

    /// Store a tree made of `entries`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn store_tree(&self, entries: &[TreeEntry]) -> Result<Hash, StorageError>;

    /// List the entries of a tree, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ObjectNotFound`] for unknown hashes.
    fn read_tree(&self, hash: &Hash) -> Result<Vec<TreeEntry>, StorageError>;

    /// Store a commit pointing at `tree` with the given parents.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn store_commit(&self, tree: &Hash, parents: &[Hash]) -> Result<Hash, StorageError>;

    /// Read a commit's tree and parents.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ObjectNotFound`] for unknown hashes.
    fn read_commit(&self, hash: &Hash) -> Result<Commit, StorageError>;

    /// Point `name` at `hash`, creating the ref if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidRefName`] or a backend failure.
    fn update_ref(&self, name: &str, hash: &Hash) -> Result<(), StorageError>;

    /// Resolve a ref to the commit it points at.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RefNotFound`] if the ref does not exist.
    fn resolve_ref(&self, name: &str) -> Result<Hash, StorageError>;

    /// Whether a ref exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn ref_exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Full names of every ref starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// The best common ancestor of two commits.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoCommonAncestor`] for unrelated histories.
    fn find_common_ancestor(&self, a: &Hash, b: &Hash) -> Result<Hash, StorageError>;

    /// Point `to` at whatever `from` resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RefNotFound`] if `from` does not exist.
    fn copy_ref(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let hash = self.resolve_ref(from)?;
        self.update_ref(to, &hash)
    }

    /// The tree a commit points at.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ObjectNotFound`] for unknown commits.
    fn tree_hash(&self, commit: &Hash) -> Result<Hash, StorageError> {
        Ok(self.read_commit(commit)?.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_rejects_non_hex() {
        assert!(Hash::new("abc123").is_ok());
        assert!(Hash::new("").is_err());
        assert!(Hash::new("xyz").is_err());
        assert!(Hash::new("ABC").is_err());
    }

    #[test]
    fn ref_names() {
        assert!(validate_ref_name("refs/tickets/abc").is_ok());
        assert!(validate_ref_name("refs/remotes/origin/tickets/abc").is_ok());
        for bad in [
            "tickets/abc",
            "refs/a..b",
            "refs/a b",
            "refs/a:b",
            "refs/a/",
            "refs//a",
            "refs/a*",
        ] {
            assert!(validate_ref_name(bad).is_err(), "{bad} should be rejected");
        }
    }
}
