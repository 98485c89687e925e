//! Turning identity stubs back into full identities.

use std::collections::HashMap;

use tracing::debug;

use super::{Identity, IdentityRecord};
use crate::id::Id;
use crate::repository::{Repository, StorageError, TreeEntry};

/// Refs holding persisted identities, one per id.
pub const IDENTITY_REF_PREFIX: &str = "refs/identities/";

const IDENTITY_FILE: &str = "identity.json";

/// Failure to turn a stub into a full identity. Aborts the whole replay.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("identity {0} not found")]
    NotFound(Id),

    #[error("identity {id} is corrupt: {reason}")]
    Corrupt { id: Id, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Looks identities up by id.
pub trait IdentityResolver {
    /// Load the full identity for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] when no identity has that id.
    fn resolve_identity(&self, id: &Id) -> Result<Identity, ResolveError>;
}

/// Resolver over a fixed set of identities.
#[derive(Debug, Clone, Default)]
pub struct MemResolver {
    identities: HashMap<Id, Identity>,
}

impl MemResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolved identity. Stubs are ignored.
    pub fn insert(&mut self, identity: Identity) {
        if !identity.is_stub() {
            self.identities.insert(identity.id().clone(), identity);
        }
    }

    #[must_use]
    pub fn with(mut self, identity: Identity) -> Self {
        self.insert(identity);
        self
    }
}

impl IdentityResolver for MemResolver {
    fn resolve_identity(&self, id: &Id) -> Result<Identity, ResolveError> {
        self.identities
            .get(id)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(id.clone()))
    }
}

/// Resolver reading `refs/identities/<id>` from a repository.
#[derive(Debug)]
pub struct RepoResolver<'a, R: Repository + ?Sized> {
    repo: &'a R,
}

impl<'a, R: Repository + ?Sized> RepoResolver<'a, R> {
    pub const fn new(repo: &'a R) -> Self {
        Self { repo }
    }
}

impl<R: Repository + ?Sized> IdentityResolver for RepoResolver<'_, R> {
    fn resolve_identity(&self, id: &Id) -> Result<Identity, ResolveError> {
        read_identity(self.repo, id)
    }
}

/// Persist `identity` under `refs/identities/<id>` and return its id.
///
/// Bare identities are promoted to full ones. Storing an identity that is
/// already present is a no-op.
///
/// # Errors
///
/// Returns [`ResolveError::Corrupt`] for a stub (there is no record to
/// store) and [`ResolveError::Storage`] on write failure.
pub fn store_identity<R: Repository + ?Sized>(
    repo: &R,
    identity: &Identity,
) -> Result<Id, ResolveError> {
    let Some(record) = identity.record() else {
        return Err(ResolveError::Corrupt {
            id: identity.id().clone(),
            reason: "cannot store an unresolved stub".to_string(),
        });
    };
    let id = record.id();
    let ref_name = format!("{IDENTITY_REF_PREFIX}{id}");
    if repo.ref_exists(&ref_name)? {
        return Ok(id);
    }

    let data = serde_json::to_vec(record).map_err(|e| ResolveError::Corrupt {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    let blob = repo.store_data(&data)?;
    let tree = repo.store_tree(&[TreeEntry::blob(blob, IDENTITY_FILE)])?;
    let commit = repo.store_commit(&tree, &[])?;
    repo.update_ref(&ref_name, &commit)?;
    debug!(identity = %id.human(), "stored identity");
    Ok(id)
}

/// Load the identity stored for `id`.
///
/// # Errors
///
/// Returns [`ResolveError::NotFound`] if no ref exists, and
/// [`ResolveError::Corrupt`] if the record is unreadable or hashes to a
/// different id.
pub fn read_identity<R: Repository + ?Sized>(repo: &R, id: &Id) -> Result<Identity, ResolveError> {
    let ref_name = format!("{IDENTITY_REF_PREFIX}{id}");
    let commit = match repo.resolve_ref(&ref_name) {
        Ok(c) => c,
        Err(StorageError::RefNotFound(_)) => return Err(ResolveError::NotFound(id.clone())),
        Err(e) => return Err(e.into()),
    };
    let tree = repo.tree_hash(&commit)?;
    let corrupt = |reason: String| ResolveError::Corrupt {
        id: id.clone(),
        reason,
    };
    let entry = repo
        .read_tree(&tree)?
        .into_iter()
        .find(|e| e.name == IDENTITY_FILE)
        .ok_or_else(|| corrupt(format!("missing {IDENTITY_FILE}")))?;
    let data = repo.read_data(&entry.hash)?;
    let record: IdentityRecord =
        serde_json::from_slice(&data).map_err(|e| corrupt(e.to_string()))?;
    if &record.id() != id {
        return Err(corrupt("record hashes to a different id".to_string()));
    }
    Ok(Identity::full(record))
}
