//! In-process repository.
//!
//! Objects are addressed by a BLAKE3 digest over a type-tagged encoding, so
//! two stores that write the same tree and parents produce the same commit
//! hash. Used by tests and the simulator; [`MemRepository::fetch_from`]
//! stands in for `git fetch` between replicas.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use super::{
    Commit, Hash, ObjectType, Repository, StorageError, TreeEntry, ancestry, validate_ref_name,
};

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit(Commit),
}

#[derive(Debug, Default, Clone)]
struct State {
    objects: HashMap<Hash, Object>,
    refs: BTreeMap<String, Hash>,
}

/// Thread-safe in-memory object store.
#[derive(Debug, Default)]
pub struct MemRepository {
    state: RwLock<State>,
}

/// What a [`MemRepository::fetch_from`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub objects_copied: usize,
    pub refs_updated: Vec<String>,
}

impl MemRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, encoded: &[u8], object: Object) -> Hash {
        let hash = Hash(blake3::hash(encoded).to_hex().to_string());
        self.write_state().objects.entry(hash.clone()).or_insert(object);
        hash
    }

    fn object(&self, hash: &Hash) -> Result<Object, StorageError> {
        self.read_state()
            .objects
            .get(hash)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(hash.clone()))
    }

    /// Copy every object from `other` and mirror its refs under
    /// `refs/remotes/<remote>/`.
    ///
    /// `refs/tickets/*` and `refs/configs/*` land in the remote namespace;
    /// `refs/identities/*` are immutable records and are copied as-is when
    /// missing locally.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidRefName`] if `remote` would produce an
    /// invalid ref.
    pub fn fetch_from(&self, remote: &str, other: &Self) -> Result<FetchSummary, StorageError> {
        if std::ptr::eq(self, other) {
            return Ok(FetchSummary::default());
        }
        let incoming = other.read_state().clone();
        let mut summary = FetchSummary::default();
        let mut state = self.write_state();

        for (hash, object) in incoming.objects {
            if !state.objects.contains_key(&hash) {
                state.objects.insert(hash, object);
                summary.objects_copied += 1;
            }
        }

        for (name, hash) in incoming.refs {
            let target = if let Some(rest) = name.strip_prefix("refs/tickets/") {
                format!("refs/remotes/{remote}/tickets/{rest}")
            } else if let Some(rest) = name.strip_prefix("refs/configs/") {
                format!("refs/remotes/{remote}/configs/{rest}")
            } else if name.starts_with("refs/identities/") {
                if state.refs.contains_key(&name) {
                    continue;
                }
                name
            } else {
                continue;
            };
            validate_ref_name(&target)?;
            if state.refs.get(&target) != Some(&hash) {
                state.refs.insert(target.clone(), hash);
                summary.refs_updated.push(target);
            }
        }

        debug!(
            remote,
            objects = summary.objects_copied,
            refs = summary.refs_updated.len(),
            "fetched from in-memory remote"
        );
        Ok(summary)
    }
}

fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut buf = String::from("tree\0");
    for e in entries {
        let _ = writeln!(buf, "{} {}\t{}", e.object_type.as_str(), e.hash, e.name);
    }
    buf.into_bytes()
}

fn encode_commit(commit: &Commit) -> Vec<u8> {
    let mut buf = format!("commit\0tree {}\n", commit.tree);
    for p in &commit.parents {
        let _ = writeln!(buf, "parent {p}");
    }
    buf.into_bytes()
}

impl Repository for MemRepository {
    fn store_data(&self, data: &[u8]) -> Result<Hash, StorageError> {
        let mut encoded = b"blob\0".to_vec();
        encoded.extend_from_slice(data);
        Ok(self.insert(&encoded, Object::Blob(data.to_vec())))
    }

    fn read_data(&self, hash: &Hash) -> Result<Vec<u8>, StorageError> {
        match self.object(hash)? {
            Object::Blob(data) => Ok(data),
            _ => Err(StorageError::WrongObjectType {
                hash: hash.clone(),
                expected: "blob",
            }),
        }
    }

    fn store_tree(&self, entries: &[TreeEntry]) -> Result<Hash, StorageError> {
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in &sorted {
            let expected = match entry.object_type {
                ObjectType::Blob => matches!(self.object(&entry.hash)?, Object::Blob(_)),
                ObjectType::Tree => matches!(self.object(&entry.hash)?, Object::Tree(_)),
            };
            if !expected {
                return Err(StorageError::WrongObjectType {
                    hash: entry.hash.clone(),
                    expected: entry.object_type.as_str(),
                });
            }
        }
        let encoded = encode_tree(&sorted);
        Ok(self.insert(&encoded, Object::Tree(sorted)))
    }

    fn read_tree(&self, hash: &Hash) -> Result<Vec<TreeEntry>, StorageError> {
        match self.object(hash)? {
            Object::Tree(entries) => Ok(entries),
            _ => Err(StorageError::WrongObjectType {
                hash: hash.clone(),
                expected: "tree",
            }),
        }
    }

    fn store_commit(&self, tree: &Hash, parents: &[Hash]) -> Result<Hash, StorageError> {
        self.read_tree(tree)?;
        for p in parents {
            self.read_commit(p)?;
        }
        let commit = Commit {
            tree: tree.clone(),
            parents: parents.to_vec(),
        };
        let encoded = encode_commit(&commit);
        Ok(self.insert(&encoded, Object::Commit(commit)))
    }

    fn read_commit(&self, hash: &Hash) -> Result<Commit, StorageError> {
        match self.object(hash)? {
            Object::Commit(commit) => Ok(commit),
            _ => Err(StorageError::WrongObjectType {
                hash: hash.clone(),
                expected: "commit",
            }),
        }
    }

    fn update_ref(&self, name: &str, hash: &Hash) -> Result<(), StorageError> {
        validate_ref_name(name)?;
        self.read_commit(hash)?;
        self.write_state().refs.insert(name.to_string(), hash.clone());
        Ok(())
    }

    fn resolve_ref(&self, name: &str) -> Result<Hash, StorageError> {
        self.read_state()
            .refs
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::RefNotFound(name.to_string()))
    }

    fn ref_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.read_state().refs.contains_key(name))
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .read_state()
            .refs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn find_common_ancestor(&self, a: &Hash, b: &Hash) -> Result<Hash, StorageError> {
        ancestry::find_lca(self, a, b)
    }
}
