//! Named JSON configs stored as commit chains under `refs/configs/<name>`.
//!
//! Each commit's tree holds one `config.json` blob. Changing a config
//! chains a new commit on top of the old head. Configs are not merged: when
//! the local and remote chains diverge, the local head is backed up under
//! `refs/conflicts/` and the remote head is adopted.

use std::fmt;

use tracing::{info, warn};

use super::ConfigError;
use crate::repository::{Hash, Repository, StorageError, TreeEntry, validate_ref_name};

pub const CONFIG_REF_PREFIX: &str = "refs/configs/";
pub const CONFLICT_REF_PREFIX: &str = "refs/conflicts/";
pub const CONFIG_FILE: &str = "config.json";

fn config_ref(name: &str) -> Result<String, ConfigError> {
    if name.is_empty() || name.contains('/') {
        return Err(ConfigError::InvalidName(name.to_string()));
    }
    let ref_name = format!("{CONFIG_REF_PREFIX}{name}");
    validate_ref_name(&ref_name).map_err(|_| ConfigError::InvalidName(name.to_string()))?;
    Ok(ref_name)
}

/// Names of every stored config, sorted.
///
/// # Errors
///
/// Returns [`ConfigError::Storage`] if refs cannot be listed.
pub fn list_configs<R: Repository + ?Sized>(repo: &R) -> Result<Vec<String>, ConfigError> {
    let mut names: Vec<String> = repo
        .list_refs(CONFIG_REF_PREFIX)?
        .iter()
        .filter_map(|r| r.strip_prefix(CONFIG_REF_PREFIX))
        .map(str::to_string)
        .collect();
    names.sort();
    Ok(names)
}

/// Store `data` as the new content of config `name`.
///
/// Storing the content the config already has writes no commit.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidName`] for a name that cannot be a ref and
/// [`ConfigError::Storage`] on write failure.
pub fn set_config<R: Repository + ?Sized>(
    repo: &R,
    name: &str,
    data: &[u8],
) -> Result<Hash, ConfigError> {
    let ref_name = config_ref(name)?;
    let blob = repo.store_data(data)?;
    let tree = repo.store_tree(&[TreeEntry::blob(blob, CONFIG_FILE)])?;

    let parents = if repo.ref_exists(&ref_name)? {
        let old = repo.resolve_ref(&ref_name)?;
        if repo.tree_hash(&old)? == tree {
            return Ok(old);
        }
        vec![old]
    } else {
        Vec::new()
    };

    let commit = repo.store_commit(&tree, &parents)?;
    repo.update_ref(&ref_name, &commit)?;
    info!(config = name, %commit, "stored config");
    Ok(commit)
}

/// Content of config `name` at its head.
///
/// # Errors
///
/// Returns [`ConfigError::Storage`] with [`StorageError::RefNotFound`] if
/// the config does not exist, and [`ConfigError::MissingBlob`] if its tree
/// has no `config.json`.
pub fn get_config<R: Repository + ?Sized>(repo: &R, name: &str) -> Result<Vec<u8>, ConfigError> {
    let ref_name = config_ref(name)?;
    let head = repo.resolve_ref(&ref_name)?;
    let tree = repo.tree_hash(&head)?;
    let entry = repo
        .read_tree(&tree)?
        .into_iter()
        .find(|e| e.name == CONFIG_FILE)
        .ok_or_else(|| ConfigError::MissingBlob(name.to_string()))?;
    Ok(repo.read_data(&entry.hash)?)
}

/// What [`update_configs`] did to one config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    /// The config only existed on the remote and was copied.
    New,
    UpToDate,
    /// The local chain is ahead of the remote one.
    KeptLocal,
    FastForward { head: Hash },
    /// Both chains had changes; the local head was saved as `backup`.
    Diverged { head: Hash, backup: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdateReport {
    /// One entry per remote config, by name.
    pub entries: Vec<(String, ConfigUpdate)>,
}

impl ConfigUpdateReport {
    /// Configs whose local changes were discarded.
    pub fn conflicts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(name, u)| match u {
            ConfigUpdate::Diverged { backup, .. } => Some((name.as_str(), backup.as_str())),
            _ => None,
        })
    }
}

impl fmt::Display for ConfigUpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, update) in &self.entries {
            match update {
                ConfigUpdate::New => writeln!(f, "{CONFIG_REF_PREFIX}{name}: new")?,
                ConfigUpdate::UpToDate | ConfigUpdate::KeptLocal => {}
                ConfigUpdate::FastForward { head } => {
                    writeln!(f, "{CONFIG_REF_PREFIX}{name}: updated to {head}")?;
                }
                ConfigUpdate::Diverged { head, backup } => {
                    writeln!(f, "{CONFIG_REF_PREFIX}{name}: updated to {head}")?;
                    writeln!(
                        f,
                        "warning: local changes to {name} were not based on the remote config and were discarded, backed up at {backup}"
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Bring every config fetched from `remote` into the local refs.
///
/// # Errors
///
/// Returns [`ConfigError::Storage`] on the first ref that cannot be read or
/// written. Configs handled before it stay updated.
pub fn update_configs<R: Repository + ?Sized>(
    repo: &R,
    remote: &str,
) -> Result<ConfigUpdateReport, ConfigError> {
    let remote_prefix = format!("refs/remotes/{remote}/configs/");
    let mut report = ConfigUpdateReport::default();

    for remote_ref in repo.list_refs(&remote_prefix)? {
        let Some(name) = remote_ref.strip_prefix(&remote_prefix) else {
            continue;
        };
        let local_ref = format!("{CONFIG_REF_PREFIX}{name}");
        let update = update_one(repo, name, &local_ref, &remote_ref)?;
        report.entries.push((name.to_string(), update));
    }
    Ok(report)
}

fn update_one<R: Repository + ?Sized>(
    repo: &R,
    name: &str,
    local_ref: &str,
    remote_ref: &str,
) -> Result<ConfigUpdate, StorageError> {
    if !repo.ref_exists(local_ref)? {
        repo.copy_ref(remote_ref, local_ref)?;
        info!(config = name, "adopted new config");
        return Ok(ConfigUpdate::New);
    }

    let local = repo.resolve_ref(local_ref)?;
    let remote = repo.resolve_ref(remote_ref)?;
    if local == remote {
        return Ok(ConfigUpdate::UpToDate);
    }

    // Configs created independently on both sides share no history.
    let ancestor = match repo.find_common_ancestor(&local, &remote) {
        Ok(a) => Some(a),
        Err(StorageError::NoCommonAncestor(..)) => None,
        Err(e) => return Err(e),
    };
    if ancestor.as_ref() == Some(&remote) {
        return Ok(ConfigUpdate::KeptLocal);
    }
    if ancestor.as_ref() == Some(&local) {
        repo.update_ref(local_ref, &remote)?;
        info!(config = name, head = %remote, "fast-forwarded config");
        return Ok(ConfigUpdate::FastForward { head: remote });
    }

    let backup = format!("{CONFLICT_REF_PREFIX}config-{name}-{local}");
    repo.copy_ref(local_ref, &backup)?;
    repo.update_ref(local_ref, &remote)?;
    warn!(config = name, %backup, "config diverged from remote; local copy backed up");
    Ok(ConfigUpdate::Diverged {
        head: remote,
        backup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemRepository;

    #[test]
    fn set_get_list() {
        let repo = MemRepository::new();
        let first = set_config(&repo, "workflows", b"[]").expect("set");
        assert_eq!(get_config(&repo, "workflows").expect("get"), b"[]");

        let same = set_config(&repo, "workflows", b"[]").expect("set");
        assert_eq!(same, first);

        let second = set_config(&repo, "workflows", b"[1]").expect("set");
        assert_ne!(second, first);
        assert_eq!(repo.read_commit(&second).expect("commit").parents, vec![first]);

        set_config(&repo, "checklists", b"{}").expect("set");
        assert_eq!(list_configs(&repo).expect("list"), ["checklists", "workflows"]);
    }

    #[test]
    fn bad_names_and_missing_configs() {
        let repo = MemRepository::new();
        assert!(matches!(
            set_config(&repo, "a/b", b"{}"),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            get_config(&repo, "nope"),
            Err(ConfigError::Storage(StorageError::RefNotFound(_)))
        ));
    }
}
