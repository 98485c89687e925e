//! Repository backed by a real git object database.
//!
//! Every operation shells out to the `git` plumbing commands
//! (`hash-object`, `mktree`, `commit-tree`, `update-ref`, ...). Commands run
//! with system and global config disabled so behaviour does not depend on the
//! user's setup.
//!
//! Pack commits carry a fixed author, committer and date. The commit hash
//! then depends only on tree and parents, so two replicas merging the same
//! heads write the same merge commit.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, info};

use super::{Commit, Hash, ObjectType, Repository, StorageError, TreeEntry, validate_ref_name};

const PACK_COMMIT_NAME: &str = "git-ticket";
const PACK_COMMIT_EMAIL: &str = "git-ticket@localhost";
/// Git internal date format: seconds since the epoch and a zone offset.
const PACK_COMMIT_DATE: &str = "1000000000 +0000";
const PACK_COMMIT_MESSAGE: &str = "ticket: operation pack";

/// A git working directory (or bare repository) used as a ticket store.
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
}

/// Whether a usable `git` binary is on `PATH`.
#[must_use]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

impl GitRepository {
    /// Open an existing repository.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if `path` is not inside a git repository.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let repo = Self {
            workdir: path.into(),
        };
        repo.run(&["rev-parse", "--git-dir"])?;
        Ok(repo)
    }

    /// Create a new repository at `path` (which must exist) and open it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if `git init` fails.
    pub fn init(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let repo = Self {
            workdir: path.into(),
        };
        repo.run(&["init", "--quiet"])?;
        info!(path = %repo.workdir.display(), "initialised git repository");
        Ok(repo)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.workdir
    }

    /// Register `url` as remote `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if git rejects the remote.
    pub fn add_remote(&self, name: &str, url: &str) -> Result<(), StorageError> {
        self.run(&["remote", "add", name, url])?;
        Ok(())
    }

    /// Fetch tickets, configs and identities from `remote`.
    ///
    /// Tickets and configs land under `refs/remotes/<remote>/`, ready for
    /// `Ticket::merge_all` and `update_configs`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the fetch fails.
    pub fn fetch(&self, remote: &str) -> Result<(), StorageError> {
        let tickets = format!("+refs/tickets/*:refs/remotes/{remote}/tickets/*");
        let configs = format!("+refs/configs/*:refs/remotes/{remote}/configs/*");
        self.run(&[
            "fetch",
            "--quiet",
            remote,
            &tickets,
            &configs,
            "refs/identities/*:refs/identities/*",
        ])?;
        debug!(remote, "fetched ticket refs");
        Ok(())
    }

    /// Push local tickets, configs and identities to `remote`.
    ///
    /// Diverged ticket refs are rejected by the remote; fetch and merge first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the push fails.
    pub fn push(&self, remote: &str) -> Result<(), StorageError> {
        self.run(&[
            "push",
            "--quiet",
            remote,
            "refs/tickets/*:refs/tickets/*",
            "refs/configs/*:refs/configs/*",
            "refs/identities/*:refs/identities/*",
        ])?;
        debug!(remote, "pushed ticket refs");
        Ok(())
    }

    fn git_command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir);
        cmd.env("GIT_CONFIG_NOSYSTEM", "1");
        cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn raw(&self, args: &[&str]) -> Result<Output, StorageError> {
        Ok(self.git_command().args(args).output()?)
    }

    fn run(&self, args: &[&str]) -> Result<Output, StorageError> {
        let output = self.raw(args)?;
        check(args, output)
    }

    fn run_stdout(&self, args: &[&str]) -> Result<String, StorageError> {
        let output = self.run(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_with_input(&self, args: &[&str], input: &[u8]) -> Result<String, StorageError> {
        let mut child = self
            .git_command()
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }
        let output = check(args, child.wait_with_output()?)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn ensure_object(&self, hash: &Hash, kind: &'static str) -> Result<(), StorageError> {
        let output = self.raw(&["cat-file", "-t", hash.as_str()])?;
        if !output.status.success() {
            return Err(StorageError::ObjectNotFound(hash.clone()));
        }
        if String::from_utf8_lossy(&output.stdout).trim() != kind {
            return Err(StorageError::WrongObjectType {
                hash: hash.clone(),
                expected: kind,
            });
        }
        Ok(())
    }
}

fn check(args: &[&str], output: Output) -> Result<Output, StorageError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(StorageError::Command {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn parse_tree_line(tree: &Hash, line: &str) -> Result<TreeEntry, StorageError> {
    let malformed = || StorageError::Corrupt {
        hash: tree.clone(),
        reason: format!("unexpected ls-tree line: {line:?}"),
    };
    let (meta, name) = line.split_once('\t').ok_or_else(malformed)?;
    let mut parts = meta.split_whitespace();
    let _mode = parts.next().ok_or_else(malformed)?;
    let object_type = match parts.next() {
        Some("blob") => ObjectType::Blob,
        Some("tree") => ObjectType::Tree,
        _ => return Err(malformed()),
    };
    let hash = Hash::new(parts.next().ok_or_else(malformed)?)?;
    Ok(TreeEntry {
        object_type,
        hash,
        name: name.to_string(),
    })
}

impl Repository for GitRepository {
    fn store_data(&self, data: &[u8]) -> Result<Hash, StorageError> {
        Hash::new(self.run_with_input(&["hash-object", "-w", "--stdin"], data)?)
    }

    fn read_data(&self, hash: &Hash) -> Result<Vec<u8>, StorageError> {
        self.ensure_object(hash, "blob")?;
        Ok(self.run(&["cat-file", "blob", hash.as_str()])?.stdout)
    }

    fn store_tree(&self, entries: &[TreeEntry]) -> Result<Hash, StorageError> {
        let mut input = String::new();
        for e in entries {
            let mode = match e.object_type {
                ObjectType::Blob => "100644",
                ObjectType::Tree => "040000",
            };
            let _ = writeln!(input, "{mode} {} {}\t{}", e.object_type.as_str(), e.hash, e.name);
        }
        Hash::new(self.run_with_input(&["mktree"], input.as_bytes())?)
    }

    fn read_tree(&self, hash: &Hash) -> Result<Vec<TreeEntry>, StorageError> {
        self.ensure_object(hash, "tree")?;
        let out = self.run_stdout(&["ls-tree", hash.as_str()])?;
        let mut entries = out
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| parse_tree_line(hash, l))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn store_commit(&self, tree: &Hash, parents: &[Hash]) -> Result<Hash, StorageError> {
        let mut args: Vec<&str> = vec!["commit-tree", tree.as_str()];
        for p in parents {
            args.push("-p");
            args.push(p.as_str());
        }
        args.push("-m");
        args.push(PACK_COMMIT_MESSAGE);
        let output = self
            .git_command()
            .args(&args)
            .env("GIT_AUTHOR_NAME", PACK_COMMIT_NAME)
            .env("GIT_AUTHOR_EMAIL", PACK_COMMIT_EMAIL)
            .env("GIT_AUTHOR_DATE", PACK_COMMIT_DATE)
            .env("GIT_COMMITTER_NAME", PACK_COMMIT_NAME)
            .env("GIT_COMMITTER_EMAIL", PACK_COMMIT_EMAIL)
            .env("GIT_COMMITTER_DATE", PACK_COMMIT_DATE)
            .output()?;
        let output = check(&args, output)?;
        Hash::new(String::from_utf8_lossy(&output.stdout).trim())
    }

    fn read_commit(&self, hash: &Hash) -> Result<Commit, StorageError> {
        self.ensure_object(hash, "commit")?;
        let out = self.run_stdout(&["cat-file", "commit", hash.as_str()])?;
        let mut tree = None;
        let mut parents = Vec::new();
        for line in out.lines().take_while(|l| !l.is_empty()) {
            if let Some(t) = line.strip_prefix("tree ") {
                tree = Some(Hash::new(t)?);
            } else if let Some(p) = line.strip_prefix("parent ") {
                parents.push(Hash::new(p)?);
            }
        }
        let tree = tree.ok_or_else(|| StorageError::Corrupt {
            hash: hash.clone(),
            reason: "commit has no tree header".to_string(),
        })?;
        Ok(Commit { tree, parents })
    }

    fn update_ref(&self, name: &str, hash: &Hash) -> Result<(), StorageError> {
        validate_ref_name(name)?;
        self.run(&["update-ref", name, hash.as_str()])?;
        Ok(())
    }

    fn resolve_ref(&self, name: &str) -> Result<Hash, StorageError> {
        let output = self.raw(&["rev-parse", "--verify", "--quiet", name])?;
        if !output.status.success() {
            return Err(StorageError::RefNotFound(name.to_string()));
        }
        Hash::new(String::from_utf8_lossy(&output.stdout).trim())
    }

    fn ref_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self
            .raw(&["show-ref", "--verify", "--quiet", name])?
            .status
            .success())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let out = self.run_stdout(&["for-each-ref", "--format=%(refname)", prefix])?;
        let mut refs: Vec<String> = out
            .lines()
            .filter(|l| l.starts_with(prefix))
            .map(str::to_string)
            .collect();
        refs.sort();
        Ok(refs)
    }

    fn find_common_ancestor(&self, a: &Hash, b: &Hash) -> Result<Hash, StorageError> {
        let output = self.raw(&["merge-base", a.as_str(), b.as_str()])?;
        if !output.status.success() {
            return Err(StorageError::NoCommonAncestor(a.clone(), b.clone()));
        }
        Hash::new(String::from_utf8_lossy(&output.stdout).trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ls_tree_lines() {
        let tree = Hash::new("4b825dc642cb6eb9a060e54bf8d69288fbee4904").expect("hash");
        let entry = parse_tree_line(
            &tree,
            "100644 blob 8ab686eafeb1f44702738c8b0f24f2567c36da6d\tedit-clock-3",
        )
        .expect("parse");
        assert_eq!(entry.object_type, ObjectType::Blob);
        assert_eq!(entry.name, "edit-clock-3");
        assert!(parse_tree_line(&tree, "garbage").is_err());
    }

    #[test]
    fn store_and_read_back() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = GitRepository::init(dir.path()).expect("init");

        let blob = repo.store_data(b"{\"k\":1}").expect("blob");
        assert_eq!(repo.read_data(&blob).expect("read"), b"{\"k\":1}");

        let tree = repo
            .store_tree(&[TreeEntry::blob(blob.clone(), "ops")])
            .expect("tree");
        assert_eq!(
            repo.read_tree(&tree).expect("ls-tree"),
            vec![TreeEntry::blob(blob, "ops")]
        );

        let root = repo.store_commit(&tree, &[]).expect("root");
        let child = repo.store_commit(&tree, &[root.clone()]).expect("child");
        let commit = repo.read_commit(&child).expect("read commit");
        assert_eq!(commit.tree, tree);
        assert_eq!(commit.parents, vec![root.clone()]);

        repo.update_ref("refs/tickets/abc", &child).expect("update-ref");
        assert_eq!(repo.resolve_ref("refs/tickets/abc").expect("resolve"), child);
        assert!(repo.ref_exists("refs/tickets/abc").expect("exists"));
        assert!(!repo.ref_exists("refs/tickets/nope").expect("exists"));
        assert_eq!(
            repo.list_refs("refs/tickets/").expect("list"),
            ["refs/tickets/abc"]
        );
        assert_eq!(repo.find_common_ancestor(&root, &child).expect("merge-base"), root);
        assert!(matches!(
            repo.resolve_ref("refs/tickets/nope"),
            Err(StorageError::RefNotFound(_))
        ));
    }

    #[test]
    fn equal_commits_hash_equally_across_repositories() {
        if !git_available() {
            return;
        }
        let dirs = [
            tempfile::tempdir().expect("tempdir"),
            tempfile::tempdir().expect("tempdir"),
        ];
        let commits: Vec<Hash> = dirs
            .iter()
            .map(|dir| {
                let repo = GitRepository::init(dir.path()).expect("init");
                let blob = repo.store_data(b"same").expect("blob");
                let tree = repo
                    .store_tree(&[TreeEntry::blob(blob, "ops")])
                    .expect("tree");
                let root = repo.store_commit(&tree, &[]).expect("root");
                repo.store_commit(&tree, &[root]).expect("child")
            })
            .collect();
        assert_eq!(commits[0], commits[1]);
    }
}
