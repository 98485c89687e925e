//! Process-wide configuration, built once and passed by reference.

use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::checklist::ChecklistStore;
use crate::config::{ConfigError, ProjectConfig, get_config, load_project_config};
use crate::repository::{Repository, StorageError};
use crate::workflow::{HookRunner, NoHooks, ShellHookRunner, WorkflowStore};

/// Workflows, checklists and project options for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub project: ProjectConfig,
    pub workflows: WorkflowStore,
    pub checklists: ChecklistStore,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Settings {
    /// Built-in workflows, no checklists, default project options.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            project: ProjectConfig::default(),
            workflows: WorkflowStore::builtin(),
            checklists: ChecklistStore::default(),
        }
    }

    /// Load `.ticket/config.toml` under `project_root` and the `workflows`
    /// and `checklists` configs from `repo`, falling back to the built-ins
    /// for any that are absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file or a stored config is malformed,
    /// or if the repository cannot be read.
    pub fn load<R: Repository + ?Sized>(repo: &R, project_root: &Path) -> anyhow::Result<Self> {
        let project = load_project_config(project_root)?;

        let workflows = match stored(repo, "workflows")? {
            Some(data) => WorkflowStore::from_json(&data)?,
            None => WorkflowStore::builtin(),
        };
        let checklists = match stored(repo, "checklists")? {
            Some(data) => ChecklistStore::from_json(&data)?,
            None => ChecklistStore::default(),
        };
        debug!(
            workflows = workflows.iter().count(),
            checklists = checklists.labels().count(),
            "loaded settings"
        );

        Ok(Self {
            project,
            workflows,
            checklists,
        })
    }

    /// The hook runner the project asks for.
    #[must_use]
    pub fn hook_runner(&self) -> Box<dyn HookRunner> {
        if self.project.hooks.enabled {
            Box::new(ShellHookRunner::new(self.project.hooks.shell.clone()))
        } else {
            Box::new(NoHooks)
        }
    }
}

fn stored<R: Repository + ?Sized>(repo: &R, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
    match get_config(repo, name) {
        Ok(data) => Ok(Some(data)),
        Err(ConfigError::Storage(StorageError::RefNotFound(_))) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read config {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::set_config;
    use crate::label::Label;
    use crate::repository::memory::MemRepository;

    #[test]
    fn load_falls_back_to_builtins() {
        let repo = MemRepository::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&repo, dir.path()).expect("load");
        assert_eq!(settings, Settings::builtin());
    }

    #[test]
    fn load_reads_stored_configs() {
        let repo = MemRepository::new();
        let dir = tempfile::tempdir().expect("tempdir");
        set_config(
            &repo,
            "workflows",
            br#"[{"label":"workflow:tiny","transitions":[{"start":"proposed","end":"done"}]}]"#,
        )
        .expect("set");

        let settings = Settings::load(&repo, dir.path()).expect("load");
        assert!(settings.workflows.get(&Label::from("workflow:tiny")).is_some());
        assert!(settings.workflows.get(&Label::from("workflow:eng")).is_none());
    }

    #[test]
    fn malformed_stored_config_is_an_error() {
        let repo = MemRepository::new();
        let dir = tempfile::tempdir().expect("tempdir");
        set_config(&repo, "checklists", b"not json").expect("set");
        assert!(Settings::load(&repo, dir.path()).is_err());
    }
}
