//! Configuration: the project TOML file and the shared config refs.
//!
//! Two sources feed [`crate::Settings`]:
//!
//! - `.ticket/config.toml` in the working tree, local to one checkout.
//! - JSON blobs under `refs/configs/<name>`, shared between replicas and
//!   synchronised by [`update_configs`].

mod store;

pub use store::{
    CONFIG_FILE, CONFIG_REF_PREFIX, CONFLICT_REF_PREFIX, ConfigUpdate, ConfigUpdateReport,
    get_config, list_configs, set_config, update_configs,
};

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::label::Label;
use crate::repository::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config {name:?} is not valid JSON: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no checklist is configured for label {0}")]
    UnknownChecklist(Label),

    #[error("config {0:?} has no config.json blob")]
    MissingBlob(String),

    #[error("invalid config name: {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Settings from `.ticket/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow label given to new tickets when none is named.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            shell: default_shell(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_revision_prefix")]
    pub revision_prefix: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            revision_prefix: default_revision_prefix(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_shell() -> String {
    "sh".to_string()
}

const fn default_page_limit() -> u32 {
    100
}

fn default_revision_prefix() -> String {
    "D".to_string()
}

/// Load `.ticket/config.toml` under `project_root`. A missing file gives
/// the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> anyhow::Result<ProjectConfig> {
    let path = project_root.join(".ticket/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}
