use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::internal::message::payload::ProjectMetadata;

const DEFAULT_CONFIG_PATH: &str = "config/gateway.json";
const CONFIG_ENV_VAR: &str = "GATEWAY_CONFIG";
const DEFAULT_KERNEL_COMMAND: &str = "python3";
const DEFAULT_KERNEL_ARGS: &[&str] = &["-u", "kernel_bridge.py"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read gateway config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid gateway config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// How to launch the kernel bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_KERNEL_COMMAND.to_string(),
            args: DEFAULT_KERNEL_ARGS.iter().map(|arg| arg.to_string()).collect(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    pub open_projects: Vec<ProjectMetadata>,
    /// Id of the entry in `open_projects` that starts active.
    pub active_project: Option<String>,
}

impl ProjectsConfig {
    pub fn active(&self) -> Option<&ProjectMetadata> {
        let id = self.active_project.as_deref()?;
        self.open_projects.iter().find(|project| project.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub kernel: KernelConfig,
    pub projects: ProjectsConfig,
}

/// Loads the config from `explicit`, else `$GATEWAY_CONFIG`, else the default
/// path. Any failure falls back to defaults.
pub fn load_config(explicit: Option<&Path>) -> GatewayConfig {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
    };

    match read_config(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Loaded gateway config");
            config
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Using default gateway config: {}", e);
            GatewayConfig::default()
        }
    }
}

pub fn read_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
