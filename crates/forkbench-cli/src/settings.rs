use std::path::{Path, PathBuf};

use forkbench_core::OpKind;
use forkbench_workflow::BackendKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings file read from the working directory when present.
pub const DEFAULT_SETTINGS_FILE: &str = "forkbench.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
}

/// Defaults for command-line flags. Every field is optional; a flag given on
/// the command line always wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: Option<String>,
    pub taxonomy: Option<PathBuf>,
    pub backend: Option<BackendKind>,
    pub out_dir: Option<PathBuf>,
    pub generate: GenerateSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateSettings {
    pub name: Option<String>,
    pub columns: Option<usize>,
    pub rows: Option<usize>,
    pub versions: Option<usize>,
    pub bfactor: Option<f64>,
    pub exclude_ops: Option<Vec<OpKind>>,
    pub join_rows: Option<usize>,
    pub seed: Option<u64>,
}

/// Load `path`, or `forkbench.toml` when no path is given. A missing default
/// file yields empty settings; a missing explicit file is an error.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
    };
    if !required && !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = toml::from_str(&content)?;
    Ok(settings)
}
