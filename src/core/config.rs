//! Project configuration loaded from `.specpack/config.toml`.
//!
//! Every field has a default, so a missing file is equivalent to an empty one.

use crate::core::diff::DEFAULT_CONTEXT_LINES;
use crate::core::error::SpecPackError;
use crate::core::pack::{Provenance, default_producer_version};
use crate::plugins::proposal::DEFAULT_NEXT_STEP_LABEL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".specpack";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecPackConfig {
    pub producer_version: String,
    pub validator_version: String,
    pub diff_context_lines: usize,
    /// Relative to the project root unless absolute.
    pub data_dir: String,
    pub next_step_label: String,
}

impl Default for SpecPackConfig {
    fn default() -> Self {
        Self {
            producer_version: default_producer_version(),
            validator_version: default_producer_version(),
            diff_context_lines: DEFAULT_CONTEXT_LINES,
            data_dir: format!("{CONFIG_DIR}/data"),
            next_step_label: DEFAULT_NEXT_STEP_LABEL.to_string(),
        }
    }
}

impl SpecPackConfig {
    pub fn provenance(&self) -> Provenance {
        Provenance {
            producer_version: self.producer_version.clone(),
            validator_version: self.validator_version.clone(),
        }
    }

    pub fn data_dir(&self, project_root: &Path) -> PathBuf {
        let dir = Path::new(&self.data_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            project_root.join(dir)
        }
    }

    fn validate(&self) -> Result<(), SpecPackError> {
        if self.producer_version.trim().is_empty() || self.validator_version.trim().is_empty() {
            return Err(SpecPackError::ConfigError(
                "producer_version and validator_version cannot be empty".to_string(),
            ));
        }
        if self.data_dir.trim().is_empty() {
            return Err(SpecPackError::ConfigError("data_dir cannot be empty".to_string()));
        }
        Ok(())
    }
}

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_DIR).join(CONFIG_FILE)
}

pub fn load_config(project_root: &Path) -> Result<SpecPackConfig, SpecPackError> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(SpecPackConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    let config: SpecPackConfig = toml::from_str(&content)
        .map_err(|e| SpecPackError::ConfigError(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
