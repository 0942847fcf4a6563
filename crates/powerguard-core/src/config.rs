//! Session configuration.
//!
//! Every section has working defaults, so an empty file (or no file at all)
//! yields the stock behavior. Unknown keys are rejected.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use powerguard_surface::{ClassifierConfig, TreeScanLimits};

use crate::detector::DetectionConfig;
use crate::gate::GateConfig;
use crate::privilege::PrivilegeConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    pub classifier: ClassifierConfig,
    pub tree_scan: TreeScanLimits,
    pub detection: DetectionConfig,
    pub gate: GateConfig,
    pub privilege: PrivilegeConfig,
}

impl GuardConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifier.system_package.is_empty() {
            return Err(ConfigError::Invalid(
                "classifier.system_package must not be empty".to_string(),
            ));
        }
        if self.tree_scan.max_depth == 0 || self.tree_scan.max_nodes == 0 {
            return Err(ConfigError::Invalid(
                "tree_scan limits must be at least 1".to_string(),
            ));
        }
        if self.detection.own_package.is_empty() {
            return Err(ConfigError::Invalid(
                "detection.own_package must not be empty".to_string(),
            ));
        }
        if self.privilege.component.is_empty() {
            return Err(ConfigError::Invalid(
                "privilege.component must not be empty".to_string(),
            ));
        }
        if self.privilege.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "privilege.call_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
