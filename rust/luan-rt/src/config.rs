//! Bridge configuration.
//!
//! All limits are policy, not law: the defaults match the embedding
//! environment the bridge was first written for (a 32-deep evaluation stack
//! guard and 16-bit array lengths). Settings can be read from a TOML file:
//!
//! ```toml
//! max_depth = 32
//! max_array_len = 65535
//! stack_reserve = 4
//! ```

use std::path::{Path, PathBuf};

use luan_core::ScriptArray;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_DEPTH: usize = 32;
pub const DEFAULT_STACK_RESERVE: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Array nesting level at which conversion stops and yields null. The
    /// outermost array is level 1.
    pub max_depth: usize,
    /// Longest array converted out of a script table. Clamped to
    /// [`ScriptArray::MAX_LEN`].
    pub max_array_len: usize,
    /// Free VM stack slots required before descending into a nested array.
    pub stack_reserve: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_array_len: ScriptArray::MAX_LEN,
            stack_reserve: DEFAULT_STACK_RESERVE,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Effective array length limit.
    pub fn array_limit(&self) -> usize {
        self.max_array_len.min(ScriptArray::MAX_LEN)
    }
}
