//! Loading [`ToolConfig`] and sharing it between sessions.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::{env, fs};

use crate::types::ToolConfig;

/// Environment variable overriding the configured executable.
pub const EXECUTABLE_ENV: &str = "MODQUERY_EXECUTABLE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// `~/.modquery/config.toml`
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".modquery").join("config.toml"))
}

impl ToolConfig {
    /// Load the user config, falling back to defaults when there is none.
    /// `MODQUERY_EXECUTABLE` overrides the executable either way.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        if let Some(executable) = env::var_os(EXECUTABLE_ENV).filter(|v| !v.is_empty()) {
            config.executable = PathBuf::from(executable);
        }
        Ok(config)
    }

    /// Parse the config file at `path`. Unset keys take their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// Tool configuration shared by every session of a registry.
///
/// Sessions take a snapshot at the start of each query, so changes apply to
/// the next query without restarting anything up front.
#[derive(Debug, Default)]
pub struct ToolSettings {
    config: RwLock<ToolConfig>,
}

impl ToolSettings {
    #[must_use]
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ToolConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn executable(&self) -> PathBuf {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .executable
            .clone()
    }

    /// Switch executables. Running processes are replaced on their next query.
    pub fn set_executable(&self, executable: impl Into<PathBuf>) {
        let executable = executable.into();
        tracing::info!("Tool executable set to {}", executable.display());
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .executable = executable;
    }
}
