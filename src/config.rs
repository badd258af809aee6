use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths;

pub const DEFAULT_PROTECTED_COMMANDS: &[&str] = &[
    "delete",
    "edit",
    "exec",
    "drain",
    "scale",
    "autoscale",
    "replace",
    "apply",
    "patch",
    "set",
];

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error("invalid path in config: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub kubeconfigs: KubeconfigPaths,
    /// Pick contexts and namespaces interactively when no name is given.
    pub interactive_shell_mode: bool,
    pub protection: ProtectionConfig,
    pub kubeconfig_providers: KubeconfigProviders,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfigs: KubeconfigPaths::default(),
            interactive_shell_mode: true,
            protection: ProtectionConfig::default(),
            kubeconfig_providers: KubeconfigProviders::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeconfigPaths {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for KubeconfigPaths {
    fn default() -> Self {
        Self {
            include: vec!["~/.kube/config".to_string()],
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Contexts matching this regex are protected unless explicitly overridden.
    pub regex: Option<String>,
    /// kubectl subcommands blocked in protected contexts.
    pub commands: Vec<String>,
    /// Ask for confirmation instead of refusing outright.
    pub prompt: bool,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            regex: None,
            commands: DEFAULT_PROTECTED_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            prompt: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeconfigProviders {
    pub encrypted: EncryptedProviderConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptedProviderConfig {
    pub enabled: bool,
    /// Defaults to `<data dir>/encrypted`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,
}

impl EncryptedProviderConfig {
    pub fn resolved_storage_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.storage_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => {
                paths::expand_tilde(dir).map_err(ConfigError::InvalidPath)
            }
            _ => Ok(paths::default_encrypted_storage_dir()),
        }
    }
}

/// A config plus the file it came from, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load from `explicit` when given (it must exist), else from the default location
    /// when present, else fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        if let Some(path) = explicit {
            let config = Self::read(path)?;
            return Ok(LoadedConfig {
                config,
                source: Some(path.to_path_buf()),
            });
        }

        let default_path = paths::default_config_path();
        if default_path.is_file() {
            let config = Self::read(&default_path)?;
            return Ok(LoadedConfig {
                config,
                source: Some(default_path),
            });
        }

        tracing::debug!(path = %default_path.display(), "no config file found, using defaults");
        Ok(LoadedConfig {
            config: Config::default(),
            source: None,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn default_yaml() -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(&Config::default())?)
    }
}
