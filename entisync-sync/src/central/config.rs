//! Connection settings and the session token cache.
//!
//! Both live in TOML files under `~/.entisync/` unless overridden by an
//! explicit path or an environment variable.

use crate::options::coalesce;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding the config file location.
pub const CONFIG_FILE_ENV: &str = "ENTISYNC_CONFIG_FILE";
/// Environment variable overriding the token cache location.
pub const CACHE_FILE_ENV: &str = "ENTISYNC_CACHE_FILE";

const TOKEN_KEY: &str = "token";

/// Errors reading or writing configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config value '{0}' must not be empty")]
    Missing(&'static str),

    #[error("could not write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode TOML: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Settings for one Central server.
#[derive(Clone, Serialize, Deserialize)]
pub struct CentralConfig {
    /// Server root, e.g. `https://central.example.com`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub default_project_id: Option<u32>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for idempotent requests on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl fmt::Debug for CentralConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("default_project_id", &self.default_project_id)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    central: CentralConfig,
}

impl CentralConfig {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            default_project_id: None,
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }

    /// Checks that the mandatory values are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("base_url", &self.base_url),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        Ok(())
    }

    /// Reads and validates the `[central]` section of a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.central.validate()?;
        debug!("Loaded Central config from {:?}", path);
        Ok(file.central)
    }
}

fn dirs_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".entisync")
    } else if let Ok(home) = std::env::var("USERPROFILE") {
        Path::new(&home).join(".entisync")
    } else {
        PathBuf::from(".entisync")
    }
}

/// Picks the explicit path, then the environment value, then the default
/// file under `~/.entisync/`.
pub fn resolve_path(explicit: Option<&Path>, env_value: Option<String>, file_name: &str) -> PathBuf {
    coalesce([explicit.map(Path::to_path_buf), env_value.map(PathBuf::from)])
        .unwrap_or_else(|| dirs_path().join(file_name))
}

/// Location of the config file.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    resolve_path(explicit, std::env::var(CONFIG_FILE_ENV).ok(), "config.toml")
}

/// Location of the token cache.
pub fn cache_path(explicit: Option<&Path>) -> PathBuf {
    resolve_path(explicit, std::env::var(CACHE_FILE_ENV).ok(), "cache.toml")
}

/// Session token persisted between runs.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached token, if the file exists and holds one.
    ///
    /// An unreadable cache is treated as empty; the caller logs in again.
    pub fn read(&self) -> Option<String> {
        let table = match self.read_table() {
            Ok(table) => table?,
            Err(e) => {
                warn!("Ignoring token cache: {}", e);
                return None;
            }
        };
        table.get(TOKEN_KEY)?.as_str().map(str::to_string)
    }

    /// Stores the token, keeping any other keys in the file.
    pub fn write(&self, token: &str) -> Result<(), ConfigError> {
        let mut table = self.read_table().ok().flatten().unwrap_or_default();
        table.insert(TOKEN_KEY.to_string(), toml::Value::String(token.to_string()));

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let contents = toml::to_string(&table)?;
        std::fs::write(&self.path, contents).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Removes the cache file if it exists.
    pub fn clear(&self) -> Result<(), ConfigError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ConfigError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn read_table(&self) -> Result<Option<toml::Table>, ConfigError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let config = CentralConfig::new("https://c.example.com", "me@example.com", "hunter2");
        let out = format!("{config:?}");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn dirs_path_ends_in_entisync() {
        assert!(dirs_path().ends_with(".entisync"));
    }
}
