//! User configuration settings
//!
//! Layered configuration: defaults → config file → environment variables

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretBox;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Environment variable prefix (`MIRROR_REPOSITORY__PATH`, ...)
pub const ENV_PREFIX: &str = "MIRROR_";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local working copy and its remote
    pub repository: RepositoryConfig,

    /// Request transport settings
    pub server: ServerConfig,

    /// History listing limits
    pub history: HistoryConfig,

    /// Timeout for local git commands in milliseconds
    pub command_timeout_ms: u64,

    /// Timeout for clone/pull/push/fetch in milliseconds
    pub network_timeout_ms: u64,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            server: ServerConfig::default(),
            history: HistoryConfig::default(),
            command_timeout_ms: 10_000,
            network_timeout_ms: 60_000,
            debug: false,
            log_file: None,
        }
    }
}

/// Where the mirror lives and what it mirrors
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Local working copy path
    pub path: Option<PathBuf>,

    /// Remote URL to clone and push to
    pub remote_url: Option<String>,

    /// Access token embedded into http(s) remote URLs
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Name of the remote to sync with
    pub remote_name: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            remote_url: None,
            token: None,
            remote_name: "origin".to_string(),
        }
    }
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("path", &self.path)
            .field("remote_url", &self.remote_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("remote_name", &self.remote_name)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the request transport listens on
    pub bind: String,

    /// Maximum concurrent requests per connection
    pub max_in_flight: usize,

    /// Serve `POST /admin/token`; only enable on a trusted interface
    pub allow_token_rotation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7420".to_string(),
            max_in_flight: 8,
            allow_token_rotation: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Limit used when a request does not give one
    pub default_limit: usize,

    /// Upper bound on any requested limit
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl HistoryConfig {
    /// Resolve a requested limit against the configured bounds
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        match requested {
            None | Some(0) => self.default_limit.min(self.max_limit),
            Some(n) => n.min(self.max_limit),
        }
    }
}

/// Validated repository settings; every field the engine needs is present
pub struct RepoSettings {
    pub path: PathBuf,
    pub remote_url: String,
    pub remote_name: String,
    pub token: SecretBox<String>,
    pub command_timeout: Duration,
    pub network_timeout: Duration,
}

impl fmt::Debug for RepoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoSettings")
            .field("path", &self.path)
            .field("remote_url", &self.remote_url)
            .field("remote_name", &self.remote_name)
            .field("command_timeout", &self.command_timeout)
            .field("network_timeout", &self.network_timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration using a specific file as the file layer
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(config_path))
            // Layer environment variables (MIRROR_REPOSITORY__PATH, etc.)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        Ok(config)
    }

    /// Check that the repository is fully configured
    pub fn repo_settings(&self) -> Result<RepoSettings> {
        let path = self
            .repository
            .path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("repository.path"))?;
        let remote_url = self
            .repository
            .remote_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::Missing("repository.remote_url"))?;
        let token = self
            .repository
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("repository.token"))?;

        if self.repository.remote_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "repository.remote_name".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        Ok(RepoSettings {
            path,
            remote_url: remote_url.trim().to_string(),
            remote_name: self.repository.remote_name.clone(),
            token: SecretBox::new(Box::new(token)),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            network_timeout: Duration::from_millis(self.network_timeout_ms),
        })
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific path. The token is never written.
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(config_path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "mirror-sync", "mirror-sync").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}
