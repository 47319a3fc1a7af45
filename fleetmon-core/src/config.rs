//! Poller configuration
//!
//! Loaded from `fleetmon.toml` (default location under the user config
//! directory). Every knob is an explicit value handed to the component
//! constructors; nothing reads ambient process state after load, and the
//! API key and SSH password stay wrapped in [`SecretString`] end to end.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::directory::DirectoryConfig;
use crate::parser::LineGrammar;
use crate::poller::PollLimits;
use crate::session::{SessionLimits, SshCredential};

/// Errors loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The offending path
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },
    /// The config file is not valid TOML
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// The offending path
        path: PathBuf,
        /// The underlying TOML error
        source: toml::de::Error,
    },
    /// The API key could not be resolved from its configured source
    #[error("failed to resolve API key: {0}")]
    ApiKey(String),
}

/// Where the directory API key comes from
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum ApiKeySource {
    /// Key written directly into the config file
    Inline {
        /// The key itself
        key: SecretString,
    },
    /// Key stored in a separate file, one line
    File {
        /// Path to the key file; `~` is expanded
        path: String,
    },
    /// Key supplied via an environment variable
    Env {
        /// Variable name
        var: String,
    },
}

impl Default for ApiKeySource {
    fn default() -> Self {
        Self::Env {
            var: "FLEETMON_API_KEY".to_string(),
        }
    }
}

impl ApiKeySource {
    /// Resolves the key from its source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ApiKey`] when the file or variable is missing
    /// or empty.
    pub fn load(&self) -> Result<SecretString, ConfigError> {
        match self {
            Self::Inline { key } => Ok(key.clone()),
            Self::File { path } => {
                let expanded = shellexpand::tilde(path).into_owned();
                let contents = std::fs::read_to_string(&expanded)
                    .map_err(|e| ConfigError::ApiKey(format!("reading {expanded}: {e}")))?;
                let key = contents.trim();
                if key.is_empty() {
                    return Err(ConfigError::ApiKey(format!("key file {expanded} is empty")));
                }
                Ok(SecretString::from(key.to_string()))
            }
            Self::Env { var } => std::env::var(var)
                .map(SecretString::from)
                .map_err(|_| ConfigError::ApiKey(format!("environment variable {var} not set"))),
        }
    }
}

/// SSH credential as spelled in the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum CredentialConfig {
    /// Private-key authentication
    Key {
        /// Remote username
        #[serde(default = "default_username")]
        username: String,
        /// Path to the private key
        #[serde(default = "default_identity_file")]
        identity_file: String,
    },
    /// Password authentication
    Password {
        /// Remote username
        #[serde(default = "default_username")]
        username: String,
        /// The password
        password: SecretString,
    },
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self::Key {
            username: default_username(),
            identity_file: default_identity_file(),
        }
    }
}

impl CredentialConfig {
    /// Converts the config form into the session credential
    #[must_use]
    pub fn to_credential(&self) -> SshCredential {
        match self {
            Self::Key {
                username,
                identity_file,
            } => SshCredential::KeyBased {
                username: username.clone(),
                identity_file: identity_file.clone(),
            },
            Self::Password { username, password } => SshCredential::PasswordBased {
                username: username.clone(),
                password: password.clone(),
            },
        }
    }
}

/// Top-level poller configuration (`fleetmon.toml`)
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Directory endpoint returning the `instances` collection
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Where the API key comes from
    #[serde(default)]
    pub api_key: ApiKeySource,
    /// SSH credential used for every instance
    #[serde(default)]
    pub credential: CredentialConfig,
    /// Path of the worker log on the remote hosts
    #[serde(default = "default_worker_log_path")]
    pub worker_log_path: String,
    /// Log-line grammar version to parse
    #[serde(default)]
    pub grammar: LineGrammar,
    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds allowed to establish one SSH connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds allowed for one instance's whole attempt
    #[serde(default = "default_instance_timeout_secs")]
    pub instance_timeout_secs: u64,
    /// Seconds allowed for one whole cycle
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: u64,
    /// Maximum concurrent SSH sessions
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Byte cap on remote command output
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Seconds allowed for the directory HTTP request
    #[serde(default = "default_directory_timeout_secs")]
    pub directory_timeout_secs: u64,
}

const fn default_poll_interval_secs() -> u64 {
    60
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_instance_timeout_secs() -> u64 {
    30
}
const fn default_cycle_deadline_secs() -> u64 {
    120
}
const fn default_worker_pool_size() -> usize {
    8
}
const fn default_max_output_bytes() -> usize {
    16 * 1024
}
const fn default_directory_timeout_secs() -> u64 {
    15
}
fn default_endpoint() -> String {
    "https://console.vast.ai/api/v0/instances/".to_string()
}
fn default_worker_log_path() -> String {
    "/root/XENGPUMiner/miner.log".to_string()
}
fn default_username() -> String {
    "root".to_string()
}
fn default_identity_file() -> String {
    "~/.ssh/id_ed25519".to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: ApiKeySource::default(),
            credential: CredentialConfig::default(),
            worker_log_path: default_worker_log_path(),
            grammar: LineGrammar::default(),
            poll_interval_secs: default_poll_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            instance_timeout_secs: default_instance_timeout_secs(),
            cycle_deadline_secs: default_cycle_deadline_secs(),
            worker_pool_size: default_worker_pool_size(),
            max_output_bytes: default_max_output_bytes(),
            directory_timeout_secs: default_directory_timeout_secs(),
        }
    }
}

impl FleetConfig {
    /// Loads configuration from the given path, or from the default
    /// location when `path` is `None`.
    ///
    /// An explicit path that does not exist is an error; a missing file at
    /// the default location falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] / [`ConfigError::Parse`] on unreadable or
    /// invalid TOML.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(ConfigError::Io {
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    path,
                });
            }
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Default config file location: `<config dir>/fleetmon/fleetmon.toml`
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleetmon")
            .join("fleetmon.toml")
    }

    /// The poll interval as a [`Duration`], clamped to at least one second
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Session timeouts derived from the config
    #[must_use]
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            exec_timeout: Duration::from_secs(self.instance_timeout_secs.max(1)),
        }
    }

    /// Cycle bounds derived from the config.
    ///
    /// The pool size is clamped to at least 1 and the cycle deadline never
    /// undercuts the per-instance timeout.
    #[must_use]
    pub fn poll_limits(&self) -> PollLimits {
        let per_instance = self.instance_timeout_secs.max(1);
        PollLimits {
            per_instance_timeout: Duration::from_secs(per_instance),
            cycle_deadline: Duration::from_secs(self.cycle_deadline_secs.max(per_instance)),
            worker_pool_size: self.worker_pool_size.clamp(1, 64),
        }
    }

    /// Directory client settings derived from the config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ApiKey`] when the key cannot be resolved.
    pub fn directory_config(&self) -> Result<DirectoryConfig, ConfigError> {
        Ok(DirectoryConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.load()?,
            request_timeout: Duration::from_secs(self.directory_timeout_secs.max(1)),
        })
    }
}
