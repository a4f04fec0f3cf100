//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/cradle/config.toml)
//! 3. Environment variables (CRADLE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "CRADLE";

/// Well-known realtime database host used for the first handshake
pub const DEFAULT_REALTIME_HOST: &str = "s-usc1a-nss-2056.firebaseio.com";

/// Realtime database namespace (`ns` query parameter)
pub const DEFAULT_REALTIME_NAMESPACE: &str = "amazing-ripple-221320";

/// Cloud function endpoint serving the incremental trackz sync
pub const DEFAULT_FUNCTIONS_URL: &str =
    "https://us-central1-amazing-ripple-221320.cloudfunctions.net/app";

/// Identity toolkit base (password verification)
pub const DEFAULT_IDENTITY_URL: &str = "https://www.googleapis.com/identitytoolkit/v3/relyingparty";

/// Secure token endpoint (id token refresh)
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite key-value store)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Web API key appended to identity and token requests
    #[serde(default)]
    pub api_key: String,

    /// Value of the `Firebase-Instance-ID-Token` header on sync requests
    #[serde(default)]
    pub instance_token: String,

    /// Realtime database host contacted first during login
    #[serde(default = "default_realtime_host")]
    pub realtime_host: String,

    /// Realtime database namespace
    #[serde(default = "default_realtime_namespace")]
    pub realtime_namespace: String,

    /// Incremental sync endpoint
    #[serde(default = "default_functions_url")]
    pub functions_url: String,

    /// Password verification endpoint base
    #[serde(default = "default_identity_url")]
    pub identity_url: String,

    /// Token refresh endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Upper bound on each wait during the realtime handshake
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Interval between syncs in `cradle watch`
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Log file path (logs go to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_key: String::new(),
            instance_token: String::new(),
            realtime_host: default_realtime_host(),
            realtime_namespace: default_realtime_namespace(),
            functions_url: default_functions_url(),
            identity_url: default_identity_url(),
            token_url: default_token_url(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (CRADLE_DATA_DIR, CRADLE_API_KEY, ...)
    /// 2. Config file (~/.config/cradle/config.toml or CRADLE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path from the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Some(val) = env_var("API_KEY") {
            self.api_key = val;
        }
        // Named after the header it fills
        if let Some(val) = env_var("FIREBASE_KEY") {
            self.instance_token = val;
        }
        if let Some(val) = env_var("INSTANCE_TOKEN") {
            self.instance_token = val;
        }
        if let Some(val) = env_var("REALTIME_HOST") {
            if !val.is_empty() {
                self.realtime_host = val;
            }
        }
        if let Some(val) = env_var("HANDSHAKE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.handshake_timeout_secs = secs;
            }
        }
        if let Some(val) = env_var("SYNC_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.sync_interval_secs = secs;
            }
        }
        if let Some(val) = env_var("LOG_FILE") {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with CRADLE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cradle")
            .join("config.toml")
    }

    /// Get the path to the SQLite key-value store
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("cradle.db")
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, suffix)).ok()
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cradle")
}

fn default_realtime_host() -> String {
    DEFAULT_REALTIME_HOST.to_string()
}

fn default_realtime_namespace() -> String {
    DEFAULT_REALTIME_NAMESPACE.to_string()
}

fn default_functions_url() -> String {
    DEFAULT_FUNCTIONS_URL.to_string()
}

fn default_identity_url() -> String {
    DEFAULT_IDENTITY_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_handshake_timeout_secs() -> u64 {
    15
}

fn default_sync_interval_secs() -> u64 {
    300
}
