//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/clevercard/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/clevercard/` (~/.config/clevercard/)
//! - State/Logs: `$XDG_STATE_HOME/clevercard/` (~/.local/state/clevercard/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when `backend.anon_key` is not in the file
pub const ANON_KEY_ENV: &str = "CLEVERCARD_ANON_KEY";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Persistence service connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Persistence service (auth + tables) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Project URL (e.g., `https://xyzcompany.supabase.co`)
    pub url: Option<String>,

    /// Public anon key sent as `apikey` on every request
    pub anon_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            timeout_secs: default_backend_timeout(),
        }
    }
}

fn default_backend_timeout() -> u64 {
    30
}

impl BackendConfig {
    /// Anon key from the file, falling back to `CLEVERCARD_ANON_KEY`
    pub fn resolve_anon_key(&self) -> Option<String> {
        self.anon_key
            .clone()
            .or_else(|| std::env::var(ANON_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Check if the backend has everything needed to connect
    pub fn is_ready(&self) -> bool {
        self.url.is_some() && self.resolve_anon_key().is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.url.as_deref() {
            None => {
                return Err(Error::Config("backend.url is required".to_string()));
            }
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                return Err(Error::Config(format!(
                    "backend.url must be an http(s) URL, got {:?}",
                    url
                )));
            }
            Some(_) => {}
        }
        if self.resolve_anon_key().is_none() {
            return Err(Error::Config(format!(
                "backend.anon_key is required (or set {})",
                ANON_KEY_ENV
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "backend.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/clevercard/config.toml` (~/.config/clevercard/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("clevercard").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/clevercard/` (~/.local/state/clevercard/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("clevercard")
    }

    /// Returns today's log file path; files rotate daily (UTC)
    pub fn log_path() -> PathBuf {
        let date = chrono::Utc::now().format("%Y-%m-%d");
        Self::state_dir().join(format!("clevercard.{}.log", date))
    }
}
