//! Configuration system (layered: code > env > config file > defaults).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

pub const DEFAULT_STORAGE_KEY: &str = "auth_token";
pub const DEFAULT_REFRESH_ENDPOINT: &str = "http://localhost:3000/api/auth/refresh";
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_REFRESH_ATTEMPTS: u32 = 3;
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

const CONFIG_FILE_VERSION: u32 = 1;

/// Tunables for one session manager.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use freshtoken::config::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .refresh_endpoint("https://api.example.com/auth/refresh")
///     .refresh_threshold(Duration::from_secs(120))
///     .build();
/// assert_eq!(config.storage_key, "auth_token");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct SessionConfig {
    /// Storage key holding the bearer token.
    #[builder(into, default = DEFAULT_STORAGE_KEY.to_string())]
    pub storage_key: String,
    /// Cached identity entries cleared together with the token.
    #[builder(default = vec!["user".to_string()])]
    pub identity_keys: Vec<String>,
    #[builder(into, default = DEFAULT_REFRESH_ENDPOINT.to_string())]
    pub refresh_endpoint: String,
    /// Lead time before expiry at which a proactive refresh fires.
    #[builder(default = DEFAULT_REFRESH_THRESHOLD)]
    pub refresh_threshold: Duration,
    #[builder(default = DEFAULT_MIN_REFRESH_INTERVAL)]
    pub min_refresh_interval: Duration,
    #[builder(default = DEFAULT_MAX_REFRESH_INTERVAL)]
    pub max_refresh_interval: Duration,
    #[builder(default = DEFAULT_MAX_REFRESH_ATTEMPTS)]
    pub max_refresh_attempts: u32,
    /// Upper bound on a single refresh exchange.
    #[builder(default = DEFAULT_REFRESH_TIMEOUT)]
    pub refresh_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Default config file path (~/.freshtoken/config.toml).
    pub fn default_config_path() -> PathBuf {
        default_base_dir().join("config.toml")
    }

    /// Load from environment variables on top of the defaults.
    ///
    /// Reads `.env` if present. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::default().with_env()
    }

    /// Apply `FRESHTOKEN_*` environment overrides to this config.
    pub fn with_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Load a TOML config file layered over the defaults.
    ///
    /// Returns the defaults if the file does not exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(SessionError::Io(err)),
        };
        let file: ConfigFile = toml::from_str(&raw)?;
        if file.version != CONFIG_FILE_VERSION {
            return Err(SessionError::Configuration(format!(
                "Unsupported config file version {} at {}",
                file.version,
                path.display()
            )));
        }
        let config = file.session.apply(Self::default());
        config.validate()?;
        Ok(config)
    }

    /// Config file, then environment.
    pub fn load_layered(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let config = Self::load_from_path(path)?.with_env();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_key.trim().is_empty() {
            return Err(SessionError::Configuration(
                "storage_key must not be empty".to_string(),
            ));
        }
        if self.max_refresh_attempts == 0 {
            return Err(SessionError::Configuration(
                "max_refresh_attempts must be at least 1".to_string(),
            ));
        }
        if self.min_refresh_interval > self.max_refresh_interval {
            return Err(SessionError::Configuration(format!(
                "min_refresh_interval ({}s) exceeds max_refresh_interval ({}s)",
                self.min_refresh_interval.as_secs(),
                self.max_refresh_interval.as_secs()
            )));
        }
        if self.refresh_timeout.is_zero() {
            return Err(SessionError::Configuration(
                "refresh_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("FRESHTOKEN_STORAGE_KEY") {
            self.storage_key = key;
        }
        if let Some(endpoint) = lookup("FRESHTOKEN_REFRESH_ENDPOINT") {
            self.refresh_endpoint = endpoint;
        }
        if let Some(keys) = lookup("FRESHTOKEN_IDENTITY_KEYS") {
            self.identity_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }

        let secs_mappings: [(&str, &mut Duration); 4] = [
            ("FRESHTOKEN_REFRESH_THRESHOLD_SECS", &mut self.refresh_threshold),
            ("FRESHTOKEN_MIN_REFRESH_INTERVAL_SECS", &mut self.min_refresh_interval),
            ("FRESHTOKEN_MAX_REFRESH_INTERVAL_SECS", &mut self.max_refresh_interval),
            ("FRESHTOKEN_REFRESH_TIMEOUT_SECS", &mut self.refresh_timeout),
        ];
        for (var, slot) in secs_mappings {
            if let Some(raw) = lookup(var) {
                match raw.trim().parse::<u64>() {
                    Ok(secs) => *slot = Duration::from_secs(secs),
                    Err(e) => tracing::warn!(var, value = %raw, error = %e, "Ignoring invalid duration"),
                }
            }
        }

        if let Some(raw) = lookup("FRESHTOKEN_MAX_REFRESH_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(attempts) => self.max_refresh_attempts = attempts,
                Err(e) => tracing::warn!(value = %raw, error = %e, "Ignoring invalid max attempts"),
            }
        }
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    version: u32,
    #[serde(default)]
    session: SessionSection,
}

/// `[session]` table; durations in seconds.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionSection {
    storage_key: Option<String>,
    identity_keys: Option<Vec<String>>,
    refresh_endpoint: Option<String>,
    refresh_threshold_secs: Option<u64>,
    min_refresh_interval_secs: Option<u64>,
    max_refresh_interval_secs: Option<u64>,
    max_refresh_attempts: Option<u32>,
    refresh_timeout_secs: Option<u64>,
}

impl SessionSection {
    fn apply(self, mut config: SessionConfig) -> SessionConfig {
        if let Some(v) = self.storage_key {
            config.storage_key = v;
        }
        if let Some(v) = self.identity_keys {
            config.identity_keys = v;
        }
        if let Some(v) = self.refresh_endpoint {
            config.refresh_endpoint = v;
        }
        if let Some(v) = self.refresh_threshold_secs {
            config.refresh_threshold = Duration::from_secs(v);
        }
        if let Some(v) = self.min_refresh_interval_secs {
            config.min_refresh_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.max_refresh_interval_secs {
            config.max_refresh_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.max_refresh_attempts {
            config.max_refresh_attempts = v;
        }
        if let Some(v) = self.refresh_timeout_secs {
            config.refresh_timeout = Duration::from_secs(v);
        }
        config
    }
}

pub(crate) fn default_base_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".freshtoken"))
        .unwrap_or_else(|| PathBuf::from(".freshtoken"))
}
