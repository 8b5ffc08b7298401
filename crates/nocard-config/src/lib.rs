use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use nocard_core::{AnalyzerRules, LoginPolicy, MonitorOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "NOCARD_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "nocard.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    Env { key: String, value: String },
    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoCardConfig {
    pub monitor: MonitorSection,
    pub analyzer: AnalyzerSection,
    pub login: LoginSection,
    pub storage: StorageSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub retention: usize,
    pub default_device: String,
}

impl Default for MonitorSection {
    fn default() -> Self {
        let options = MonitorOptions::default();
        Self {
            retention: options.retention,
            default_device: options.default_device,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSection {
    pub window_secs: u64,
    pub failed_login_threshold: usize,
    pub payment_flood_threshold: usize,
    pub device_fanout_threshold: usize,
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        let rules = AnalyzerRules::default();
        Self {
            window_secs: rules.window_ms / 1_000,
            failed_login_threshold: rules.failed_login_threshold,
            payment_flood_threshold: rules.payment_flood_threshold,
            device_fanout_threshold: rules.device_fanout_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSection {
    pub max_failed_attempts: u32,
    pub lockout_secs: u64,
}

impl Default for LoginSection {
    fn default() -> Self {
        let policy = LoginPolicy::default();
        Self {
            max_failed_attempts: policy.max_failed_attempts,
            lockout_secs: policy.lockout_ms / 1_000,
        }
    }
}

/// Without a directory the monitor keeps its state in memory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: SocketAddr,
    pub login_limit: u32,
    pub login_window_secs: u64,
    pub payment_limit: u32,
    pub payment_window_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            login_limit: 5,
            login_window_secs: 60,
            payment_limit: 10,
            payment_window_secs: 60,
        }
    }
}

impl ServerSection {
    pub fn login_window(&self) -> Duration {
        Duration::from_secs(self.login_window_secs)
    }

    pub fn payment_window(&self) -> Duration {
        Duration::from_secs(self.payment_window_secs)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl NoCardConfig {
    /// Reads the file named by `NOCARD_CONFIG`, else `nocard.toml` when it
    /// exists, else defaults; then applies `NOCARD_*` overrides and validates.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Overrides fields from `NOCARD_*` variables as resolved by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        override_from(&lookup, "NOCARD_RETENTION", &mut self.monitor.retention)?;
        if let Some(device) = lookup("NOCARD_DEFAULT_DEVICE") {
            self.monitor.default_device = device;
        }
        override_from(&lookup, "NOCARD_WINDOW_SECS", &mut self.analyzer.window_secs)?;
        override_from(
            &lookup,
            "NOCARD_MAX_FAILED_ATTEMPTS",
            &mut self.login.max_failed_attempts,
        )?;
        override_from(&lookup, "NOCARD_LOCKOUT_SECS", &mut self.login.lockout_secs)?;
        if let Some(dir) = lookup("NOCARD_STORAGE_DIR") {
            self.storage.dir = (!dir.trim().is_empty()).then(|| PathBuf::from(dir));
        }
        override_from(&lookup, "NOCARD_BIND", &mut self.server.bind)?;
        override_from(&lookup, "NOCARD_LOGIN_LIMIT", &mut self.server.login_limit)?;
        override_from(&lookup, "NOCARD_PAYMENT_LIMIT", &mut self.server.payment_limit)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.retention == 0 {
            return Err(invalid("monitor.retention must be at least 1"));
        }
        if self.monitor.default_device.trim().is_empty() {
            return Err(invalid("monitor.default_device must not be empty"));
        }
        if self.analyzer.window_secs == 0 {
            return Err(invalid("analyzer.window_secs must be positive"));
        }
        if self.login.max_failed_attempts == 0 || self.login.lockout_secs == 0 {
            return Err(invalid(
                "login.max_failed_attempts and login.lockout_secs must be positive",
            ));
        }
        if self.server.login_limit == 0 || self.server.payment_limit == 0 {
            return Err(invalid("server rate limits must be positive"));
        }
        if self.server.login_window_secs == 0 || self.server.payment_window_secs == 0 {
            return Err(invalid("server rate-limit windows must be positive"));
        }
        Ok(())
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            retention: self.monitor.retention,
            rules: AnalyzerRules {
                window_ms: self.analyzer.window_secs.saturating_mul(1_000),
                failed_login_threshold: self.analyzer.failed_login_threshold,
                payment_flood_threshold: self.analyzer.payment_flood_threshold,
                device_fanout_threshold: self.analyzer.device_fanout_threshold,
            },
            login: LoginPolicy {
                max_failed_attempts: self.login.max_failed_attempts,
                lockout_ms: self.login.lockout_secs.saturating_mul(1_000),
            },
            default_device: self.monitor.default_device.clone(),
        }
    }
}

fn override_from<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(());
    };
    *target = value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value,
    })?;
    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
