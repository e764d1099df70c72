//! Bot configuration
//!
//! The configuration lives in a YAML file. Every field has a default, so a
//! missing file or a partial file is fine. The file is polled and re-applied
//! only when its contents change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::enforcement::{NicknamePattern, PipelineSettings, ScanSettings};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "data/warden.yaml";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Everything the warden can be told
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Exact user identifiers to remove on sight
    pub blacklist: Vec<String>,
    /// Nickname patterns, checked in order
    pub nickname_blacklist: Vec<NicknamePattern>,

    /// Scan a guild when the bot becomes available in it
    pub enable_join_scan: bool,
    /// Check members as they join
    pub enable_member_join: bool,
    /// Recheck names some time after join
    pub enable_delayed_check: bool,
    pub enable_stats: bool,
    pub skip_bots: bool,
    /// Confirm the member is gone after each removal call
    pub verify_kick: bool,
    /// Announce removals before they happen
    pub notify_admin: bool,

    /// Pause between scan batches
    pub scan_delay_ms: u64,
    pub batch_size: usize,
    pub max_concurrent: usize,
    /// Pause after each group of removals inside a batch
    pub kick_delay_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub verify_delay_ms: u64,
    pub verify_timeout_ms: u64,
    pub delayed_check_ms: u64,
    pub reload_interval_secs: u64,

    /// Channel for notifications on automatic (join and join-scan) removals
    pub notify_channel_id: Option<u64>,

    /// Placeholders: `{user}`, `{id}`, `{reason}`
    pub notify_template: String,
    /// Placeholders: `{user}`, `{id}`, `{reason}`, `{error}`
    pub kick_fail_template: String,
    /// Audit log reason for the removal call
    pub kick_reason_template: String,
}

impl Default for WardenConfig {
    fn default() -> Self {
        let pipeline = PipelineSettings::default();
        Self {
            blacklist: Vec::new(),
            nickname_blacklist: Vec::new(),
            enable_join_scan: true,
            enable_member_join: true,
            enable_delayed_check: true,
            enable_stats: true,
            skip_bots: true,
            verify_kick: true,
            notify_admin: false,
            scan_delay_ms: 3000,
            batch_size: 50,
            max_concurrent: 3,
            kick_delay_ms: 1000,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            verify_delay_ms: 1500,
            verify_timeout_ms: 5000,
            delayed_check_ms: 60_000,
            reload_interval_secs: 30,
            notify_channel_id: None,
            notify_template: pipeline.notify_template,
            kick_fail_template: pipeline.kick_fail_template,
            kick_reason_template: pipeline.kick_reason_template,
        }
    }
}

impl WardenConfig {
    /// Parse and validate YAML text
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a tunable is out of range.
    pub fn from_yaml(path: &str, text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file, or defaults if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_yaml(&path.display().to_string(), &text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Check ranges that would otherwise stall the pipeline
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation("batch_size must be at least 1".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::Validation("max_concurrent must be at least 1".to_string()));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Validation("retry_attempts must be at least 1".to_string()));
        }
        if self.reload_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "reload_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            notify_admin: self.notify_admin,
            verify_kick: self.verify_kick,
            retry_attempts: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            verify_delay: Duration::from_millis(self.verify_delay_ms),
            verify_timeout: Duration::from_millis(self.verify_timeout_ms),
            notify_template: self.notify_template.clone(),
            kick_fail_template: self.kick_fail_template.clone(),
            kick_reason_template: self.kick_reason_template.clone(),
        }
    }

    #[must_use]
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            skip_bots: self.skip_bots,
            batch_size: self.batch_size,
            kick_delay: Duration::from_millis(self.kick_delay_ms),
            scan_delay: Duration::from_millis(self.scan_delay_ms),
            enable_stats: self.enable_stats,
        }
    }

    #[must_use]
    pub const fn delayed_check(&self) -> Duration {
        Duration::from_millis(self.delayed_check_ms)
    }

    #[must_use]
    pub const fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

/// Polls the config file and reports a new config only when it changed
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_text: Option<String>,
}

impl ConfigWatcher {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_text: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; `Ok(None)` when it is missing or unchanged since the last poll
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the new contents are invalid.
    /// The new contents are remembered either way, so a broken file is
    /// reported once rather than on every poll.
    pub async fn poll(&mut self) -> Result<Option<WardenConfig>, ConfigError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };

        if self.last_text.as_deref() == Some(text.as_str()) {
            return Ok(None);
        }
        self.last_text = Some(text.clone());
        WardenConfig::from_yaml(&self.path.display().to_string(), &text).map(Some)
    }
}
