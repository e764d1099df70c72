use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{ConfigWatcher, DEFAULT_CONFIG_PATH, WardenConfig};
use crate::enforcement::Warden;
use crate::{ENFORCEMENT_TARGET, Error};

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "WARDEN_CONFIG";

/// Shared bot state handed to every command and event
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

pub struct DataInner {
    pub warden: Warden,
    pub config_path: PathBuf,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config_path", &self.config_path)
            .field("identifiers", &self.warden.index().identifier_count())
            .field("patterns", &self.warden.index().pattern_count())
            .field("pending_rechecks", &self.warden.rechecks().len())
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(warden: Warden, config_path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(DataInner {
            warden,
            config_path: config_path.into(),
        }))
    }

    /// Config path from the environment, or the default location
    #[must_use]
    pub fn config_path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_VAR).map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Load the config file; a missing file yields defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is invalid.
    pub async fn load_config(path: &Path) -> Result<WardenConfig, Error> {
        let config = WardenConfig::load(path).await?;
        info!(
            target: ENFORCEMENT_TARGET,
            path = %path.display(),
            identifiers = config.blacklist.len(),
            patterns = config.nickname_blacklist.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Poll the config file and apply it to the warden whenever it changes
    #[must_use]
    pub fn spawn_config_reload(&self) -> JoinHandle<()> {
        let data = self.clone();
        tokio::spawn(async move {
            let mut watcher = ConfigWatcher::new(&data.config_path);
            // The first poll only records the file as loaded at startup
            if let Err(e) = watcher.poll().await {
                error!(target: ENFORCEMENT_TARGET, error = %e, "Config file unreadable");
            }
            loop {
                tokio::time::sleep(data.warden.config().reload_interval()).await;
                data.poll_config(&mut watcher).await;
            }
        })
    }

    async fn poll_config(&self, watcher: &mut ConfigWatcher) {
        match watcher.poll().await {
            Ok(Some(config)) => {
                info!(
                    target: ENFORCEMENT_TARGET,
                    path = %watcher.path().display(),
                    identifiers = config.blacklist.len(),
                    patterns = config.nickname_blacklist.len(),
                    "Config file changed, reloading"
                );
                self.warden.reload_config(config);
            }
            Ok(None) => {}
            Err(e) => {
                error!(target: ENFORCEMENT_TARGET, error = %e, "Config reload failed, keeping current config");
            }
        }
    }
}
