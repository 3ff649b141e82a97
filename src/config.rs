// src/config.rs

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Server-driven settings the downloader and prefetcher consult on every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Byte budget for the videos directory.
    pub cache_max_bytes: u64,
    /// Cached files older than this are evicted.
    pub cache_ttl_days: u32,
    /// Asset directories whose contents are evicted unconditionally.
    pub invalidate_folders: Vec<String>,
    /// Selects webview prefetch over video prefetch.
    pub webview_enabled: bool,
    pub prefetch_cooldown_minutes: u64,
    pub prefetch_disabled: bool,
    pub publisher_disabled: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: 100 * 1024 * 1024,
            cache_ttl_days: 7,
            invalidate_folders: Vec::new(),
            webview_enabled: true,
            prefetch_cooldown_minutes: 15,
            prefetch_disabled: false,
            publisher_disabled: false,
        }
    }
}

impl SdkConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_ttl_days) * 24 * 60 * 60)
    }

    pub fn prefetch_cooldown(&self) -> Duration {
        Duration::from_secs(self.prefetch_cooldown_minutes.saturating_mul(60))
    }
}

/// Shared, hot-swappable view of the current [`SdkConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<SdkConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The configuration in effect right now. Later updates do not affect the snapshot.
    pub fn snapshot(&self) -> Arc<SdkConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, config: SdkConfig) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    /// Applies `f` to a copy of the current configuration and swaps it in.
    pub fn update(&self, f: impl FnOnce(&mut SdkConfig)) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = SdkConfig::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}
