//! Tunables for the sync layer.

use std::time::Duration;

use crate::error::{Result, SyncError};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_PRIORITY_COUNT: usize = 3;
pub const DEFAULT_TRAILING_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Records revealed per pagination step
    pub page_size: usize,
    /// Entities fetched immediately and in parallel by the batch loader
    pub priority_count: usize,
    /// Spacing between trailing-tier fetches
    pub trailing_interval: Duration,
    /// Artificial latency added by the in-process backend
    pub backend_latency: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            priority_count: DEFAULT_PRIORITY_COUNT,
            trailing_interval: Duration::from_millis(DEFAULT_TRAILING_INTERVAL_MS),
            backend_latency: Duration::ZERO,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `ROLLSYNC_*` environment variables. Unparseable
    /// values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_number("ROLLSYNC_PAGE_SIZE") {
            cfg.page_size = v as usize;
        }
        if let Some(v) = env_number("ROLLSYNC_PRIORITY_COUNT") {
            cfg.priority_count = v as usize;
        }
        if let Some(v) = env_number("ROLLSYNC_TRAILING_INTERVAL_MS") {
            cfg.trailing_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_number("ROLLSYNC_BACKEND_LATENCY_MS") {
            cfg.backend_latency = Duration::from_millis(v);
        }
        cfg
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_priority_count(mut self, priority_count: usize) -> Self {
        self.priority_count = priority_count;
        self
    }

    pub fn with_trailing_interval(mut self, interval: Duration) -> Self {
        self.trailing_interval = interval;
        self
    }

    pub fn with_backend_latency(mut self, latency: Duration) -> Self {
        self.backend_latency = latency;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a non-negative integer", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.priority_count, 3);
        assert_eq!(cfg.trailing_interval, Duration::from_millis(250));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let cfg = SyncConfig::default().with_page_size(0);
        assert!(matches!(cfg.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn env_overrides_apply_and_garbage_is_ignored() {
        std::env::set_var("ROLLSYNC_PRIORITY_COUNT", "5");
        std::env::set_var("ROLLSYNC_TRAILING_INTERVAL_MS", "soon");
        let cfg = SyncConfig::from_env();
        std::env::remove_var("ROLLSYNC_PRIORITY_COUNT");
        std::env::remove_var("ROLLSYNC_TRAILING_INTERVAL_MS");
        assert_eq!(cfg.priority_count, 5);
        assert_eq!(
            cfg.trailing_interval,
            Duration::from_millis(DEFAULT_TRAILING_INTERVAL_MS)
        );
    }
}
