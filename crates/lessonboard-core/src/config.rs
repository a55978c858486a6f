//! Board configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides. Endpoints can also come from `LESSONBOARD_*` variables.

use crate::conflict::ConflictStrategy;
use crate::operation::CANVAS_EXTENT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the realtime endpoint.
pub const ENV_REALTIME_URL: &str = "LESSONBOARD_REALTIME_URL";
/// Environment variable overriding the REST base URL.
pub const ENV_STATE_URL: &str = "LESSONBOARD_STATE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BoardConfig {
    /// WebSocket endpoint; the lesson id is appended as a path segment.
    pub realtime_url: String,
    /// REST base; state is fetched from `{state_url}/board/state/{lesson}`.
    pub state_url: String,
    pub flush_interval_ms: u64,
    pub max_batch_size: usize,
    /// Failed sends of one batch before it is discarded.
    pub max_send_retries: u32,
    pub dirty_region_ceiling: usize,
    pub cull_margin: f64,
    pub gap_tolerance: u64,
    pub canvas_extent: f64,
    pub conflict_strategy: ConflictStrategy,
    pub conflict_window_ms: u64,
    pub merge_offset: f64,
    pub reconnect: ReconnectConfig,
    /// State polling cadence once the realtime channel has given up.
    pub fallback_poll_ms: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            realtime_url: "ws://localhost:3030/ws".to_string(),
            state_url: "http://localhost:3030".to_string(),
            flush_interval_ms: 16,
            max_batch_size: 50,
            max_send_retries: 3,
            dirty_region_ceiling: 50,
            cull_margin: 100.0,
            gap_tolerance: 3,
            canvas_extent: CANVAS_EXTENT,
            conflict_strategy: ConflictStrategy::default(),
            conflict_window_ms: 1_000,
            merge_offset: 3.0,
            reconnect: ReconnectConfig::default(),
            fallback_poll_ms: 10_000,
        }
    }
}

impl BoardConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Override endpoints from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_REALTIME_URL) {
            self.realtime_url = url;
        }
        if let Ok(url) = std::env::var(ENV_STATE_URL) {
            self.state_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.flush_interval_ms == 0 {
            return invalid("flushIntervalMs", "must be positive");
        }
        if self.max_batch_size == 0 {
            return invalid("maxBatchSize", "must be positive");
        }
        if self.dirty_region_ceiling == 0 {
            return invalid("dirtyRegionCeiling", "must be positive");
        }
        if !(self.canvas_extent.is_finite() && self.canvas_extent > 0.0) {
            return invalid("canvasExtent", "must be a positive number");
        }
        if !(self.cull_margin.is_finite() && self.cull_margin >= 0.0) {
            return invalid("cullMargin", "must be non-negative");
        }
        if !(self.merge_offset.is_finite() && self.merge_offset >= 0.0) {
            return invalid("mergeOffset", "must be non-negative");
        }
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return invalid("reconnect", "need 0 < baseDelayMs <= maxDelayMs");
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BoardConfig::default();
        assert_eq!(config.flush_interval_ms, 16);
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.dirty_region_ceiling, 50);
        assert_eq!(config.conflict_strategy, ConflictStrategy::IntelligentMerge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BoardConfig::from_json(r#"{"maxBatchSize": 10, "conflictStrategy": "last-writer-wins"}"#).unwrap();
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.conflict_strategy, ConflictStrategy::LastWriterWins);
        assert_eq!(config.flush_interval_ms, 16);
    }

    #[test]
    fn test_invalid_rejected() {
        let err = BoardConfig::from_json(r#"{"maxBatchSize": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "maxBatchSize", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"gapTolerance": 7, "reconnect": {{"maxAttempts": 2}}}}"#).unwrap();
        let config = BoardConfig::load(file.path()).unwrap();
        assert_eq!(config.gap_tolerance, 7);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
    }
}
