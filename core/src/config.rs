use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const MINUTE_MS: i64 = 60 * 1000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;

/// Exponential backoff bounds shared by the unwanted-retry queue and the
/// periodic wanted re-check of linked messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub min_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 10 * MINUTE_MS,
            max_delay_ms: 24 * HOUR_MS,
        }
    }
}

impl RetrySettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.min_delay_ms <= 0 {
            return Err(CoreError::Config("min_delay_ms must be positive".to_string()));
        }
        if self.max_delay_ms < self.min_delay_ms {
            return Err(CoreError::Config(
                "max_delay_ms must not be below min_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// First delay for a freshly scheduled record, uniform in `[min, 4 * min)`.
    pub fn initial_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        let min = self.min_delay_ms.max(1);
        rng.gen_range(min..min.saturating_mul(4))
    }

    /// Delay after the `retry_count`-th failed attempt: `min(min * 2^k, max)`.
    pub fn backoff_delay(&self, retry_count: u32) -> i64 {
        let pow = retry_count.min(40);
        let factor = 1i64.checked_shl(pow).unwrap_or(i64::MAX);
        self.min_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub store_path: PathBuf,
    pub unwanted_retry: RetrySettings,
    pub wanted_check: RetrySettings,
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("board-sync.sqlite"),
            unwanted_retry: RetrySettings::default(),
            wanted_check: RetrySettings::default(),
            diagnostics_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let config: ClientConfig =
            serde_json::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("read {} failed: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(CoreError::Config("store_path is empty".to_string()));
        }
        self.unwanted_retry.validate()?;
        self.wanted_check.validate()
    }
}
