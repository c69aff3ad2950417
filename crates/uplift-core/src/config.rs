//! Pipeline configuration.
//!
//! JSON で読み込み、`UPLIFT_*` 環境変数で上書きする。検証は builder が `validate()` で行う。

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, ConfigError};
use crate::queue::RetryPolicy;

/// What a fatal task failure does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalPolicy {
    /// Fail only that task; everything else keeps going.
    #[default]
    Isolate,

    /// Stop every stage (signer included) from taking new work.
    Abort,
}

impl FromStr for FatalPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(FatalPolicy::Isolate),
            "abort" => Ok(FatalPolicy::Abort),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Size of the transfer worker pool.
    pub transfer_workers: usize,

    /// Timeout for every remote call. A timeout is retried like a network error.
    pub call_timeout_ms: u64,

    /// How long an idle worker waits before polling its queue again.
    pub idle_poll_ms: u64,

    pub retry: RetryConfig,

    pub on_fatal: FatalPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transfer_workers: 4,
            call_timeout_ms: 30_000,
            idle_poll_ms: 50,
            retry: RetryConfig::default(),
            on_fatal: FatalPolicy::Isolate,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply `UPLIFT_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment, in production).
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&lookup, "UPLIFT_TRANSFER_WORKERS")? {
            self.transfer_workers = v;
        }
        if let Some(v) = parsed(&lookup, "UPLIFT_CALL_TIMEOUT_MS")? {
            self.call_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "UPLIFT_IDLE_POLL_MS")? {
            self.idle_poll_ms = v;
        }
        if let Some(v) = parsed(&lookup, "UPLIFT_RETRY_INITIAL_MS")? {
            self.retry.initial_delay_ms = v;
        }
        if let Some(v) = parsed(&lookup, "UPLIFT_RETRY_MAX_MS")? {
            self.retry.max_delay_ms = v;
        }
        if let Some(raw) = lookup("UPLIFT_ON_FATAL") {
            self.on_fatal = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "UPLIFT_ON_FATAL".to_string(),
                value: raw.clone(),
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.transfer_workers == 0 {
            return Err(BuildError::ZeroTransferWorkers);
        }
        if self.call_timeout_ms == 0 {
            return Err(BuildError::ZeroCallTimeout);
        }
        if self.idle_poll_ms == 0 {
            return Err(BuildError::ZeroIdlePoll);
        }
        if self.retry.initial_delay_ms == 0 || self.retry.initial_delay_ms > self.retry.max_delay_ms
        {
            return Err(BuildError::InvalidBackoff {
                initial_ms: self.retry.initial_delay_ms,
                max_ms: self.retry.max_delay_ms,
            });
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
    }
}
