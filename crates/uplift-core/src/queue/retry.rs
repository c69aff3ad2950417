//! Retry policy: classifies failures and decides backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Retriable,
    Fatal,
}

/// Retry policy for failed remote calls.
///
/// There is no attempt cap: a task retries until it succeeds or hits a
/// fatal classification. The delay lives on the task, so concurrent tasks
/// back off independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for the doubled delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// 408 / 429 / 5xx と status なし（network, timeout）は retriable、それ以外は fatal。
    pub fn classify(&self, status: Option<u16>) -> Classification {
        match status {
            None => Classification::Retriable,
            Some(408) | Some(429) => Classification::Retriable,
            Some(s) if s >= 500 => Classification::Retriable,
            Some(_) => Classification::Fatal,
        }
    }

    pub fn classify_error(&self, err: &RemoteError) -> Classification {
        self.classify(err.http_status())
    }

    /// Delay for the next retry given the delay used for the previous one.
    ///
    /// `None` means this is the first retry of the current stage.
    pub fn next_delay(&self, previous: Option<Duration>) -> Duration {
        match previous {
            None => self.initial_delay.min(self.max_delay),
            Some(d) => d.saturating_mul(2).min(self.max_delay),
        }
    }

    /// Closed form of the n-th (1-indexed) retry delay:
    /// `min(initial_delay * 2^(n-1), max_delay)`.
    pub fn delay_for_retry(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(60))
    }
}
