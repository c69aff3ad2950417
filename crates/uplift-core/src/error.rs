use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::Stage;

/// Failure reported by one of the remote operations (sign / transfer / commit).
///
/// `Network` と `Timeout` は HTTP status を持たない。分類上は retriable になる。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network failure: {0}")]
    Network(String),

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// HTTP status of the failure, `None` for network errors and timeouts.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(_) | Self::Timeout(_) => None,
        }
    }
}

/// Wiring defects inside the pipeline itself (not service failures).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("task #{index} reached {stage} without a credential")]
    MissingCredential { index: usize, stage: Stage },

    #[error("task #{index} cannot move from {from} to {to}")]
    InvalidTransition { index: usize, from: Stage, to: Stage },

    #[error("task #{index} has no position after base {base_position}")]
    PositionOverflow { index: usize, base_position: u64 },

    #[error("stage worker did not finish cleanly: {0}")]
    WorkerJoin(String),
}

/// Rejected before any worker is started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("transfer_workers must be at least 1")]
    ZeroTransferWorkers,

    #[error("call_timeout_ms must be greater than 0")]
    ZeroCallTimeout,

    #[error("idle_poll_ms must be greater than 0")]
    ZeroIdlePoll,

    #[error("retry delays are invalid: initial={initial_ms}ms max={max_ms}ms")]
    InvalidBackoff { initial_ms: u64, max_ms: u64 },

    #[error("no remote client was configured")]
    MissingRemote,

    #[error("target id is missing or empty")]
    MissingTarget,

    #[error("original_index {0} appears more than once")]
    DuplicateIndex(usize),

    #[error("task #{index} is {stage}, only pending tasks can be submitted")]
    NotPending { index: usize, stage: Stage },

    #[error("base_position {base_position} + original_index {index} does not fit in u64")]
    PositionOverflow { index: usize, base_position: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_is_absent_for_network_and_timeout() {
        assert_eq!(RemoteError::status(503, "busy").http_status(), Some(503));
        assert_eq!(RemoteError::network("reset").http_status(), None);
        assert_eq!(
            RemoteError::Timeout(Duration::from_secs(1)).http_status(),
            None
        );
    }

    #[test]
    fn contract_errors_name_the_task() {
        let err = PipelineError::MissingCredential {
            index: 3,
            stage: Stage::Transferring,
        };
        assert_eq!(
            err.to_string(),
            "task #3 reached transferring without a credential"
        );
    }
}
