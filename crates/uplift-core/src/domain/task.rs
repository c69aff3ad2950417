//! Upload task: one asset's progress through sign → transfer → commit.
//!
//! # 状態遷移
//! - Pending -> Signing -> Transferring -> Committing -> Done
//! - Failed はどの非終端状態からも到達できる（一方通行）
//!
//! Mutation is `pub(crate)`: only the stage worker that currently owns the
//! task (by having popped it from its queue) changes it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Signing,
    Transferring,
    Committing,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    fn can_advance_to(self, next: Stage) -> bool {
        match (self, next) {
            (from, Stage::Failed) => !from.is_terminal(),
            (Stage::Pending, Stage::Signing)
            | (Stage::Signing, Stage::Transferring)
            | (Stage::Transferring, Stage::Committing)
            | (Stage::Committing, Stage::Done) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Signing => "signing",
            Stage::Transferring => "transferring",
            Stage::Committing => "committing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary content plus its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    media_type: String,
}

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Opaque upload credential returned by `sign`.
///
/// Debug output is redacted so credentials never end up in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Identifier of the target collection the batch is uploaded into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Non-retriable response from a remote operation.
    Remote {
        stage: Stage,
        status: Option<u16>,
        message: String,
    },

    /// Pipeline wiring defect (e.g. missing credential).
    Contract { message: String },

    /// The run was aborted before this task could finish.
    Aborted,
}

impl FailureReason {
    /// Aborted tasks were not at fault; everything else latches the fatal flag.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FailureReason::Aborted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    name: String,

    #[serde(skip)]
    payload: Payload,

    original_index: usize,

    stage: Stage,

    #[serde(skip)]
    credential: Option<Credential>,

    #[serde(skip)]
    retry_delay: Option<Duration>,

    last_http_status: Option<u16>,

    /// Remote calls made for this task across all stages.
    attempts: u32,

    /// Position assigned at commit (`base_position + original_index`).
    position: Option<u64>,

    failure: Option<FailureReason>,
}

impl UploadTask {
    pub fn new(original_index: usize, name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
            original_index,
            stage: Stage::Pending,
            credential: None,
            retry_delay: None,
            last_http_status: None,
            attempts: 0,
            position: None,
            failure: None,
        }
    }

    /// Build a batch where each task's `original_index` is its position in `items`.
    pub fn batch<N, I>(items: I) -> Vec<UploadTask>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Payload)>,
    {
        items
            .into_iter()
            .enumerate()
            .map(|(index, (name, payload))| UploadTask::new(index, name, payload))
            .collect()
    }

    /// A fresh `Pending` copy keeping name, payload and `original_index`.
    pub fn reset_for_retry(&self) -> UploadTask {
        UploadTask::new(self.original_index, self.name.clone(), self.payload.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn original_index(&self) -> usize {
        self.original_index
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay
    }

    pub fn last_http_status(&self) -> Option<u16> {
        self.last_http_status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    pub(crate) fn advance(&mut self, next: Stage) -> Result<(), PipelineError> {
        if !self.stage.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                index: self.original_index,
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: FailureReason) -> Result<(), PipelineError> {
        self.advance(Stage::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }

    pub(crate) fn mark_committed(&mut self, position: u64) -> Result<(), PipelineError> {
        self.advance(Stage::Done)?;
        self.position = Some(position);
        Ok(())
    }

    pub(crate) fn set_credential(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Network errors and timeouts carry no status; keep the last real one.
    pub(crate) fn record_status(&mut self, status: Option<u16>) {
        if status.is_some() {
            self.last_http_status = status;
        }
    }

    /// Compute, store and return the delay before the next retry of this task.
    pub(crate) fn next_backoff(&mut self, policy: &RetryPolicy) -> Duration {
        let delay = policy.next_delay(self.retry_delay);
        self.retry_delay = Some(delay);
        delay
    }

    pub(crate) fn clear_backoff(&mut self) {
        self.retry_delay = None;
    }
}
