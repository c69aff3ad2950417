//! UploadRemote port - 外部サービスへの 3 つのリモート操作
//!
//! URL、認証、payload のエンコードはこの trait の実装側の責務。
//! パイプラインは結果（成功 / `RemoteError`）だけを見て retry か fatal かを決める。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Credential, Payload, StageEvent, TargetId, UploadTask};
use crate::error::RemoteError;
use crate::ports::EventSink;

/// Client for the service that receives the uploads.
///
/// Each call is wrapped in the pipeline's per-call timeout; implementations
/// do not need their own.
#[async_trait]
pub trait UploadRemote: Send + Sync {
    /// Obtain upload credentials for `task` in `target`.
    async fn sign(&self, task: &UploadTask, target: &TargetId) -> Result<Credential, RemoteError>;

    /// Move the payload to the signed destination.
    async fn transfer(
        &self,
        credential: &Credential,
        payload: &Payload,
        progress: &TransferProgress,
    ) -> Result<(), RemoteError>;

    /// Finalize the task at `position` in the target collection.
    async fn commit(
        &self,
        task: &UploadTask,
        credential: &Credential,
        position: u64,
    ) -> Result<(), RemoteError>;
}

/// Progress callback handed to `transfer`.
pub struct TransferProgress {
    original_index: usize,
    name: String,
    sink: Arc<dyn EventSink>,
}

impl TransferProgress {
    pub fn new(task: &UploadTask, sink: Arc<dyn EventSink>) -> Self {
        Self {
            original_index: task.original_index(),
            name: task.name().to_string(),
            sink,
        }
    }

    /// Report the transferred fraction; values outside `0.0..=1.0` are clamped.
    pub fn report(&self, fraction: f32) {
        self.sink
            .emit(StageEvent::progress(self.original_index, &self.name, fraction));
    }
}
