//! PipelineBuilder - run の組み立てと起動前検証
//!
//! 設定・入力の不備は worker を 1 本も起動する前に `BuildError` で返す（Fail-fast）。

use std::collections::HashSet;
use std::sync::Arc;

use super::committer::position_for;
use super::controller::Pipeline;
use crate::config::PipelineConfig;
use crate::domain::{Stage, TargetId, UploadTask};
use crate::error::BuildError;
use crate::impls::NoopEventSink;
use crate::ports::{EventSink, UploadRemote};

/// Builds a [`Pipeline`].
///
/// # 使用例
/// ```ignore
/// let report = Pipeline::builder()
///     .config(config)
///     .remote(client)
///     .target(TargetId::new("gallery-42"))
///     .base_position(next_free_slot)
///     .tasks(UploadTask::batch(files))
///     .build()?
///     .run()
///     .await?;
/// ```
///
/// # 検証
/// - config が妥当であること（`PipelineConfig::validate`）
/// - remote と target が設定されていること
/// - original_index が重複していないこと
/// - すべてのタスクが Pending であること
/// - `base_position + original_index` が u64 に収まること
pub struct PipelineBuilder {
    config: PipelineConfig,
    remote: Option<Arc<dyn UploadRemote>>,
    sink: Arc<dyn EventSink>,
    target: Option<TargetId>,
    base_position: u64,
    tasks: Vec<UploadTask>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            remote: None,
            sink: Arc::new(NoopEventSink),
            target: None,
            base_position: 0,
            tasks: Vec::new(),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn remote<R: UploadRemote + 'static>(self, remote: R) -> Self {
        self.shared_remote(Arc::new(remote))
    }

    /// Use a remote that the caller keeps a handle to.
    pub fn shared_remote(mut self, remote: Arc<dyn UploadRemote>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn target(mut self, target: TargetId) -> Self {
        self.target = Some(target);
        self
    }

    /// Next free slot of the target collection, captured before the run.
    pub fn base_position(mut self, base_position: u64) -> Self {
        self.base_position = base_position;
        self
    }

    pub fn tasks(mut self, tasks: Vec<UploadTask>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;

        let remote = self.remote.ok_or(BuildError::MissingRemote)?;
        let target = self
            .target
            .filter(|t| !t.as_str().trim().is_empty())
            .ok_or(BuildError::MissingTarget)?;

        let mut seen = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if task.stage() != Stage::Pending {
                return Err(BuildError::NotPending {
                    index: task.original_index(),
                    stage: task.stage(),
                });
            }
            if !seen.insert(task.original_index()) {
                return Err(BuildError::DuplicateIndex(task.original_index()));
            }
            if position_for(self.base_position, task.original_index()).is_none() {
                return Err(BuildError::PositionOverflow {
                    index: task.original_index(),
                    base_position: self.base_position,
                });
            }
        }

        Ok(Pipeline {
            config: self.config,
            target,
            base_position: self.base_position,
            tasks: self.tasks,
            remote,
            sink: self.sink,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;
    use crate::impls::InMemoryRemote;

    fn tasks(n: usize) -> Vec<UploadTask> {
        (0..n)
            .map(|i| UploadTask::new(i, format!("t{i}"), Payload::new(vec![], "image/png")))
            .collect()
    }

    fn base() -> PipelineBuilder {
        PipelineBuilder::new()
            .remote(InMemoryRemote::new())
            .target(TargetId::new("gallery"))
    }

    #[test]
    fn test_build_success() {
        let pipeline = base().base_position(10).tasks(tasks(3)).build();
        assert!(pipeline.is_ok());
    }

    #[test]
    fn test_build_missing_remote() {
        let err = PipelineBuilder::new()
            .target(TargetId::new("gallery"))
            .build()
            .err();
        assert_eq!(err, Some(BuildError::MissingRemote));
    }

    #[test]
    fn test_build_blank_target() {
        let err = PipelineBuilder::new()
            .remote(InMemoryRemote::new())
            .target(TargetId::new("  "))
            .build()
            .err();
        assert_eq!(err, Some(BuildError::MissingTarget));
    }

    #[test]
    fn test_build_duplicate_index() {
        let mut list = tasks(2);
        list.push(UploadTask::new(1, "again", Payload::new(vec![], "image/png")));
        let err = base().tasks(list).build().err();
        assert_eq!(err, Some(BuildError::DuplicateIndex(1)));
    }

    #[test]
    fn test_build_invalid_config() {
        let config = PipelineConfig {
            transfer_workers: 0,
            ..PipelineConfig::default()
        };
        let err = base().config(config).build().err();
        assert_eq!(err, Some(BuildError::ZeroTransferWorkers));
    }

    #[test]
    fn test_build_position_overflow() {
        let err = base().base_position(u64::MAX).tasks(tasks(2)).build().err();
        assert_eq!(
            err,
            Some(BuildError::PositionOverflow {
                index: 1,
                base_position: u64::MAX,
            })
        );
    }

    #[test]
    fn test_build_last_position_fits() {
        let pipeline = base().base_position(u64::MAX).tasks(tasks(1)).build();
        assert!(pipeline.is_ok());
    }

    #[test]
    fn test_build_sparse_indices_are_allowed() {
        let list = vec![
            UploadTask::new(4, "e", Payload::new(vec![], "image/png")),
            UploadTask::new(1, "b", Payload::new(vec![], "image/png")),
        ];
        assert!(base().tasks(list).build().is_ok());
    }
}
