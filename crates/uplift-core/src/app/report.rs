//! RunReport - run 終了時の結果

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{RunId, Stage, TargetId, UploadTask};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub done: usize,
    pub failed: usize,
}

/// Outcome of one run.
///
/// The core never restarts a failed run. When `has_fatal_error` is set the
/// caller decides whether to accept the partial result or resubmit
/// [`RunReport::retry_batch`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub target: TargetId,
    pub base_position: u64,
    pub has_fatal_error: bool,
    pub aborted: bool,
    pub counts: StageCounts,
    /// Every task, sorted by `original_index`.
    pub tasks: Vec<UploadTask>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub(crate) fn new(
        run_id: RunId,
        target: TargetId,
        base_position: u64,
        has_fatal_error: bool,
        aborted: bool,
        mut tasks: Vec<UploadTask>,
        started_at: DateTime<Utc>,
    ) -> Self {
        tasks.sort_by_key(UploadTask::original_index);
        let counts = StageCounts {
            done: tasks.iter().filter(|t| t.stage() == Stage::Done).count(),
            failed: tasks.iter().filter(|t| t.stage() == Stage::Failed).count(),
        };
        Self {
            run_id,
            target,
            base_position,
            has_fatal_error,
            aborted,
            counts,
            tasks,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn done(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks.iter().filter(|t| t.stage() == Stage::Done)
    }

    pub fn failed(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks.iter().filter(|t| t.stage() == Stage::Failed)
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed().map(UploadTask::original_index).collect()
    }

    /// `(original_index, position)` of every committed task.
    pub fn positions(&self) -> Vec<(usize, u64)> {
        self.done()
            .filter_map(|t| t.position().map(|p| (t.original_index(), p)))
            .collect()
    }

    pub fn is_complete_success(&self) -> bool {
        !self.has_fatal_error && !self.aborted && self.counts.failed == 0
    }

    /// Fresh `Pending` copies of the failed tasks, keeping their `original_index`
    /// so a resubmission with the same `base_position` lands them where intended.
    pub fn retry_batch(&self) -> Vec<UploadTask> {
        self.failed().map(UploadTask::reset_for_retry).collect()
    }
}
