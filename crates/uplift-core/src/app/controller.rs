//! Pipeline controller - キューの配線、worker の起動、完了判定
//!
//! signer 1 本、transfer N 本、committer 1 本を同時に走らせ、全員の終了を待つ。
//! 各 worker は「全タスクが終端に達した」か「abort された」ときにループを抜ける。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::Instrument;

use super::builder::PipelineBuilder;
use super::report::RunReport;
use super::state::{RunPhase, RunState};
use super::{committer, signer, transfer};
use crate::config::PipelineConfig;
use crate::domain::{FailureReason, RunId, TargetId, UploadTask};
use crate::error::PipelineError;
use crate::ports::{EventSink, UploadRemote};

/// A validated, ready-to-start run. Build one with [`Pipeline::builder`].
pub struct Pipeline {
    pub(crate) config: PipelineConfig,
    pub(crate) target: TargetId,
    pub(crate) base_position: u64,
    pub(crate) tasks: Vec<UploadTask>,
    pub(crate) remote: Arc<dyn UploadRemote>,
    pub(crate) sink: Arc<dyn EventSink>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Start all stage workers on the current tokio runtime.
    pub fn spawn(self) -> PipelineHandle {
        let state = Arc::new(RunState::new(
            &self.config,
            self.target,
            self.base_position,
            self.tasks,
            self.remote,
            self.sink,
        ));

        let span = tracing::info_span!(
            "upload_run",
            run_id = %state.run_id,
            target = %state.target,
            tasks = state.total,
        );
        span.in_scope(|| {
            tracing::info!(
                base_position = state.base_position,
                transfer_workers = state.transfer_workers,
                "starting upload run"
            );
        });

        let mut workers = JoinSet::new();
        workers.spawn(signer::run(Arc::clone(&state)).instrument(span.clone()));
        for worker in 0..state.transfer_workers {
            workers.spawn(transfer::run(worker, Arc::clone(&state)).instrument(span.clone()));
        }
        workers.spawn(committer::run(Arc::clone(&state)).instrument(span.clone()));

        PipelineHandle {
            state,
            workers,
            span,
            started_at: Utc::now(),
        }
    }

    /// Run to completion.
    pub async fn run(self) -> Result<RunReport, PipelineError> {
        self.spawn().join().await
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    state: Arc<RunState>,
    workers: JoinSet<()>,
    span: tracing::Span,
    started_at: DateTime<Utc>,
}

impl PipelineHandle {
    pub fn run_id(&self) -> RunId {
        self.state.run_id
    }

    /// Operator stop: every stage stops taking new work; in-flight calls finish.
    pub fn abort(&self) {
        self.span
            .in_scope(|| tracing::warn!("abort requested by operator"));
        self.state.abort();
    }

    pub fn phase(&self) -> RunPhase {
        self.state.phase()
    }

    pub fn has_fatal_error(&self) -> bool {
        self.state.has_fatal_error()
    }

    /// Tasks that reached `Done` or `Failed` so far.
    pub fn terminal_count(&self) -> usize {
        self.state.terminal_count()
    }

    /// Wait for every worker to exit and collect the report.
    ///
    /// If a worker dies, the run is aborted so the others exit too, and the
    /// first join error is returned once all of them have stopped.
    pub async fn join(self) -> Result<RunReport, PipelineError> {
        let state = self.state;
        let mut workers = self.workers;
        let mut worker_error = None;
        while let Some(result) = workers.join_next().await {
            let Err(err) = result else { continue };
            self.span.in_scope(|| {
                tracing::error!(error = %err, "stage worker died; aborting run");
            });
            state.abort();
            if worker_error.is_none() {
                worker_error = Some(PipelineError::WorkerJoin(err.to_string()));
            }
        }

        // abort 後にキューに残ったタスクも終端にする
        let mut leftovers = state.sign_queue.drain().await;
        leftovers.extend(state.transfer_queue.drain().await);
        leftovers.extend(state.commit_queue.drain().await);
        for task in leftovers {
            state.fail_task(task, FailureReason::Aborted).await;
        }
        if let Some(err) = worker_error {
            return Err(err);
        }

        let report = RunReport::new(
            state.run_id,
            state.target.clone(),
            state.base_position,
            state.has_fatal_error(),
            state.phase() == RunPhase::Aborted,
            state.take_finished().await,
            self.started_at,
        );

        self.span.in_scope(|| {
            tracing::info!(
                done = report.counts.done,
                failed = report.counts.failed,
                has_fatal_error = report.has_fatal_error,
                aborted = report.aborted,
                "upload run finished"
            );
        });
        Ok(report)
    }
}
