//! RunState - 1 回の run で worker 間に共有される状態
//!
//! 共有されるのは 3 つのキュー、終端カウンタ、fatal フラグ、run phase だけ。
//! タスク自体はキュー経由で move されるので、同時に 2 つの worker が触ることはない。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use crate::config::{FatalPolicy, PipelineConfig};
use crate::domain::{FailureReason, RunId, Stage, StageEvent, TargetId, UploadTask};
use crate::error::PipelineError;
use crate::ports::{EventSink, UploadRemote};
use crate::queue::{RetryPolicy, StageQueue};

/// Lifecycle of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Running,
    /// Every task reached `Done` or `Failed`.
    Finished,
    /// Fatal abort or operator stop; no worker takes new work.
    Aborted,
}

pub(crate) struct RunState {
    pub run_id: RunId,
    pub target: TargetId,
    pub base_position: u64,
    pub total: usize,

    pub sign_queue: StageQueue,
    pub transfer_queue: StageQueue,
    pub commit_queue: StageQueue,

    pub remote: Arc<dyn UploadRemote>,
    pub sink: Arc<dyn EventSink>,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub idle_poll: Duration,
    pub transfer_workers: usize,
    on_fatal: FatalPolicy,

    terminal: AtomicUsize,
    fatal: AtomicBool,
    phase_tx: watch::Sender<RunPhase>,
    finished: Mutex<Vec<UploadTask>>,
}

impl RunState {
    pub fn new(
        config: &PipelineConfig,
        target: TargetId,
        base_position: u64,
        tasks: Vec<UploadTask>,
        remote: Arc<dyn UploadRemote>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let total = tasks.len();
        let initial = if total == 0 {
            RunPhase::Finished
        } else {
            RunPhase::Running
        };
        let (phase_tx, _) = watch::channel(initial);

        Self {
            run_id: RunId::generate(),
            target,
            base_position,
            total,
            sign_queue: StageQueue::with_tasks(tasks),
            transfer_queue: StageQueue::new(),
            commit_queue: StageQueue::new(),
            remote,
            sink,
            retry: config.retry_policy(),
            call_timeout: config.call_timeout(),
            idle_poll: config.idle_poll(),
            transfer_workers: config.transfer_workers,
            on_fatal: config.on_fatal,
            terminal: AtomicUsize::new(0),
            fatal: AtomicBool::new(false),
            phase_tx,
            finished: Mutex::new(Vec::with_capacity(total)),
        }
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase_tx.subscribe()
    }

    /// Checked at the top of every worker loop.
    pub fn should_stop(&self) -> bool {
        self.phase() != RunPhase::Running
    }

    pub fn has_fatal_error(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Stop all stages from taking new work. No-op once the run has ended.
    pub fn abort(&self) {
        self.phase_tx.send_if_modified(|phase| {
            if *phase == RunPhase::Running {
                *phase = RunPhase::Aborted;
                true
            } else {
                false
            }
        });
    }

    pub fn emit(&self, task: &UploadTask) {
        self.sink.emit(StageEvent::transition(task));
    }

    /// Move the task into `next` and queue it for the stage that owns it.
    pub async fn hand_off(&self, mut task: UploadTask, next: Stage, queue: &StageQueue) {
        match task.advance(next) {
            Ok(()) => {
                self.emit(&task);
                queue.push(task).await;
            }
            Err(err) => self.fail_contract(task, err).await,
        }
    }

    pub async fn fail_task(&self, mut task: UploadTask, reason: FailureReason) {
        let fatal = reason.is_fatal();
        if let Err(err) = task.fail(reason) {
            // 既に終端のタスクがもう一度ここに来るのは配線ミス
            tracing::error!(
                index = task.original_index(),
                error = %err,
                "pipeline contract violated"
            );
        }
        if fatal {
            self.latch_fatal();
        }
        self.finish(task).await;
    }

    pub async fn fail_contract(&self, task: UploadTask, err: PipelineError) {
        tracing::error!(
            index = task.original_index(),
            name = task.name(),
            error = %err,
            "pipeline contract violated"
        );
        self.fail_task(
            task,
            FailureReason::Contract {
                message: err.to_string(),
            },
        )
        .await;
    }

    /// Record a task that reached `Done` or `Failed`.
    pub async fn finish(&self, task: UploadTask) {
        self.emit(&task);
        self.finished.lock().await.push(task);

        let terminal = self.terminal.fetch_add(1, Ordering::SeqCst) + 1;
        if terminal >= self.total {
            self.phase_tx.send_if_modified(|phase| {
                if *phase == RunPhase::Running {
                    *phase = RunPhase::Finished;
                    true
                } else {
                    false
                }
            });
        }
    }

    pub async fn take_finished(&self) -> Vec<UploadTask> {
        std::mem::take(&mut *self.finished.lock().await)
    }

    /// Park an idle worker until its queue gets a push, the phase changes,
    /// or `idle_poll` elapses.
    pub async fn idle(&self, queue: &StageQueue, phase_rx: &mut watch::Receiver<RunPhase>) {
        tokio::select! {
            _ = queue.notified() => {}
            _ = phase_rx.changed() => {}
            _ = tokio::time::sleep(self.idle_poll) => {}
        }
    }

    fn latch_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
        if self.on_fatal == FatalPolicy::Abort {
            tracing::warn!("fatal failure with on_fatal=abort; stopping all stages");
            self.abort();
        }
    }
}

/// Resolves once the run is aborted; never resolves otherwise.
pub(crate) async fn aborted(phase_rx: &mut watch::Receiver<RunPhase>) {
    loop {
        if *phase_rx.borrow_and_update() == RunPhase::Aborted {
            return;
        }
        if phase_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
