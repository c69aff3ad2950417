//! Drives one remote call of one task to success or a terminal failure.
//!
//! # フロー
//! 1. timeout 付きでリモート操作を呼ぶ（timeout は network error と同じ扱い）
//! 2. 成功: backoff をリセットして戻る
//! 3. retriable: タスク自身の backoff を倍にして待ち、同じタスクをやり直す（キューには戻さない）
//! 4. fatal / 配線ミス: `FailureReason` を返す。呼び出し側がタスクを Failed にする

use tokio::sync::watch;

use super::state::{RunPhase, RunState, aborted};
use crate::domain::{FailureReason, Stage, StageEvent, UploadTask};
use crate::error::{PipelineError, RemoteError};
use crate::ports::TransferProgress;
use crate::queue::Classification;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Call {
    Sign,
    Transfer,
    Commit { position: u64 },
}

impl Call {
    fn stage(self) -> Stage {
        match self {
            Call::Sign => Stage::Signing,
            Call::Transfer => Stage::Transferring,
            Call::Commit { .. } => Stage::Committing,
        }
    }
}

enum CallError {
    Remote(RemoteError),
    Contract(PipelineError),
}

impl From<RemoteError> for CallError {
    fn from(err: RemoteError) -> Self {
        CallError::Remote(err)
    }
}

/// Retry `call` for `task` until it succeeds, fails fatally, or the run is aborted
/// while waiting out a backoff.
///
/// On success after `Call::Sign` the credential is stored on the task.
pub(crate) async fn drive(
    state: &RunState,
    task: &mut UploadTask,
    call: Call,
    phase_rx: &mut watch::Receiver<RunPhase>,
) -> Result<(), FailureReason> {
    let stage = call.stage();
    loop {
        task.record_attempt();
        let result = tokio::time::timeout(state.call_timeout, invoke(state, task, call))
            .await
            .unwrap_or(Err(CallError::Remote(RemoteError::Timeout(state.call_timeout))));

        let err = match result {
            Ok(()) => {
                task.clear_backoff();
                tracing::debug!(
                    index = task.original_index(),
                    %stage,
                    attempts = task.attempts(),
                    "remote call succeeded"
                );
                return Ok(());
            }
            Err(CallError::Contract(err)) => {
                tracing::error!(
                    index = task.original_index(),
                    name = task.name(),
                    %stage,
                    error = %err,
                    "pipeline contract violated"
                );
                return Err(FailureReason::Contract {
                    message: err.to_string(),
                });
            }
            Err(CallError::Remote(err)) => err,
        };

        let status = err.http_status();
        task.record_status(status);

        if state.retry.classify_error(&err) == Classification::Fatal {
            tracing::error!(
                index = task.original_index(),
                name = task.name(),
                %stage,
                status,
                error = %err,
                "fatal remote failure"
            );
            return Err(FailureReason::Remote {
                stage,
                status,
                message: err.to_string(),
            });
        }

        let delay = task.next_backoff(&state.retry);
        tracing::warn!(
            index = task.original_index(),
            name = task.name(),
            %stage,
            status,
            error = %err,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retriable remote failure, backing off"
        );
        state.sink.emit(StageEvent::retrying(task, delay));

        // backoff 中に abort されたら、このタスクは諦める
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = aborted(phase_rx) => return Err(FailureReason::Aborted),
        }
    }
}

async fn invoke(state: &RunState, task: &mut UploadTask, call: Call) -> Result<(), CallError> {
    match call {
        Call::Sign => {
            let credential = state.remote.sign(task, &state.target).await?;
            task.set_credential(credential);
            Ok(())
        }
        Call::Transfer => {
            let credential = task.credential().ok_or(CallError::Contract(
                PipelineError::MissingCredential {
                    index: task.original_index(),
                    stage: Stage::Transferring,
                },
            ))?;
            let progress = TransferProgress::new(task, state.sink.clone());
            state
                .remote
                .transfer(credential, task.payload(), &progress)
                .await?;
            Ok(())
        }
        Call::Commit { position } => {
            let credential = task.credential().ok_or(CallError::Contract(
                PipelineError::MissingCredential {
                    index: task.original_index(),
                    stage: Stage::Committing,
                },
            ))?;
            state.remote.commit(task, credential, position).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::{Payload, TargetId};
    use crate::impls::{InMemoryRemote, NoopEventSink, RemoteOp};

    fn state(remote: Arc<InMemoryRemote>) -> RunState {
        RunState::new(
            &PipelineConfig::default(),
            TargetId::new("gallery"),
            0,
            Vec::new(),
            remote,
            Arc::new(NoopEventSink),
        )
    }

    fn task() -> UploadTask {
        UploadTask::new(0, "t0", Payload::new(vec![1], "image/png"))
    }

    #[tokio::test]
    async fn sign_stores_credential() {
        let s = state(Arc::new(InMemoryRemote::new()));
        let mut rx = s.subscribe();
        let mut t = task();
        t.advance(Stage::Signing).unwrap();

        drive(&s, &mut t, Call::Sign, &mut rx).await.unwrap();

        assert!(t.credential().is_some());
        assert_eq!(t.attempts(), 1);
    }

    #[tokio::test]
    async fn transfer_without_credential_is_a_contract_failure() {
        let remote = Arc::new(InMemoryRemote::new());
        let s = state(Arc::clone(&remote));
        let mut rx = s.subscribe();
        let mut t = task();
        t.advance(Stage::Signing).unwrap();
        t.advance(Stage::Transferring).unwrap();

        let reason = drive(&s, &mut t, Call::Transfer, &mut rx).await.unwrap_err();

        assert!(matches!(
            reason,
            FailureReason::Contract { ref message } if message.contains("without a credential")
        ));
        assert!(remote.calls(RemoteOp::Transfer).is_empty());
    }

    #[tokio::test]
    async fn fatal_status_is_not_retried() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_next(RemoteOp::Sign, "t0", RemoteError::status(404, "no such gallery"));
        let s = state(Arc::clone(&remote));
        let mut rx = s.subscribe();
        let mut t = task();
        t.advance(Stage::Signing).unwrap();

        let reason = drive(&s, &mut t, Call::Sign, &mut rx).await.unwrap_err();

        assert_eq!(
            reason,
            FailureReason::Remote {
                stage: Stage::Signing,
                status: Some(404),
                message: "remote returned status 404: no such gallery".to_string(),
            }
        );
        assert_eq!(t.last_http_status(), Some(404));
        assert_eq!(remote.call_count(RemoteOp::Sign, "t0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_status_backs_off_then_succeeds() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail_next(RemoteOp::Sign, "t0", RemoteError::status(408, "timeout"));
        let s = state(Arc::clone(&remote));
        let mut rx = s.subscribe();
        let mut t = task();
        t.advance(Stage::Signing).unwrap();

        let start = tokio::time::Instant::now();
        drive(&s, &mut t, Call::Sign, &mut rx).await.unwrap();

        assert!(start.elapsed() >= std::time::Duration::from_secs(2));
        assert_eq!(t.attempts(), 2);
        assert_eq!(t.retry_delay(), None);
    }
}
