//! Committer - 1 本の worker が到着順にコミットする
//!
//! 位置は常に `base_position + original_index`。到着順やコミット済み件数からは決めない。

use std::sync::Arc;

use tracing::Instrument;

use super::stage::{Call, drive};
use super::state::RunState;
use crate::error::PipelineError;

/// Final position of the task at `original_index`, or `None` past `u64::MAX`.
pub(crate) fn position_for(base_position: u64, original_index: usize) -> Option<u64> {
    u64::try_from(original_index)
        .ok()
        .and_then(|index| base_position.checked_add(index))
}

pub(crate) async fn run(state: Arc<RunState>) {
    let span = tracing::info_span!("committer");
    committer_loop(state).instrument(span).await;
}

async fn committer_loop(state: Arc<RunState>) {
    let mut phase_rx = state.subscribe();
    let mut committed = 0usize;

    loop {
        if state.should_stop() {
            break;
        }

        let Some(mut task) = state.commit_queue.pop().await else {
            state.idle(&state.commit_queue, &mut phase_rx).await;
            continue;
        };

        let Some(position) = position_for(state.base_position, task.original_index()) else {
            let err = PipelineError::PositionOverflow {
                index: task.original_index(),
                base_position: state.base_position,
            };
            state.fail_contract(task, err).await;
            continue;
        };

        match drive(&state, &mut task, Call::Commit { position }, &mut phase_rx).await {
            Ok(()) => match task.mark_committed(position) {
                Ok(()) => {
                    committed += 1;
                    tracing::info!(
                        index = task.original_index(),
                        name = task.name(),
                        position,
                        "task committed"
                    );
                    state.finish(task).await;
                }
                Err(err) => state.fail_contract(task, err).await,
            },
            Err(reason) => state.fail_task(task, reason).await,
        }
    }

    tracing::info!(committed, "committer finished");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::{FailureReason, Payload, Stage, TargetId, UploadTask};
    use crate::impls::{InMemoryRemote, NoopEventSink, RemoteOp};

    #[test]
    fn position_ignores_commit_order() {
        assert_eq!(position_for(10, 0), Some(10));
        assert_eq!(position_for(10, 2), Some(12));
        assert_eq!(position_for(0, 7), Some(7));
    }

    #[test]
    fn position_past_u64_max_is_none() {
        assert_eq!(position_for(u64::MAX, 0), Some(u64::MAX));
        assert_eq!(position_for(u64::MAX, 1), None);
        assert_eq!(position_for(u64::MAX - 2, 3), None);
    }

    #[tokio::test]
    async fn overflowing_position_fails_the_task_without_committing() {
        let remote = Arc::new(InMemoryRemote::new());
        let state = Arc::new(RunState::new(
            &PipelineConfig::default(),
            TargetId::new("gallery"),
            u64::MAX,
            vec![UploadTask::new(1, "t1", Payload::new(vec![1], "image/png"))],
            remote.clone(),
            Arc::new(NoopEventSink),
        ));
        let mut task = state.sign_queue.pop().await.unwrap();
        for stage in [Stage::Signing, Stage::Transferring, Stage::Committing] {
            task.advance(stage).unwrap();
        }
        state.commit_queue.push(task).await;

        tokio::time::timeout(Duration::from_secs(5), run(Arc::clone(&state)))
            .await
            .unwrap();

        let finished = state.take_finished().await;
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].stage(), Stage::Failed);
        assert!(matches!(
            finished[0].failure(),
            Some(FailureReason::Contract { message }) if message.contains("no position")
        ));
        assert!(remote.calls(RemoteOp::Commit).is_empty());
    }
}
