//! Transfer - 固定サイズの worker プールが transfer キューを奪い合う
//!
//! 完了順は original_index と一致しない。最終位置は committer が決めるので問題ない。

use std::sync::Arc;

use tracing::Instrument;

use super::stage::{Call, drive};
use super::state::RunState;
use crate::domain::Stage;

pub(crate) async fn run(worker: usize, state: Arc<RunState>) {
    let span = tracing::info_span!("transfer", worker);
    transfer_loop(state).instrument(span).await;
}

async fn transfer_loop(state: Arc<RunState>) {
    let mut phase_rx = state.subscribe();
    let mut transferred = 0usize;

    loop {
        if state.should_stop() {
            break;
        }

        let Some(mut task) = state.transfer_queue.pop().await else {
            // signer からの到着を待つ（ずっと block はしない）
            state.idle(&state.transfer_queue, &mut phase_rx).await;
            continue;
        };

        tracing::debug!(
            index = task.original_index(),
            name = task.name(),
            bytes = task.payload().len(),
            "transfer started"
        );

        match drive(&state, &mut task, Call::Transfer, &mut phase_rx).await {
            Ok(()) => {
                transferred += 1;
                state
                    .hand_off(task, Stage::Committing, &state.commit_queue)
                    .await;
            }
            Err(reason) => state.fail_task(task, reason).await,
        }
    }

    tracing::debug!(transferred, "transfer worker finished");
}
