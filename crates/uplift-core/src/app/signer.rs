//! Signer - sign キューを 1 本の worker で先頭から順に処理する

use std::sync::Arc;

use tracing::Instrument;

use super::stage::{Call, drive};
use super::state::RunState;
use crate::domain::Stage;

pub(crate) async fn run(state: Arc<RunState>) {
    let span = tracing::info_span!("signer");
    signer_loop(state).instrument(span).await;
}

async fn signer_loop(state: Arc<RunState>) {
    let mut phase_rx = state.subscribe();
    let mut signed = 0usize;

    loop {
        // abort も見る: fatal の後に新しい sign を始めない
        if state.should_stop() {
            break;
        }

        // 全タスクは run 開始前に投入済み。空なら全タスクが sign を通過（または終端）している
        let Some(mut task) = state.sign_queue.pop().await else {
            break;
        };

        if let Err(err) = task.advance(Stage::Signing) {
            state.fail_contract(task, err).await;
            continue;
        }
        state.emit(&task);

        match drive(&state, &mut task, Call::Sign, &mut phase_rx).await {
            Ok(()) => {
                signed += 1;
                state
                    .hand_off(task, Stage::Transferring, &state.transfer_queue)
                    .await;
            }
            Err(reason) => state.fail_task(task, reason).await,
        }
    }

    tracing::info!(signed, "signer finished");
}
