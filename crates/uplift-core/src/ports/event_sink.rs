//! EventSink port - ステータス変化の通知先

use crate::domain::StageEvent;

/// Receives every stage transition, retry decision and progress report.
///
/// `emit` is called from stage workers and must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StageEvent);
}
