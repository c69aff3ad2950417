//! EventSink implementations.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::domain::{Stage, StageEvent};
use crate::ports::EventSink;

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: StageEvent) {}
}

/// Forwards events to an unbounded channel, e.g. for a UI task to render.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<StageEvent>,
}

impl ChannelEventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: StageEvent) {
        // 受信側が先に閉じていても run は続ける
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Stages entered by one task, in emission order.
    pub fn transitions_for(&self, original_index: usize) -> Vec<Stage> {
        self.events()
            .into_iter()
            .filter(|e| e.original_index == original_index && e.is_transition())
            .map(|e| e.stage)
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: StageEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, UploadTask};

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelEventSink::channel();
        let task = UploadTask::new(0, "a.png", Payload::new(vec![], "image/png"));
        sink.emit(StageEvent::transition(&task));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name, "a.png");
        assert_eq!(got.stage, Stage::Pending);
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelEventSink::channel();
        drop(rx);
        sink.emit(StageEvent::progress(0, "a.png", 0.5));
    }

    #[test]
    fn recording_sink_filters_transitions() {
        let sink = RecordingEventSink::new();
        let task = UploadTask::new(1, "b.png", Payload::new(vec![], "image/png"));
        sink.emit(StageEvent::transition(&task));
        sink.emit(StageEvent::progress(1, "b.png", 0.3));
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.transitions_for(1), vec![Stage::Pending]);
        assert!(sink.transitions_for(0).is_empty());
    }
}
