//! Status-change notifications emitted while a run progresses.
//!
//! UI 側はこのストリームを購読して表示を更新する（描画はこのクレートの責務外）。

use std::time::Duration;

use serde::Serialize;

use super::task::{Stage, UploadTask};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// The task entered `stage`.
    Transition,

    /// A retriable failure; the owning worker waits `delay_ms` and retries.
    Retrying { attempt: u32, delay_ms: u64 },

    /// Fraction of the payload transferred so far, in `0.0..=1.0`.
    Progress { fraction: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEvent {
    pub original_index: usize,
    pub name: String,
    pub stage: Stage,
    pub last_http_status: Option<u16>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl StageEvent {
    fn of(task: &UploadTask, kind: EventKind) -> Self {
        Self {
            original_index: task.original_index(),
            name: task.name().to_string(),
            stage: task.stage(),
            last_http_status: task.last_http_status(),
            kind,
        }
    }

    pub fn transition(task: &UploadTask) -> Self {
        Self::of(task, EventKind::Transition)
    }

    pub fn retrying(task: &UploadTask, delay: Duration) -> Self {
        Self::of(
            task,
            EventKind::Retrying {
                attempt: task.attempts(),
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            },
        )
    }

    pub fn progress(original_index: usize, name: &str, fraction: f32) -> Self {
        Self {
            original_index,
            name: name.to_string(),
            stage: Stage::Transferring,
            last_http_status: None,
            kind: EventKind::Progress {
                fraction: fraction.clamp(0.0, 1.0),
            },
        }
    }

    pub fn is_transition(&self) -> bool {
        matches!(self.kind, EventKind::Transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;

    #[test]
    fn event_serializes_flat_with_kind_tag() {
        let task = UploadTask::new(2, "c.png", Payload::new(vec![0], "image/png"));
        let v = serde_json::to_value(StageEvent::retrying(&task, Duration::from_secs(4))).unwrap();
        assert_eq!(v["kind"], "retrying");
        assert_eq!(v["delay_ms"], 4000);
        assert_eq!(v["stage"], "pending");
        assert_eq!(v["original_index"], 2);
    }

    #[test]
    fn progress_is_clamped() {
        let e = StageEvent::progress(0, "a.png", 1.7);
        assert_eq!(e.kind, EventKind::Progress { fraction: 1.0 });
        assert!(!e.is_transition());
    }
}
