//! Domain model (tasks, stages, events, ids).

pub mod events;
pub mod ids;
pub mod task;

pub use self::events::{EventKind, StageEvent};
pub use self::ids::RunId;
pub use self::task::{Credential, FailureReason, Payload, Stage, TargetId, UploadTask};
