//! Queue module: stage hand-off queues and the retry policy.

mod retry;
mod stage_queue;

pub use retry::{Classification, RetryPolicy};
pub use stage_queue::StageQueue;
