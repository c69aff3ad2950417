//! uplift-core
//!
//! Concurrent bulk-upload pipeline: every task goes through three remote
//! operations (sign → transfer → commit) with bounded parallelism, per-task
//! retry, and a final position fixed by the task's original input order.
//!
//! # モジュール構成
//! - **domain**: タスク、ステージ、イベント、ID
//! - **queue**: ステージ間のキューと retry policy
//! - **ports**: 外部コラボレータとの境界（UploadRemote, EventSink）
//! - **app**: builder、controller、各ステージの worker
//! - **impls**: ports の実装（InMemoryRemote、各種 EventSink）
//! - **config**: PipelineConfig
//! - **error**: エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{Pipeline, PipelineBuilder, PipelineHandle, RunReport};
pub use config::{FatalPolicy, PipelineConfig};
pub use domain::{Payload, Stage, TargetId, UploadTask};
pub use error::{BuildError, PipelineError, RemoteError};
