//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **NoopEventSink / ChannelEventSink / RecordingEventSink**
//! - **InMemoryRemote**: 配置先コレクションをメモリ上で再現するリモート

pub mod event_sink;
pub mod inmem_remote;

pub use self::event_sink::{ChannelEventSink, NoopEventSink, RecordingEventSink};
pub use self::inmem_remote::{InMemoryRemote, RemoteOp};
