//! Ports - パイプラインと外部コラボレータの境界
//!
//! - **UploadRemote**: sign / transfer / commit を行うサービスクライアント
//! - **EventSink**: UI などへのステータス通知

pub mod event_sink;
pub mod remote;

pub use self::event_sink::EventSink;
pub use self::remote::{TransferProgress, UploadRemote};
