//! App - パイプラインの実行層
//!
//! # 主要コンポーネント
//! - **PipelineBuilder**: 組み立てと起動前検証
//! - **Pipeline / PipelineHandle**: worker の起動、abort、完了待ち
//! - **signer / transfer / committer**: 3 つのステージの worker ループ
//! - **RunReport**: run の結果

pub mod builder;
pub mod controller;
pub mod report;
pub mod state;

mod committer;
mod signer;
mod stage;
mod transfer;

pub use self::builder::PipelineBuilder;
pub use self::controller::{Pipeline, PipelineHandle};
pub use self::report::{RunReport, StageCounts};
pub use self::state::RunPhase;
