//! 有界キューによるタスク分配エンジン
//!
//! プロデューサーが N 件のタスクを固定容量のキューへ投入し、スレッド・プロセス・
//! その混成のワーカープールが取り出して CNN パイプラインを適用する。
//! プロセス間では単一の共有メモリ領域（アリーナ）にキューと同期プリミティブを置く。

pub mod cli;
pub mod compute;
pub mod core;
pub mod engine;
pub mod services;

#[cfg(unix)]
pub mod arena;

pub use crate::core::{
    Completed, ComputePipeline, EngineConfig, EngineError, EngineResult, PipelineError,
    PipelineOutput, ProgressReporter, ResultSink, SyncStrategy, TaskId, TaskOutcome, TaskSource,
    WorkerMode,
};
pub use engine::{start, RunningEngine, TaskEngine};
