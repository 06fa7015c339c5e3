// 結果出力機能
// 完了タスクの結果の保存、JSON 出力、ログ出力

pub mod implementations;

// 公開API
pub use implementations::{JsonResultSink, LogResultSink, MemoryResultSink, RunInfo, RunReport};
