// 進捗監視の具象実装

use crate::core::{ProgressReporter, TaskId};

/// tracing イベントによる進捗報告実装
#[derive(Debug, Default, Clone)]
pub struct ConsoleProgressReporter {
    quiet: bool,
}

impl ConsoleProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet() -> Self {
        Self { quiet: true }
    }

    /// 進捗を出す間隔（総数の約10%刻み）
    fn step(total: usize) -> usize {
        (total / 10).max(1)
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_started(&self, total_tasks: usize) {
        if !self.quiet {
            tracing::info!(total_tasks, "processing started");
        }
    }

    fn report_progress(&self, completed: usize, total: usize) {
        if !self.quiet && (completed % Self::step(total) == 0 || completed == total) {
            let percentage = if total == 0 {
                100.0
            } else {
                (completed as f64 / total as f64) * 100.0
            };
            tracing::info!(completed, total, "progress {percentage:.1}%");
        }
    }

    fn report_error(&self, task_id: TaskId, error: &str) {
        if !self.quiet {
            tracing::warn!(task_id, error, "task failed");
        }
    }

    fn report_completed(&self, total_done: usize, total_errors: usize) {
        if !self.quiet {
            tracing::info!(total_done, total_errors, "processing completed");
        }
    }
}

/// 何もしない進捗報告実装（テスト・ベンチマーク用）
#[derive(Debug, Default, Clone)]
pub struct NoOpProgressReporter;

impl NoOpProgressReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NoOpProgressReporter {
    fn report_started(&self, _total_tasks: usize) {
        // 何もしない
    }

    fn report_progress(&self, _completed: usize, _total: usize) {
        // 何もしない
    }

    fn report_error(&self, _task_id: TaskId, _error: &str) {
        // 何もしない
    }

    fn report_completed(&self, _total_done: usize, _total_errors: usize) {
        // 何もしない
    }
}
