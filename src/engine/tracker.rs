// Completion Tracker - 完了タスク数の共有カウンター
// 原子的インクリメントのみで構成されるため、共有アリーナ上にそのまま配置できる

use std::sync::atomic::{AtomicUsize, Ordering};

/// 完了（試行済み）タスク数とエラー数を集計する
#[repr(C)]
#[derive(Debug)]
pub struct CompletionTracker {
    expected: usize,
    done: AtomicUsize,
    errors: AtomicUsize,
}

impl CompletionTracker {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            done: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    /// タスク1件の完了を記録し、更新後の完了数を返す
    ///
    /// パイプライン呼び出しが返った後、同じワーカーが次の dequeue を行う前に呼ぶこと。
    pub fn record(&self, failed: bool) -> usize {
        if failed {
            self.errors.fetch_add(1, Ordering::AcqRel);
        }
        self.done.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn done_count(&self) -> usize {
        self.done.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.done_count() >= self.expected
    }
}
