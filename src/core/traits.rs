// エンジンのトレイト定義
// 全ての抽象化インターフェースを定義

use super::error::PipelineError;
use super::types::{PipelineOutput, SyncStrategy, TaskId, TaskOutcome, WorkerMode};
use anyhow::Result;
use mockall::automock;

/// エンジンの設定を抽象化するトレイト
#[automock]
pub trait EngineConfig: Send + Sync {
    /// スレッドモードのワーカー数を取得
    fn worker_count(&self) -> usize;

    /// キュー容量（同時にバッファされる最大タスク数）を取得
    fn queue_capacity(&self) -> usize;

    /// ワーカーの実行形態を取得
    fn worker_mode(&self) -> WorkerMode;

    /// スレッドモードの同期方式を取得
    fn sync_strategy(&self) -> SyncStrategy;

    /// 進捗報告を有効にするかどうか
    fn enable_progress_reporting(&self) -> bool;
}

// EngineConfig for Box<dyn EngineConfig>
impl EngineConfig for Box<dyn EngineConfig> {
    fn worker_count(&self) -> usize {
        self.as_ref().worker_count()
    }

    fn queue_capacity(&self) -> usize {
        self.as_ref().queue_capacity()
    }

    fn worker_mode(&self) -> WorkerMode {
        self.as_ref().worker_mode()
    }

    fn sync_strategy(&self) -> SyncStrategy {
        self.as_ref().sync_strategy()
    }

    fn enable_progress_reporting(&self) -> bool {
        self.as_ref().enable_progress_reporting()
    }
}

/// 各タスクに適用される計算パイプライン
///
/// 入力の純関数であること。複数ワーカーから同時に呼ばれるため、
/// 内部に共有可変状態を持ってはならない。
#[automock]
pub trait ComputePipeline: Send + Sync {
    /// 期待する入力長
    fn input_len(&self) -> usize;

    /// 最終出力長
    fn output_len(&self) -> usize;

    /// 入力バッファに全ステージを適用
    fn execute(&self, input: &[f64]) -> Result<PipelineOutput, PipelineError>;
}

/// 初期入力を決定的に生成するタスクソース
#[automock]
pub trait TaskSource: Send {
    /// 生成するタスク数 N
    fn task_count(&self) -> usize;

    /// タスク `id` の入力をバッファに書き込む
    fn fill_input(&self, id: TaskId, buffer: &mut [f64]);
}

// TaskSource for Box<dyn TaskSource>
impl TaskSource for Box<dyn TaskSource> {
    fn task_count(&self) -> usize {
        self.as_ref().task_count()
    }

    fn fill_input(&self, id: TaskId, buffer: &mut [f64]) {
        self.as_ref().fill_input(id, buffer)
    }
}

/// 完了タスクの結果を受け取るシンク
///
/// 送出順は不定。複数スレッドから同時に呼ばれても安全であること。
#[automock]
pub trait ResultSink: Send + Sync {
    /// 結果1件の送出
    fn emit(&self, outcome: TaskOutcome) -> Result<()>;

    /// 全結果送出後の完了処理
    fn finalize(&self) -> Result<()>;
}

/// 進捗報告の抽象化トレイト
#[automock]
pub trait ProgressReporter: Send + Sync {
    /// 処理開始時の報告
    fn report_started(&self, total_tasks: usize);

    /// 進捗更新の報告
    fn report_progress(&self, completed: usize, total: usize);

    /// タスク失敗時の報告
    fn report_error(&self, task_id: TaskId, error: &str);

    /// 処理完了時の報告
    fn report_completed(&self, total_done: usize, total_errors: usize);
}

// ProgressReporter for Box<dyn ProgressReporter>
impl ProgressReporter for Box<dyn ProgressReporter> {
    fn report_started(&self, total_tasks: usize) {
        self.as_ref().report_started(total_tasks)
    }

    fn report_progress(&self, completed: usize, total: usize) {
        self.as_ref().report_progress(completed, total)
    }

    fn report_error(&self, task_id: TaskId, error: &str) {
        self.as_ref().report_error(task_id, error)
    }

    fn report_completed(&self, total_done: usize, total_errors: usize) {
        self.as_ref().report_completed(total_done, total_errors)
    }
}

// ResultSink for Box<dyn ResultSink>
impl ResultSink for Box<dyn ResultSink> {
    fn emit(&self, outcome: TaskOutcome) -> Result<()> {
        self.as_ref().emit(outcome)
    }

    fn finalize(&self) -> Result<()> {
        self.as_ref().finalize()
    }
}
