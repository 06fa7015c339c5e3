// エンジンに関連するデータ型定義

use serde::{Deserialize, Serialize};

/// タスク識別子（プロデューサーが単調に割り当てる）
pub type TaskId = usize;

/// タスクの状態遷移: Pending -> InProgress -> Done
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending = 0,
    InProgress = 1,
    Done = 2,
}

impl TaskState {
    /// 共有メモリ上の生値から復元
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Pending),
            1 => Some(Self::InProgress),
            2 => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// 作業単位: 不変な入力 + パイプラインが書き込むスクラッチバッファ
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub input: Vec<f64>,
    /// 各ステージの出力（ステージ順）
    pub stage_outputs: Vec<Vec<f64>>,
    pub final_outputs: Vec<f64>,
    pub state: TaskState,
    pub error: Option<String>,
}

impl Task {
    /// 入力バッファを確保済みの Pending タスクを作成
    pub fn new(id: TaskId, input_len: usize) -> Self {
        Self {
            id,
            input: vec![0.0; input_len],
            stage_outputs: Vec::new(),
            final_outputs: Vec::new(),
            state: TaskState::Pending,
            error: None,
        }
    }
}

/// パイプラインの出力
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineOutput {
    pub stage_outputs: Vec<Vec<f64>>,
    pub final_outputs: Vec<f64>,
}

/// 完了したタスク1件分の結果（結果シンクへ送出される）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub worker_id: String,
    pub final_outputs: Vec<f64>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// join_all の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completed {
    pub expected: usize,
    /// 完了数（成功・失敗を問わず試行済みのタスク数）
    pub done_count: usize,
    pub error_count: usize,
    pub lost: Vec<TaskId>,
    pub elapsed_ms: u64,
}

impl Completed {
    pub fn is_complete(&self) -> bool {
        self.done_count == self.expected && self.lost.is_empty()
    }
}

/// ワーカーの実行形態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerMode {
    /// 親プロセス内のOSスレッド
    Threads,
    /// 共有アリーナに接続したフォーク済みプロセス（各1ワーカー）
    Processes { processes: usize },
    /// 複数プロセス × プロセス毎の複数スレッド
    Hybrid {
        processes: usize,
        threads_per_process: usize,
    },
}

impl WorkerMode {
    /// 総ワーカー数（スレッドモードでは設定値をそのまま使う）
    pub fn total_workers(&self, thread_workers: usize) -> usize {
        match *self {
            Self::Threads => thread_workers,
            Self::Processes { processes } => processes,
            Self::Hybrid {
                processes,
                threads_per_process,
            } => processes * threads_per_process,
        }
    }
}

/// キューの同期方式（スレッド・プロセス共通）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Mutex + 2つの条件変数
    Condvar,
    /// 計数セマフォ2つ
    Semaphore,
}
