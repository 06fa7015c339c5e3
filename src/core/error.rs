// エンジン専用のカスタムエラー型定義
// 致命的な初期化エラーと、タスク単位で回復されるパイプラインエラーを分離する

use super::types::TaskId;
use thiserror::Error;

/// エンジン固有のエラー型
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("設定エラー: {message}")]
    ConfigurationError { message: String },

    #[error("共有アリーナ確保エラー: {size} bytes - {source}")]
    ArenaAllocationError {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("同期プリミティブ初期化エラー: {primitive} (code {code})")]
    SyncInitError { primitive: &'static str, code: i32 },

    #[error("同期エラー: {operation} (code {code})")]
    SyncError { operation: &'static str, code: i32 },

    #[error("クローズ済みキューへのエンキュー: task {task_id}")]
    QueueClosedError { task_id: TaskId },

    #[error("ロック汚染エラー: {what}")]
    PoisonedError { what: &'static str },

    #[error("タスク状態遷移エラー: task {task_id} - {reason}")]
    TaskStateError { task_id: TaskId, reason: String },

    #[error("ワーカー起動エラー: {what} - {source}")]
    SpawnError {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ワーカーパニック: {worker}")]
    WorkerPanicked { worker: String },

    #[error("アリーナ接続エラー: {reason}")]
    AttachError { reason: String },

    #[error("プロデューサー中断: task {task_id} の投入待ち中にワーカーが全て終了")]
    ProducerAborted { task_id: TaskId },

    #[error("結果出力エラー: {source}")]
    SinkError {
        #[source]
        source: anyhow::Error,
    },

    #[error("タスク消失: 完了 {completed}/{expected} (消失 {lost:?})")]
    LostTasks {
        expected: usize,
        completed: usize,
        lost: Vec<TaskId>,
    },
}

impl EngineError {
    /// 設定エラーの作成
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// タスク状態遷移エラーの作成
    pub fn task_state(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self::TaskStateError {
            task_id,
            reason: reason.into(),
        }
    }

    /// 起動エラーの作成
    pub fn spawn(what: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnError {
            what: what.into(),
            source,
        }
    }

    /// アリーナ接続エラーの作成
    pub fn attach(reason: impl Into<String>) -> Self {
        Self::AttachError {
            reason: reason.into(),
        }
    }

    /// 結果出力エラーの作成
    pub fn sink(source: anyhow::Error) -> Self {
        Self::SinkError { source }
    }

    /// エラーが回復可能かどうかを判定
    ///
    /// 初期化・同期系は常に致命的。消失タスクは完了分の結果が有効なため回復可能扱い。
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConfigurationError { .. }
            | Self::ArenaAllocationError { .. }
            | Self::SyncInitError { .. }
            | Self::SyncError { .. }
            | Self::PoisonedError { .. }
            | Self::AttachError { .. } => false,
            Self::QueueClosedError { .. } | Self::TaskStateError { .. } => false,
            Self::SpawnError { .. } | Self::WorkerPanicked { .. } => false,
            Self::ProducerAborted { .. } => false,
            Self::SinkError { .. } => true,
            Self::LostTasks { .. } => true,
        }
    }
}

/// エンジン処理の結果型
pub type EngineResult<T> = Result<T, EngineError>;

/// パイプライン実行時のタスク単位エラー
///
/// ワーカー内で回復され、結果にタグ付けされる。プールを停止させない。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("形状不一致: expected {expected}, actual {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("スクラッチバッファ確保失敗: {elements} elements")]
    Allocation { elements: usize },

    #[error("パイプライン失敗: {message}")]
    Failed { message: String },
}

impl PipelineError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
