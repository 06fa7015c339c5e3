// エンジン層 - 有界キューによる並列処理とオーケストレーション
// プロデューサー -> キュー -> ワーカープール -> パイプライン -> 完了トラッカー

pub mod api;
pub mod collector;
pub mod consumer;
pub mod processing_engine;
pub mod producer;
pub mod queue;
pub mod semaphore;
pub mod task_pool;
pub mod tracker;

// 公開API - 主要エンジンクラス
pub use api::{create_default_engine, create_quiet_engine, start};
pub use processing_engine::{RunningEngine, TaskEngine};
pub use queue::{BoundedQueue, Dequeued, TaskQueue};
pub use semaphore::SemaphoreQueue;
pub use task_pool::TaskPool;
pub use tracker::CompletionTracker;
