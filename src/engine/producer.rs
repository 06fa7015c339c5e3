// Producer - タスク生成と投入

use super::queue::TaskQueue;
use super::task_pool::TaskPool;
use crate::core::{EngineError, EngineResult, TaskId, TaskSource};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// プロデューサーが入力を書き込むタスク領域
pub trait TaskInputs: Send + Sync {
    /// Pending のタスク `id` の入力をソースから初期化する
    fn initialize_input(&self, id: TaskId, source: &dyn TaskSource) -> EngineResult<()>;
}

impl TaskInputs for TaskPool {
    fn initialize_input(&self, id: TaskId, source: &dyn TaskSource) -> EngineResult<()> {
        self.initialize(id, source)
    }
}

/// N件のタスクをID順に初期化・投入し、最後に一度だけクローズする
///
/// 途中で失敗・パニックしてもクローズは必ず行い、ワーカーを待たせ続けない。
pub fn produce<S, I, Q>(source: &S, inputs: &I, queue: &Q) -> EngineResult<usize>
where
    S: TaskSource,
    I: TaskInputs + ?Sized,
    Q: TaskQueue<TaskId> + ?Sized,
{
    let total = source.task_count();
    let enqueue_all = || -> EngineResult<usize> {
        for id in 0..total {
            inputs.initialize_input(id, source)?;
            queue.enqueue(id)?;
            tracing::trace!(task_id = id, "enqueued");
        }
        Ok(total)
    };

    let result = panic::catch_unwind(AssertUnwindSafe(enqueue_all));
    queue.close()?;
    match result {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Producer を専用スレッドで起動
pub fn spawn_producer<S>(
    source: S,
    pool: Arc<TaskPool>,
    queue: Arc<dyn TaskQueue<TaskId>>,
) -> EngineResult<JoinHandle<EngineResult<usize>>>
where
    S: TaskSource + 'static,
{
    thread::Builder::new()
        .name("producer".to_string())
        .spawn(move || {
            let enqueued = produce(&source, pool.as_ref(), queue.as_ref())?;
            tracing::debug!(enqueued, "producer finished");
            Ok(enqueued)
        })
        .map_err(|e| EngineError::spawn("producer", e))
}
