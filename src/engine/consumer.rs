// Consumer - ワーカーループとスレッドワーカープール
// ループ本体はスレッド・プロセス共通。違うのはタスク領域への接続方法だけ

use super::queue::{Dequeued, TaskQueue};
use super::task_pool::TaskPool;
use super::tracker::CompletionTracker;
use crate::core::{ComputePipeline, EngineError, EngineResult, TaskId, TaskOutcome};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// ワーカーが1タスクを実行する先のタスク領域
pub trait TaskStore: Send + Sync {
    /// タスクを取得(InProgress)し、パイプラインを適用して Done にする
    ///
    /// パイプラインの失敗は結果にタグ付けされ、Err にはならない。
    fn execute<P>(&self, id: TaskId, pipeline: &P, worker_id: &str) -> EngineResult<TaskOutcome>
    where
        P: ComputePipeline + ?Sized;
}

impl TaskStore for TaskPool {
    fn execute<P>(&self, id: TaskId, pipeline: &P, worker_id: &str) -> EngineResult<TaskOutcome>
    where
        P: ComputePipeline + ?Sized,
    {
        let lease = self.claim(id)?;
        let result = pipeline.execute(lease.input());
        let (final_outputs, error) = lease.complete(result);
        Ok(TaskOutcome {
            task_id: id,
            worker_id: worker_id.to_string(),
            final_outputs,
            error,
        })
    }
}

/// 単一ワーカーのループ: Closed を観測するまで dequeue → 実行 → 記録 → 送出
///
/// 戻り値はこのワーカーが処理したタスク数。
pub fn run_worker<Q, S, P, F>(
    worker_id: &str,
    queue: &Q,
    store: &S,
    pipeline: &P,
    tracker: &CompletionTracker,
    mut emit: F,
) -> EngineResult<usize>
where
    Q: TaskQueue<TaskId> + ?Sized,
    S: TaskStore + ?Sized,
    P: ComputePipeline + ?Sized,
    F: FnMut(TaskOutcome),
{
    let mut processed = 0;
    loop {
        let id = match queue.dequeue()? {
            Dequeued::Item(id) => id,
            Dequeued::Closed => break,
        };

        let outcome = store.execute(id, pipeline, worker_id)?;
        if let Some(error) = &outcome.error {
            tracing::warn!(task_id = id, worker = worker_id, %error, "pipeline failed");
        } else {
            tracing::debug!(task_id = id, worker = worker_id, "task done");
        }

        tracker.record(outcome.is_error());
        processed += 1;
        emit(outcome);
    }
    tracing::debug!(worker = worker_id, processed, "worker observed closed queue");
    Ok(processed)
}

/// スレッドワーカーを1つ起動
pub fn spawn_single_worker<P>(
    worker_id: String,
    queue: Arc<dyn TaskQueue<TaskId>>,
    pool: Arc<TaskPool>,
    pipeline: Arc<P>,
    tracker: Arc<CompletionTracker>,
    result_tx: Sender<TaskOutcome>,
) -> EngineResult<JoinHandle<EngineResult<usize>>>
where
    P: ComputePipeline + ?Sized + 'static,
{
    thread::Builder::new()
        .name(worker_id.clone())
        .spawn(move || {
            run_worker(
                &worker_id,
                queue.as_ref(),
                pool.as_ref(),
                pipeline.as_ref(),
                &tracker,
                |outcome| {
                    // コレクター終了後も残りのタスクは消化し切る
                    if result_tx.send(outcome).is_err() {
                        tracing::warn!("result channel closed, outcome dropped");
                    }
                },
            )
        })
        .map_err(|e| EngineError::spawn("worker thread", e))
}

/// 固定数のスレッドワーカープールを起動
pub fn spawn_workers<P>(
    worker_count: usize,
    queue: Arc<dyn TaskQueue<TaskId>>,
    pool: Arc<TaskPool>,
    pipeline: Arc<P>,
    tracker: Arc<CompletionTracker>,
    result_tx: Sender<TaskOutcome>,
) -> EngineResult<Vec<JoinHandle<EngineResult<usize>>>>
where
    P: ComputePipeline + ?Sized + 'static,
{
    (0..worker_count)
        .map(|i| {
            spawn_single_worker(
                format!("thread-{i}"),
                Arc::clone(&queue),
                Arc::clone(&pool),
                Arc::clone(&pipeline),
                Arc::clone(&tracker),
                result_tx.clone(),
            )
        })
        .collect()
}
