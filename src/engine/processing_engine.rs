// TaskEngine - 依存性注入によるタスク分配エンジン
// キュー・トラッカー・プリミティブは実行毎のコンテキストとして保持し、グローバル状態は持たない

use super::collector::{drain_outcomes, spawn_result_collector, CollectorStats};
use super::consumer::spawn_workers;
use super::producer::spawn_producer;
use super::queue::{BoundedQueue, TaskQueue};
use super::semaphore::SemaphoreQueue;
use super::task_pool::TaskPool;
use super::tracker::CompletionTracker;
use crate::core::{
    Completed, ComputePipeline, EngineConfig, EngineError, EngineResult, ProgressReporter,
    ResultSink, SyncStrategy, TaskId, TaskSource, WorkerMode,
};
use crate::services::config::validate;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// 全ての依存関係がコンストラクタで注入されるエンジン
///
/// 共有される依存関係は初期から Arc で管理する。
pub struct TaskEngine<P: ?Sized, C, R, K> {
    pipeline: Arc<P>,
    config: Arc<C>,
    reporter: Arc<R>,
    sink: Arc<K>,
}

impl<P, C, R, K> TaskEngine<P, C, R, K>
where
    P: ComputePipeline + 'static,
    C: EngineConfig,
    R: ProgressReporter + 'static,
    K: ResultSink + 'static,
{
    pub fn new(pipeline: P, config: C, reporter: R, sink: K) -> Self {
        Self::from_shared(Arc::new(pipeline), config, reporter, sink)
    }
}

impl<P, C, R, K> TaskEngine<P, C, R, K>
where
    P: ComputePipeline + ?Sized + 'static,
    C: EngineConfig,
    R: ProgressReporter + 'static,
    K: ResultSink + 'static,
{
    /// 既に共有されているパイプラインからエンジンを作成
    pub fn from_shared(pipeline: Arc<P>, config: C, reporter: R, sink: K) -> Self {
        Self {
            pipeline,
            config: Arc::new(config),
            reporter: Arc::new(reporter),
            sink: Arc::new(sink),
        }
    }

    /// プロデューサーとワーカープールを起動する
    ///
    /// 戻り値の `RunningEngine::join_all` で全参加者の終了を待つ。
    pub fn start<S>(&self, source: S) -> EngineResult<RunningEngine<R, K>>
    where
        S: TaskSource + 'static,
    {
        validate(self.config.as_ref())?;

        let expected = source.task_count();
        let mode = self.config.worker_mode();
        let report_progress = self.config.enable_progress_reporting();
        if report_progress {
            self.reporter.report_started(expected);
        }
        tracing::info!(
            tasks = expected,
            workers = mode.total_workers(self.config.worker_count()),
            capacity = self.config.queue_capacity(),
            ?mode,
            "engine starting"
        );

        let run = match mode {
            WorkerMode::Threads => Run::Threads(self.start_threads(source)?),
            WorkerMode::Processes { processes } => self.start_processes(source, processes, 1)?,
            WorkerMode::Hybrid {
                processes,
                threads_per_process,
            } => self.start_processes(source, processes, threads_per_process)?,
        };

        Ok(RunningEngine {
            run,
            reporter: Arc::clone(&self.reporter),
            sink: Arc::clone(&self.sink),
            report_progress,
            expected,
            started: Instant::now(),
        })
    }

    /// start と join_all をまとめて行う
    pub fn run<S>(&self, source: S) -> EngineResult<Completed>
    where
        S: TaskSource + 'static,
    {
        self.start(source)?.join_all()
    }

    fn make_queue(&self) -> EngineResult<Arc<dyn TaskQueue<TaskId>>> {
        let capacity = self.config.queue_capacity();
        Ok(match self.config.sync_strategy() {
            SyncStrategy::Condvar => Arc::new(BoundedQueue::new(capacity)?),
            SyncStrategy::Semaphore => Arc::new(SemaphoreQueue::new(capacity)?),
        })
    }

    fn start_threads<S>(&self, source: S) -> EngineResult<ThreadRun>
    where
        S: TaskSource + 'static,
    {
        let expected = source.task_count();
        let queue = self.make_queue()?;
        let pool = Arc::new(TaskPool::new(expected, self.pipeline.input_len()));
        let tracker = Arc::new(CompletionTracker::new(expected));
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let collector = spawn_result_collector(
            result_rx,
            expected,
            Arc::clone(&self.reporter),
            Arc::clone(&self.sink),
            self.config.enable_progress_reporting(),
        )?;

        // result_tx はワーカーにのみ渡す: 全ワーカー終了でチャンネルが閉じる
        let workers = match spawn_workers(
            self.config.worker_count(),
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&self.pipeline),
            Arc::clone(&tracker),
            result_tx,
        ) {
            Ok(workers) => workers,
            Err(e) => {
                // 起動済みのワーカーを Closed で抜けさせる
                queue.close()?;
                return Err(e);
            }
        };

        let producer = match spawn_producer(source, Arc::clone(&pool), Arc::clone(&queue)) {
            Ok(producer) => producer,
            Err(e) => {
                queue.close()?;
                return Err(e);
            }
        };

        Ok(ThreadRun {
            producer,
            workers,
            collector,
            pool,
            tracker,
            queue,
        })
    }

    #[cfg(unix)]
    fn start_processes<S>(
        &self,
        source: S,
        processes: usize,
        threads_per_process: usize,
    ) -> EngineResult<Run>
    where
        S: TaskSource + 'static,
    {
        let options = crate::arena::ProcessPoolOptions::new(
            processes,
            threads_per_process,
            self.config.queue_capacity(),
        )
        .with_sync_strategy(self.config.sync_strategy());
        let run = crate::arena::start_processes(source, Arc::clone(&self.pipeline), options)?;
        Ok(Run::Processes(run))
    }

    #[cfg(not(unix))]
    fn start_processes<S>(&self, _source: S, _processes: usize, _threads: usize) -> EngineResult<Run>
    where
        S: TaskSource + 'static,
    {
        Err(EngineError::configuration(
            "プロセスモードは unix でのみ利用できます",
        ))
    }

    /// 設定への参照を取得
    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }
}

struct ThreadRun {
    producer: JoinHandle<EngineResult<usize>>,
    workers: Vec<JoinHandle<EngineResult<usize>>>,
    collector: JoinHandle<EngineResult<CollectorStats>>,
    pool: Arc<TaskPool>,
    tracker: Arc<CompletionTracker>,
    queue: Arc<dyn TaskQueue<TaskId>>,
}

enum Run {
    Threads(ThreadRun),
    #[cfg(unix)]
    Processes(crate::arena::ProcessRun),
}

/// 実行中のエンジン。join_all まで結果は未定義
pub struct RunningEngine<R, K> {
    run: Run,
    reporter: Arc<R>,
    sink: Arc<K>,
    report_progress: bool,
    expected: usize,
    started: Instant,
}

impl<R, K> RunningEngine<R, K>
where
    R: ProgressReporter + 'static,
    K: ResultSink + 'static,
{
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// 全ての参加者の終了を待ち、最終集計を返す
    ///
    /// Done に到達しなかったタスクがあれば `LostTasks` を返す（完了分の結果はシンクに送出済み）。
    pub fn join_all(self) -> EngineResult<Completed> {
        let (done_count, error_count, lost) = match self.run {
            Run::Threads(run) => Self::join_threads(run)?,
            #[cfg(unix)]
            Run::Processes(run) => {
                let (expected, reporter) = (self.expected, self.reporter.as_ref());
                let report_progress = self.report_progress;
                // 進捗は子の回収中に共有トラッカーから通知済み
                let report = run.join_all_with_progress(|done| {
                    if report_progress {
                        reporter.report_progress(done, expected);
                    }
                })?;
                drain_outcomes(
                    report.outcomes,
                    expected,
                    reporter,
                    self.sink.as_ref(),
                    false,
                )?;
                (report.done_count, report.error_count, report.lost)
            }
        };

        self.sink.finalize().map_err(EngineError::sink)?;
        if self.report_progress {
            self.reporter.report_completed(done_count, error_count);
        }

        let completed = Completed {
            expected: self.expected,
            done_count,
            error_count,
            lost,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };

        if !completed.lost.is_empty() {
            tracing::warn!(
                expected = completed.expected,
                done = completed.done_count,
                lost = ?completed.lost,
                "tasks lost"
            );
            return Err(EngineError::LostTasks {
                expected: completed.expected,
                completed: completed.done_count,
                lost: completed.lost,
            });
        }

        tracing::info!(
            done = completed.done_count,
            errors = completed.error_count,
            elapsed_ms = completed.elapsed_ms,
            "engine finished"
        );
        Ok(completed)
    }

    fn join_threads(run: ThreadRun) -> EngineResult<(usize, usize, Vec<TaskId>)> {
        // プロデューサーは失敗・パニック時もキューをクローズするため、ワーカーは必ず終了する
        let mut worker_failure = None;
        for (i, handle) in run.workers.into_iter().enumerate() {
            match handle.join() {
                Ok(Ok(processed)) => tracing::debug!(worker = i, processed, "worker joined"),
                Ok(Err(e)) => {
                    tracing::error!(worker = i, error = %e, "worker failed");
                    worker_failure.get_or_insert(e);
                }
                // 実行中だったタスクは InProgress のまま残り、消失として報告される
                Err(_) => tracing::error!(worker = i, "worker thread panicked"),
            }
        }

        // ワーカーが全滅しているとプロデューサーは満杯のキューで待ち続ける
        run.queue.abort()?;
        let producer = run.producer.join();

        let collected = run.collector.join().map_err(|_| EngineError::WorkerPanicked {
            worker: "collector".to_string(),
        })?;

        match producer {
            Ok(Ok(enqueued)) => tracing::debug!(enqueued, "producer joined"),
            // 投入されなかったタスクは Pending のまま残り、消失として報告される
            Ok(Err(EngineError::ProducerAborted { task_id })) => {
                tracing::warn!(task_id, "producer aborted: no worker thread left")
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(EngineError::WorkerPanicked {
                    worker: "producer".to_string(),
                })
            }
        }
        if let Some(e) = worker_failure {
            return Err(e);
        }
        let stats = collected?;
        tracing::debug!(
            received = stats.received,
            high_water = run.queue.high_water_mark(),
            "collector joined"
        );

        Ok((
            run.tracker.done_count(),
            run.tracker.error_count(),
            run.pool.unfinished(),
        ))
    }
}
