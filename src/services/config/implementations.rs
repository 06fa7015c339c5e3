// 設定管理の具象実装

use crate::core::{EngineConfig, EngineError, EngineResult, SyncStrategy, WorkerMode};

/// デフォルト設定実装
#[derive(Debug, Clone)]
pub struct DefaultEngineConfig {
    workers: usize,
    queue_capacity: usize,
    worker_mode: WorkerMode,
    sync_strategy: SyncStrategy,
    enable_progress: bool,
}

impl DefaultEngineConfig {
    pub fn new(cpu_count: usize) -> Self {
        Self {
            workers: cpu_count.max(1),
            queue_capacity: 2,
            worker_mode: WorkerMode::Threads,
            sync_strategy: SyncStrategy::Condvar,
            enable_progress: true,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_worker_mode(mut self, worker_mode: WorkerMode) -> Self {
        self.worker_mode = worker_mode;
        self
    }

    pub fn with_sync_strategy(mut self, sync_strategy: SyncStrategy) -> Self {
        self.sync_strategy = sync_strategy;
        self
    }

    pub fn with_progress_reporting(mut self, enable: bool) -> Self {
        self.enable_progress = enable;
        self
    }
}

impl Default for DefaultEngineConfig {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl EngineConfig for DefaultEngineConfig {
    fn worker_count(&self) -> usize {
        self.workers
    }

    fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn worker_mode(&self) -> WorkerMode {
        self.worker_mode
    }

    fn sync_strategy(&self) -> SyncStrategy {
        self.sync_strategy
    }

    fn enable_progress_reporting(&self) -> bool {
        self.enable_progress
    }
}

/// 任意の EngineConfig の検証
pub fn validate<C: EngineConfig + ?Sized>(config: &C) -> EngineResult<()> {
    if config.queue_capacity() == 0 {
        return Err(EngineError::configuration(
            "キュー容量は1以上である必要があります",
        ));
    }
    match config.worker_mode() {
        WorkerMode::Threads if config.worker_count() == 0 => Err(EngineError::configuration(
            "ワーカー数は1以上である必要があります",
        )),
        WorkerMode::Processes { processes: 0 } | WorkerMode::Hybrid { processes: 0, .. } => Err(
            EngineError::configuration("プロセス数は1以上である必要があります"),
        ),
        WorkerMode::Hybrid {
            threads_per_process: 0,
            ..
        } => Err(EngineError::configuration(
            "プロセス毎のスレッド数は1以上である必要があります",
        )),
        _ => Ok(()),
    }
}

impl DefaultEngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        validate(self)
    }
}
