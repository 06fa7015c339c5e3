// 高レベル公開API
// TaskEngine を簡単に使用できるようにするための便利な関数

use super::processing_engine::{RunningEngine, TaskEngine};
use crate::core::{ComputePipeline, EngineResult, TaskSource};
use crate::services::{
    ConsoleProgressReporter, DefaultEngineConfig, MemoryResultSink, NoOpProgressReporter,
};

/// プロデューサーとワーカープールを起動する最小API
///
/// スレッドモード・条件変数キューで起動する。結果は `RunningEngine::sink` から参照できる。
pub fn start<S, P>(
    source: S,
    pipeline: P,
    worker_count: usize,
    queue_capacity: usize,
) -> EngineResult<RunningEngine<NoOpProgressReporter, MemoryResultSink>>
where
    S: TaskSource + 'static,
    P: ComputePipeline + 'static,
{
    let config = DefaultEngineConfig::default()
        .with_workers(worker_count)
        .with_queue_capacity(queue_capacity)
        .with_progress_reporting(false);
    TaskEngine::new(pipeline, config, NoOpProgressReporter::new(), MemoryResultSink::new())
        .start(source)
}

/// TaskEngine作成のヘルパー関数
///
/// デフォルト設定での簡単なエンジン作成
pub fn create_default_engine<P>(
    pipeline: P,
) -> TaskEngine<P, DefaultEngineConfig, ConsoleProgressReporter, MemoryResultSink>
where
    P: ComputePipeline + 'static,
{
    TaskEngine::new(
        pipeline,
        DefaultEngineConfig::default(),
        ConsoleProgressReporter::new(),
        MemoryResultSink::new(),
    )
}

/// TaskEngine作成のヘルパー関数（静音版）
///
/// テストやバックグラウンド処理用の静音エンジン作成
pub fn create_quiet_engine<P>(
    pipeline: P,
) -> TaskEngine<P, DefaultEngineConfig, NoOpProgressReporter, MemoryResultSink>
where
    P: ComputePipeline + 'static,
{
    TaskEngine::new(
        pipeline,
        DefaultEngineConfig::default().with_progress_reporting(false),
        NoOpProgressReporter::new(),
        MemoryResultSink::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{IdentityPipeline, UniformInputSource};
    use crate::core::EngineConfig;

    #[test]
    fn test_start_and_join_all() {
        let running = start(UniformInputSource::new(5), IdentityPipeline::new(1), 2, 2).unwrap();
        let sink = running.sink().clone();

        let completed = running.join_all().unwrap();

        assert_eq!(completed.done_count, 5);
        assert_eq!(sink.sorted_task_ids(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_start_rejects_zero_workers() {
        let result = start(UniformInputSource::new(1), IdentityPipeline::new(1), 0, 2);
        assert!(result.is_err());
    }

    #[test]
    fn test_helper_engines() {
        let default_engine = create_default_engine(IdentityPipeline::new(1));
        let quiet_engine = create_quiet_engine(IdentityPipeline::new(1));

        assert!(default_engine.config().enable_progress_reporting());
        assert!(!quiet_engine.config().enable_progress_reporting());
        assert_eq!(quiet_engine.run(UniformInputSource::new(3)).unwrap().done_count, 3);
    }
}
