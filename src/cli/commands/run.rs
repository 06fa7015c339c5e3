use crate::cli::args::{InputArg, ModeArg, SyncArg};
use crate::compute::{CnnPipeline, ModelShape, SpikeInputSource, UniformInputSource};
use crate::core::{
    Completed, EngineError, EngineResult, ResultSink, SyncStrategy, TaskSource, WorkerMode,
};
use crate::engine::TaskEngine;
use crate::services::{
    ConsoleProgressReporter, DefaultEngineConfig, JsonResultSink, LogResultSink,
};
use std::path::PathBuf;

/// run コマンドの設定（引数の多さを避けるため構造体にまとめる）
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: ModeArg,
    pub sync: SyncArg,
    pub workers: Option<usize>,
    pub processes: usize,
    pub capacity: usize,
    pub tasks: usize,
    pub input_size: usize,
    pub input: InputArg,
    pub output: Option<PathBuf>,
    pub quiet: bool,
}

impl RunConfig {
    /// CLI 引数からエンジン設定を組み立てる
    pub fn engine_config(&self) -> DefaultEngineConfig {
        let workers = self.workers.unwrap_or_else(num_cpus::get);
        let worker_mode = match self.mode {
            ModeArg::Threads => WorkerMode::Threads,
            ModeArg::Processes => WorkerMode::Processes {
                processes: self.processes,
            },
            ModeArg::Hybrid => WorkerMode::Hybrid {
                processes: self.processes,
                threads_per_process: workers,
            },
        };
        let sync_strategy = match self.sync {
            SyncArg::Condvar => SyncStrategy::Condvar,
            SyncArg::Semaphore => SyncStrategy::Semaphore,
        };

        DefaultEngineConfig::new(num_cpus::get())
            .with_workers(workers)
            .with_queue_capacity(self.capacity)
            .with_worker_mode(worker_mode)
            .with_sync_strategy(sync_strategy)
            .with_progress_reporting(!self.quiet)
    }

    pub fn model_shape(&self) -> ModelShape {
        ModelShape::default().with_input_size(self.input_size)
    }
}

/// run コマンドの実行
pub fn execute_run(config: &RunConfig) -> EngineResult<Completed> {
    let shape = config.model_shape();
    let pipeline = CnnPipeline::patterned(shape)?;

    tracing::info!(
        tasks = config.tasks,
        input_size = shape.input_size,
        mode = ?config.mode,
        sync = ?config.sync,
        "run configured"
    );

    match &config.output {
        Some(path) => run_with_sink(config, pipeline, JsonResultSink::new(path)),
        None => run_with_sink(config, pipeline, LogResultSink::new()),
    }
}

fn run_with_sink<K>(config: &RunConfig, pipeline: CnnPipeline, sink: K) -> EngineResult<Completed>
where
    K: ResultSink + 'static,
{
    let reporter = if config.quiet {
        ConsoleProgressReporter::quiet()
    } else {
        ConsoleProgressReporter::new()
    };
    let shape = *pipeline.shape();
    let engine = TaskEngine::new(pipeline, config.engine_config(), reporter, sink);

    let source: Box<dyn TaskSource> = match config.input {
        InputArg::Spike => Box::new(SpikeInputSource::new(config.tasks, &shape)),
        InputArg::Uniform => Box::new(UniformInputSource::new(config.tasks)),
    };
    engine.run(source)
}

/// 実行結果の要約表示
pub fn print_summary(result: &EngineResult<Completed>) {
    match result {
        Ok(completed) => {
            println!(
                "done {}/{} (errors: {}) in {} ms",
                completed.done_count, completed.expected, completed.error_count, completed.elapsed_ms
            );
        }
        Err(EngineError::LostTasks {
            expected,
            completed,
            lost,
        }) => {
            eprintln!("lost tasks: completed {completed}/{expected}, lost ids {lost:?}");
        }
        Err(error) => {
            eprintln!("error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_config() -> RunConfig {
        RunConfig {
            mode: ModeArg::Threads,
            sync: SyncArg::Condvar,
            workers: Some(2),
            processes: 2,
            capacity: 2,
            tasks: 3,
            input_size: 8,
            input: InputArg::Spike,
            output: None,
            quiet: true,
        }
    }

    #[test]
    fn test_engine_config_mapping() {
        let config = RunConfig {
            mode: ModeArg::Hybrid,
            sync: SyncArg::Semaphore,
            workers: Some(3),
            processes: 2,
            ..small_config()
        };
        let engine_config = config.engine_config();

        use crate::core::EngineConfig;
        assert_eq!(
            engine_config.worker_mode(),
            WorkerMode::Hybrid {
                processes: 2,
                threads_per_process: 3
            }
        );
        assert_eq!(engine_config.sync_strategy(), SyncStrategy::Semaphore);
        assert!(!engine_config.enable_progress_reporting());
    }

    #[test]
    fn test_execute_run_threads() {
        let completed = execute_run(&small_config()).unwrap();

        assert_eq!(completed.done_count, 3);
        assert_eq!(completed.error_count, 0);
    }

    #[test]
    fn test_execute_run_writes_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.json");
        let config = RunConfig {
            output: Some(path.clone()),
            input: InputArg::Uniform,
            ..small_config()
        };

        execute_run(&config).unwrap();

        let report: crate::services::sink::RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes.iter().all(|o| o.final_outputs.len() == 20));
    }

    #[test]
    fn test_too_small_input_rejected() {
        let config = RunConfig {
            input_size: 2,
            ..small_config()
        };
        assert!(matches!(
            execute_run(&config),
            Err(EngineError::ConfigurationError { .. })
        ));
    }
}
