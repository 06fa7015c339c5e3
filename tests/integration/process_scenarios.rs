// プロセスモード・ハイブリッドモードのシナリオ
// フォークするテストは FORK_LOCK で直列化する

use crate::fixtures::{expected_doubled, tagged_source, Fault, TaggedPipeline, FORK_LOCK};
use cnn_pool::arena::{start_processes, ChildExit, ProcessPoolOptions};
use cnn_pool::compute::{CnnPipeline, ModelShape, SpikeInputSource};
use cnn_pool::core::traits::MockProgressReporter;
use cnn_pool::core::{EngineError, SyncStrategy, TaskId, WorkerMode};
use cnn_pool::engine::TaskEngine;
use cnn_pool::services::{DefaultEngineConfig, MemoryResultSink, NoOpProgressReporter};
use std::sync::{Arc, Mutex};

fn process_engine(
    pipeline: TaggedPipeline,
    mode: WorkerMode,
) -> TaskEngine<TaggedPipeline, DefaultEngineConfig, NoOpProgressReporter, MemoryResultSink> {
    TaskEngine::new(
        pipeline,
        DefaultEngineConfig::new(4)
            .with_queue_capacity(2)
            .with_worker_mode(mode)
            .with_progress_reporting(false),
        NoOpProgressReporter::new(),
        MemoryResultSink::new(),
    )
}

#[test]
fn test_processes_complete_every_task() {
    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let engine = process_engine(
        TaggedPipeline::new(3),
        WorkerMode::Processes { processes: 3 },
    );

    let completed = engine.run(tagged_source(12)).unwrap();

    assert_eq!(completed.done_count, 12);
    assert_eq!(completed.error_count, 0);
    let outcomes = engine.sink().sorted_outcomes();
    assert_eq!(
        outcomes.iter().map(|o| o.task_id).collect::<Vec<_>>(),
        (0..12).collect::<Vec<TaskId>>()
    );
    for outcome in outcomes {
        assert_eq!(outcome.final_outputs, expected_doubled(outcome.task_id, 3));
        assert!(outcome.worker_id.starts_with("process-"));
    }
}

#[test]
fn test_hybrid_workers_report_thread_ids() {
    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let engine = process_engine(
        TaggedPipeline::new(2).with_fault(Fault::Fail(4)),
        WorkerMode::Hybrid {
            processes: 2,
            threads_per_process: 2,
        },
    );

    let completed = engine.run(tagged_source(10)).unwrap();

    assert_eq!(completed.done_count, 10);
    assert_eq!(completed.error_count, 1);
    let outcomes = engine.sink().sorted_outcomes();
    assert!(outcomes
        .iter()
        .all(|o| o.worker_id.starts_with("process-") && o.worker_id.contains("/thread-")));
    assert!(outcomes[4]
        .error
        .as_deref()
        .unwrap()
        .contains("task 4 rejected"));
    assert!(outcomes[5].error.is_none());
}

#[test]
fn test_aborted_child_leaves_lost_task() {
    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let engine = process_engine(
        TaggedPipeline::new(1).with_fault(Fault::Abort(1)),
        WorkerMode::Processes { processes: 2 },
    );

    let result = engine.run(tagged_source(6));

    match result {
        Err(EngineError::LostTasks {
            expected,
            completed,
            lost,
        }) => {
            assert_eq!(expected, 6);
            assert_eq!(completed, 5);
            assert_eq!(lost, vec![1]);
        }
        other => panic!("expected lost tasks, got {other:?}"),
    }
    assert_eq!(engine.sink().len(), 5);
}

#[test]
fn test_process_run_reports_child_exits() {
    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let run = start_processes(
        tagged_source(4),
        Arc::new(TaggedPipeline::new(2)),
        ProcessPoolOptions::new(2, 1, 1),
    )
    .unwrap();
    let report = run.join_all().unwrap();

    assert_eq!(report.done_count, 4);
    assert!(report.lost.is_empty());
    assert!(!report.producer_aborted);
    assert_eq!(report.children.len(), 2);
    assert!(report
        .children
        .iter()
        .all(|(_, exit)| *exit == ChildExit::Finished));
}

#[test]
fn test_hybrid_with_semaphore_queue() {
    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let engine = TaskEngine::new(
        TaggedPipeline::new(2),
        DefaultEngineConfig::new(4)
            .with_queue_capacity(1)
            .with_sync_strategy(SyncStrategy::Semaphore)
            .with_worker_mode(WorkerMode::Hybrid {
                processes: 2,
                threads_per_process: 3,
            })
            .with_progress_reporting(false),
        NoOpProgressReporter::new(),
        MemoryResultSink::new(),
    );

    let completed = engine.run(tagged_source(15)).unwrap();

    assert_eq!(completed.done_count, 15);
    assert!(completed.lost.is_empty());
    for outcome in engine.sink().sorted_outcomes() {
        assert_eq!(outcome.final_outputs, expected_doubled(outcome.task_id, 2));
    }
}

#[test]
fn test_process_mode_reports_live_progress() {
    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut reporter = MockProgressReporter::new();
    reporter.expect_report_started().return_const(());
    reporter.expect_report_error().return_const(());
    reporter
        .expect_report_completed()
        .withf(|done, errors| *done == 6 && *errors == 0)
        .times(1)
        .return_const(());
    {
        let seen = Arc::clone(&seen);
        reporter
            .expect_report_progress()
            .returning(move |done, total| seen.lock().unwrap().push((done, total)));
    }

    let engine = TaskEngine::new(
        TaggedPipeline::new(2),
        DefaultEngineConfig::new(4)
            .with_queue_capacity(2)
            .with_worker_mode(WorkerMode::Processes { processes: 2 }),
        reporter,
        MemoryResultSink::new(),
    );
    engine.run(tagged_source(6)).unwrap();

    // 子の回収中に共有トラッカーから通知され、結果の読み出し時には重複しない
    let seen = seen.lock().unwrap();
    assert_eq!(seen.last(), Some(&(6, 6)));
    assert!(seen.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert!(seen.iter().all(|&(_, total)| total == 6));
}

#[test]
fn test_small_cnn_in_processes_matches_threads() {
    let _guard = FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let shape = ModelShape::default().with_input_size(8);
    let run = |mode: WorkerMode| {
        let engine = TaskEngine::new(
            CnnPipeline::patterned(shape).unwrap(),
            DefaultEngineConfig::new(2)
                .with_workers(2)
                .with_queue_capacity(2)
                .with_worker_mode(mode)
                .with_progress_reporting(false),
            NoOpProgressReporter::new(),
            MemoryResultSink::new(),
        );
        engine.run(SpikeInputSource::new(4, &shape)).unwrap();
        engine
            .sink()
            .sorted_outcomes()
            .into_iter()
            .map(|o| o.final_outputs)
            .collect::<Vec<_>>()
    };

    let threads = run(WorkerMode::Threads);
    let processes = run(WorkerMode::Processes { processes: 2 });

    assert_eq!(threads.len(), 4);
    assert_eq!(threads, processes);
}
