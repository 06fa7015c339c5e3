// スレッドモードのエンドツーエンドシナリオ

use crate::fixtures::{expected_doubled, tagged_source, Fault, TaggedPipeline};
use cnn_pool::compute::{CnnPipeline, IdentityPipeline, ModelShape, UniformInputSource};
use cnn_pool::core::{EngineError, SyncStrategy, TaskId, TaskOutcome};
use cnn_pool::engine::collector::spawn_result_collector;
use cnn_pool::engine::consumer::spawn_workers;
use cnn_pool::engine::producer::spawn_producer;
use cnn_pool::engine::{
    start, BoundedQueue, CompletionTracker, Dequeued, SemaphoreQueue, TaskEngine, TaskPool,
    TaskQueue,
};
use cnn_pool::services::{DefaultEngineConfig, MemoryResultSink, NoOpProgressReporter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn quiet_config(workers: usize, capacity: usize) -> DefaultEngineConfig {
    DefaultEngineConfig::new(4)
        .with_workers(workers)
        .with_queue_capacity(capacity)
        .with_progress_reporting(false)
}

#[test]
fn test_identity_batch_respects_capacity() {
    // 容量2・5タスク・2ワーカー: 全出力が入力と一致し、同時に3件以上バッファされない
    let queue = Arc::new(BoundedQueue::<TaskId>::new(2).unwrap());
    let dyn_queue: Arc<dyn TaskQueue<TaskId>> = queue.clone();
    let pool = Arc::new(TaskPool::new(5, 3));
    let tracker = Arc::new(CompletionTracker::new(5));
    let sink = Arc::new(MemoryResultSink::new());
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<TaskOutcome>();

    let collector = spawn_result_collector(
        result_rx,
        5,
        Arc::new(NoOpProgressReporter::new()),
        Arc::clone(&sink),
        false,
    )
    .unwrap();
    let workers = spawn_workers(
        2,
        Arc::clone(&dyn_queue),
        Arc::clone(&pool),
        Arc::new(IdentityPipeline::new(3)),
        Arc::clone(&tracker),
        result_tx,
    )
    .unwrap();
    let producer = spawn_producer(UniformInputSource::new(5), Arc::clone(&pool), dyn_queue).unwrap();

    assert_eq!(producer.join().unwrap().unwrap(), 5);
    let processed: usize = workers
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .sum();
    let stats = collector.join().unwrap().unwrap();

    assert_eq!(processed, 5);
    assert_eq!(stats.received, 5);
    assert!(tracker.is_complete());
    assert!(queue.high_water_mark() <= 2);
    assert!(pool.unfinished().is_empty());
    for outcome in sink.sorted_outcomes() {
        let n = (outcome.task_id + 1) as f64;
        assert_eq!(outcome.final_outputs, vec![n; 3]);
        assert!(outcome.worker_id.starts_with("thread-"));
    }
}

#[test]
fn test_single_worker_sees_fifo_then_closed() {
    // 容量1・3タスク・1ワーカー: 0,1,2 の順で取り出し、その後 Closed
    let queue = Arc::new(BoundedQueue::<TaskId>::new(1).unwrap());

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for id in 0..3 {
                queue.enqueue(id).unwrap();
            }
            queue.close().unwrap();
        })
    };

    let mut seen = Vec::new();
    loop {
        match queue.dequeue().unwrap() {
            Dequeued::Item(id) => seen.push(id),
            Dequeued::Closed => break,
        }
    }
    producer.join().unwrap();

    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(queue.dequeue().unwrap(), Dequeued::Closed);
    assert_eq!(queue.high_water_mark(), 1);
}

#[test]
fn test_zero_tasks_finish_immediately() {
    let running = start(UniformInputSource::new(0), IdentityPipeline::new(2), 3, 2).unwrap();
    let sink = running.sink().clone();

    let completed = running.join_all().unwrap();

    assert_eq!(completed.expected, 0);
    assert_eq!(completed.done_count, 0);
    assert!(completed.is_complete());
    assert!(sink.is_empty());
    assert!(sink.is_finalized());
}

#[test]
fn test_failed_task_is_done_and_others_succeed() {
    let engine = TaskEngine::new(
        TaggedPipeline::new(2).with_fault(Fault::Fail(2)),
        quiet_config(2, 2),
        NoOpProgressReporter::new(),
        MemoryResultSink::new(),
    );

    let completed = engine.run(tagged_source(5)).unwrap();

    assert_eq!(completed.done_count, 5);
    assert_eq!(completed.error_count, 1);
    let outcomes = engine.sink().sorted_outcomes();
    assert_eq!(outcomes.len(), 5);
    for outcome in outcomes {
        if outcome.task_id == 2 {
            assert!(outcome.error.as_deref().unwrap().contains("task 2 rejected"));
            assert!(outcome.final_outputs.is_empty());
        } else {
            assert!(outcome.error.is_none());
            assert_eq!(outcome.final_outputs, expected_doubled(outcome.task_id, 2));
        }
    }
}

#[test]
fn test_semaphore_strategy_matches_condvar() {
    let run = |strategy: SyncStrategy| {
        let engine = TaskEngine::new(
            TaggedPipeline::new(4),
            quiet_config(3, 2).with_sync_strategy(strategy),
            NoOpProgressReporter::new(),
            MemoryResultSink::new(),
        );
        let completed = engine.run(tagged_source(20)).unwrap();
        assert_eq!(completed.done_count, 20);
        engine
            .sink()
            .sorted_outcomes()
            .into_iter()
            .map(|outcome| outcome.final_outputs)
            .collect::<Vec<_>>()
    };

    assert_eq!(run(SyncStrategy::Condvar), run(SyncStrategy::Semaphore));
}

#[test]
fn test_semaphore_queue_shutdown_releases_all_consumers() {
    let queue = Arc::new(SemaphoreQueue::<TaskId>::new(2).unwrap());
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue().unwrap())
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    queue.close().unwrap();
    queue.close().unwrap();

    for consumer in consumers {
        assert_eq!(consumer.join().unwrap(), Dequeued::Closed);
    }
}

#[test]
fn test_many_workers_take_each_task_once() {
    let engine = TaskEngine::new(
        TaggedPipeline::new(1),
        quiet_config(8, 3),
        NoOpProgressReporter::new(),
        MemoryResultSink::new(),
    );

    let completed = engine.run(tagged_source(200)).unwrap();

    assert_eq!(completed.done_count, 200);
    assert_eq!(
        engine.sink().sorted_task_ids(),
        (0..200).collect::<Vec<TaskId>>()
    );
}

#[test]
fn test_worker_panic_reports_lost_task() {
    let engine = TaskEngine::new(
        TaggedPipeline::new(1).with_fault(Fault::Panic(3)),
        quiet_config(2, 2),
        NoOpProgressReporter::new(),
        MemoryResultSink::new(),
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
            assert_eq!(lost, vec![3]);
        }
        other => panic!("expected lost tasks, got {other:?}"),
    }
    // 完了分の結果はシンクに届いている
    assert_eq!(engine.sink().sorted_task_ids(), vec![0, 1, 2, 4, 5]);
}

fn run_with_sole_worker_panicking(strategy: SyncStrategy) {
    // 唯一のワーカーが最初のタスクで死ぬ: プロデューサーは満杯のキューで止まる
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let engine = TaskEngine::new(
            TaggedPipeline::new(1).with_fault(Fault::Panic(0)),
            quiet_config(1, 1).with_sync_strategy(strategy),
            NoOpProgressReporter::new(),
            MemoryResultSink::new(),
        );
        let _ = done_tx.send(engine.run(tagged_source(5)));
    });

    let result = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("engine hung after its only worker died");
    match result {
        Err(EngineError::LostTasks {
            expected,
            completed,
            lost,
        }) => {
            assert_eq!(expected, 5);
            assert_eq!(completed, 0);
            assert_eq!(lost, vec![0, 1, 2, 3, 4]);
        }
        other => panic!("expected lost tasks, got {other:?}"),
    }
}

#[test]
fn test_all_workers_dead_releases_blocked_producer() {
    run_with_sole_worker_panicking(SyncStrategy::Condvar);
}

#[test]
fn test_all_workers_dead_releases_blocked_producer_with_semaphores() {
    run_with_sole_worker_panicking(SyncStrategy::Semaphore);
}

#[test]
fn test_small_cnn_runs_end_to_end() {
    let shape = ModelShape::default().with_input_size(8);
    let engine = TaskEngine::new(
        CnnPipeline::patterned(shape).unwrap(),
        quiet_config(2, 2),
        NoOpProgressReporter::new(),
        MemoryResultSink::new(),
    );

    let completed = engine.run(UniformInputSource::new(3)).unwrap();

    assert_eq!(completed.done_count, 3);
    let outcomes = engine.sink().sorted_outcomes();
    assert!(outcomes.iter().all(|o| o.final_outputs.len() == shape.fc2_size));
    // 入力が大きいほど出力も大きい（重み・バイアスは非負）
    assert!(outcomes[2].final_outputs[0] > outcomes[0].final_outputs[0]);
}
