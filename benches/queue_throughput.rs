//! 有界キュー実装間のスループット比較ベンチマーク
//!
//! 条件変数版とセマフォ版で、1プロデューサー・複数コンシューマーの受け渡しを測定

use cnn_pool::compute::{CnnPipeline, IdentityPipeline, ModelShape, UniformInputSource};
use cnn_pool::core::{SyncStrategy, TaskId};
use cnn_pool::engine::{BoundedQueue, Dequeued, SemaphoreQueue, TaskEngine, TaskQueue};
use cnn_pool::services::{DefaultEngineConfig, LogResultSink, NoOpProgressReporter};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ITEMS: usize = 10_000;

/// 1プロデューサーが ITEMS 件を投入し、consumers 個のスレッドが全て取り出すまで
fn hand_off(queue: Arc<dyn TaskQueue<TaskId>>, consumers: usize) -> usize {
    let handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut taken = 0;
                while let Ok(Dequeued::Item(id)) = queue.dequeue() {
                    std::hint::black_box(id);
                    taken += 1;
                }
                taken
            })
        })
        .collect();

    for id in 0..ITEMS {
        queue.enqueue(id).unwrap();
    }
    queue.close().unwrap();

    handles.into_iter().map(|h| h.join().unwrap()).sum()
}

/// キュー単体のベンチマーク
fn benchmark_queue_hand_off(c: &mut Criterion) {
    let mut group = c.benchmark_group("Queue Hand-off");
    group.measurement_time(Duration::from_secs(10));

    for consumers in [1, 4] {
        for capacity in [2, 64] {
            let label = format!("{consumers}c/cap{capacity}");

            group.bench_with_input(BenchmarkId::new("Condvar", &label), &capacity, |b, &cap| {
                b.iter(|| {
                    let queue: Arc<dyn TaskQueue<TaskId>> =
                        Arc::new(BoundedQueue::new(cap).unwrap());
                    std::hint::black_box(hand_off(queue, consumers))
                })
            });

            group.bench_with_input(BenchmarkId::new("Semaphore", &label), &capacity, |b, &cap| {
                b.iter(|| {
                    let queue: Arc<dyn TaskQueue<TaskId>> =
                        Arc::new(SemaphoreQueue::new(cap).unwrap());
                    std::hint::black_box(hand_off(queue, consumers))
                })
            });
        }
    }

    group.finish();
}

/// エンジン全体のベンチマーク
fn benchmark_engine_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("Engine Run");
    group.sample_size(20);

    for strategy in [SyncStrategy::Condvar, SyncStrategy::Semaphore] {
        group.bench_function(format!("Identity/{strategy:?}"), |b| {
            let engine = TaskEngine::new(
                IdentityPipeline::new(16),
                DefaultEngineConfig::new(4)
                    .with_queue_capacity(2)
                    .with_sync_strategy(strategy)
                    .with_progress_reporting(false),
                NoOpProgressReporter::new(),
                LogResultSink::new(),
            );
            b.iter(|| std::hint::black_box(engine.run(UniformInputSource::new(1_000)).unwrap()))
        });
    }

    let shape = ModelShape::default().with_input_size(32);
    group.bench_function("Cnn32/Condvar", |b| {
        let engine = TaskEngine::new(
            CnnPipeline::patterned(shape).unwrap(),
            DefaultEngineConfig::new(4)
                .with_queue_capacity(2)
                .with_progress_reporting(false),
            NoOpProgressReporter::new(),
            LogResultSink::new(),
        );
        b.iter(|| std::hint::black_box(engine.run(UniformInputSource::new(16)).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, benchmark_queue_hand_off, benchmark_engine_run);
criterion_main!(benches);
