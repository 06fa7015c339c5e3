// Bounded Queue - 固定容量のリングバッファ
// Mutex 1つ + 条件変数2つ（not_full / not_empty）による有界バッファ

use crate::core::{EngineError, EngineResult};
use std::sync::{Condvar, Mutex, MutexGuard};

/// dequeue の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued<T> {
    /// 取り出したタスクハンドル
    Item(T),
    /// クローズ済みかつ空: これ以上の作業はない
    Closed,
}

/// 有界ブロッキングキューの契約
///
/// 格納するのはタスクプールへのハンドル（インデックス）であり、タスク本体ではない。
pub trait TaskQueue<T>: Send + Sync {
    /// 満杯の間ブロックし、末尾に挿入する
    fn enqueue(&self, item: T) -> EngineResult<()>;

    /// 空かつ未クローズの間ブロックする。クローズ済みかつ空なら即座に `Closed`
    fn dequeue(&self) -> EngineResult<Dequeued<T>>;

    /// クローズして待機中の全コンシューマーを起こす
    fn close(&self) -> EngineResult<()>;

    /// コンシューマーが全て消えた後にプロデューサーを解放する
    ///
    /// 以降の enqueue は `ProducerAborted`、dequeue はバッファの残りに関係なく `Closed` を返す。
    fn abort(&self) -> EngineResult<()>;

    /// 現在のバッファ内要素数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// これまでに観測された要素数の最大値
    fn high_water_mark(&self) -> usize;
}

/// リングバッファ本体（ロック内でのみ操作される）
#[derive(Debug)]
pub(crate) struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
    closed: bool,
    aborted: bool,
    high_water: usize,
}

impl<T> Ring<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            count: 0,
            closed: false,
            aborted: false,
            high_water: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water
    }

    /// 呼び出し側が空きを保証していること
    pub(crate) fn push(&mut self, item: T) {
        debug_assert!(!self.is_full());
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.slots.len();
        self.count += 1;
        self.high_water = self.high_water.max(self.count);
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        item
    }

    /// false -> true の一方向のみ。既にクローズ済みなら false を返す
    pub(crate) fn mark_closed(&mut self) -> bool {
        let first = !self.closed;
        self.closed = true;
        first
    }

    pub(crate) fn mark_aborted(&mut self) -> bool {
        let first = !self.aborted;
        self.aborted = true;
        first
    }
}

/// Mutex + Condvar による有界キュー（スレッド間共有用）
#[derive(Debug)]
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// 容量0はエラー
    pub fn new(capacity: usize) -> EngineResult<Self> {
        if capacity == 0 {
            return Err(EngineError::configuration(
                "キュー容量は1以上である必要があります",
            ));
        }
        Ok(Self {
            ring: Mutex::new(Ring::new(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Ring<T>>> {
        self.ring.lock().map_err(|_| EngineError::PoisonedError {
            what: "bounded queue",
        })
    }
}

impl<T> TaskQueue<T> for BoundedQueue<T>
where
    T: Send + Into<usize> + Copy,
{
    fn enqueue(&self, item: T) -> EngineResult<()> {
        let mut ring = self.lock()?;
        while ring.is_full() && !ring.is_closed() && !ring.is_aborted() {
            ring = self
                .not_full
                .wait(ring)
                .map_err(|_| EngineError::PoisonedError {
                    what: "bounded queue",
                })?;
        }
        if ring.is_aborted() {
            return Err(EngineError::ProducerAborted {
                task_id: item.into(),
            });
        }
        if ring.is_closed() {
            return Err(EngineError::QueueClosedError {
                task_id: item.into(),
            });
        }
        ring.push(item);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    fn dequeue(&self) -> EngineResult<Dequeued<T>> {
        let mut ring = self.lock()?;
        while ring.is_empty() && !ring.is_closed() && !ring.is_aborted() {
            ring = self
                .not_empty
                .wait(ring)
                .map_err(|_| EngineError::PoisonedError {
                    what: "bounded queue",
                })?;
        }
        if ring.is_aborted() {
            return Ok(Dequeued::Closed);
        }
        // クローズ後もバッファ内の残りは全て取り出す
        match ring.pop() {
            Some(item) => {
                drop(ring);
                self.not_full.notify_one();
                Ok(Dequeued::Item(item))
            }
            None => Ok(Dequeued::Closed),
        }
    }

    fn close(&self) -> EngineResult<()> {
        let first = self.lock()?.mark_closed();
        if !first {
            tracing::warn!("bounded queue closed more than once");
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
        Ok(())
    }

    fn abort(&self) -> EngineResult<()> {
        if self.lock()?.mark_aborted() {
            tracing::debug!("bounded queue aborted");
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
        Ok(())
    }

    fn len(&self) -> usize {
        self.ring.lock().map(|ring| ring.len()).unwrap_or(0)
    }

    fn capacity(&self) -> usize {
        self.ring.lock().map(|ring| ring.capacity()).unwrap_or(0)
    }

    fn high_water_mark(&self) -> usize {
        self.ring.lock().map(|ring| ring.high_water()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BoundedQueue::<usize>::new(0);
        assert!(matches!(
            result,
            Err(EngineError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(3).unwrap();
        for id in 0..3usize {
            queue.enqueue(id).unwrap();
        }
        queue.close().unwrap();

        assert_eq!(queue.dequeue().unwrap(), Dequeued::Item(0));
        assert_eq!(queue.dequeue().unwrap(), Dequeued::Item(1));
        assert_eq!(queue.dequeue().unwrap(), Dequeued::Item(2));
        assert_eq!(queue.dequeue().unwrap(), Dequeued::Closed);
    }

    #[test]
    fn test_closed_and_empty_never_blocks() {
        let queue = BoundedQueue::<usize>::new(1).unwrap();
        queue.close().unwrap();

        for _ in 0..5 {
            assert_eq!(queue.dequeue().unwrap(), Dequeued::Closed);
        }
    }

    #[test]
    fn test_enqueue_after_close_is_error() {
        let queue = BoundedQueue::new(2).unwrap();
        queue.close().unwrap();

        let result = queue.enqueue(7usize);
        assert!(matches!(
            result,
            Err(EngineError::QueueClosedError { task_id: 7 })
        ));
    }

    #[test]
    fn test_double_close_keeps_closed() {
        let queue = BoundedQueue::new(2).unwrap();
        queue.enqueue(1usize).unwrap();
        queue.close().unwrap();
        queue.close().unwrap();

        assert_eq!(queue.dequeue().unwrap(), Dequeued::Item(1));
        assert_eq!(queue.dequeue().unwrap(), Dequeued::Closed);
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let queue = Arc::new(BoundedQueue::<usize>::new(2).unwrap());

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.dequeue().unwrap())
            })
            .collect();

        // コンシューマーが待機状態に入るのを待つ
        thread::sleep(Duration::from_millis(50));
        queue.close().unwrap();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), Dequeued::Closed);
        }
    }

    #[test]
    fn test_producer_blocks_when_full() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());
        queue.enqueue(0usize).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(1usize))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.dequeue().unwrap(), Dequeued::Item(0));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.dequeue().unwrap(), Dequeued::Item(1));
        assert_eq!(queue.high_water_mark(), 1);
    }

    #[test]
    fn test_abort_releases_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());
        queue.enqueue(0usize).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(1usize))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        queue.abort().unwrap();

        assert!(matches!(
            producer.join().unwrap(),
            Err(EngineError::ProducerAborted { task_id: 1 })
        ));
        // 中断後はバッファに残っていても Closed
        assert_eq!(queue.dequeue().unwrap(), Dequeued::Closed);
        assert!(matches!(
            queue.enqueue(2usize),
            Err(EngineError::ProducerAborted { task_id: 2 })
        ));
    }

    #[test]
    fn test_count_never_exceeds_capacity() {
        let queue = Arc::new(BoundedQueue::new(2).unwrap());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for id in 0..200usize {
                    queue.enqueue(id).unwrap();
                }
                queue.close().unwrap();
            })
        };

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Dequeued::Item(id) = queue.dequeue().unwrap() {
                        assert!(queue.len() <= 2);
                        taken.push(id);
                    }
                    taken
                })
            })
            .collect();

        producer.join().unwrap();
        let mut all: Vec<usize> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();

        assert_eq!(all, (0..200).collect::<Vec<_>>());
        assert!(queue.high_water_mark() <= 2);
        assert_eq!(queue.capacity(), 2);
    }
}
