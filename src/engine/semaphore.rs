// セマフォ版 Bounded Queue
// 空き枠セマフォ（容量で初期化）と要素セマフォ（0で初期化）で有界性を表現する。
// クローズは要素セマフォへの「終了トークン」1つで通知し、
// 空のキューでトークンを受け取ったコンシューマーはトークンを戻してから Closed を返す。

use super::queue::{Dequeued, Ring, TaskQueue};
use crate::core::{EngineError, EngineResult};
use std::sync::{Condvar, Mutex, MutexGuard};

/// 計数セマフォ
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// 許可が得られるまでブロック（P操作）
    pub fn acquire(&self) -> EngineResult<()> {
        let mut permits = self.permits.lock().map_err(|_| poisoned())?;
        while *permits == 0 {
            permits = self.available.wait(permits).map_err(|_| poisoned())?;
        }
        *permits -= 1;
        Ok(())
    }

    /// 許可を1つ返却（V操作）
    pub fn release(&self) -> EngineResult<()> {
        let mut permits = self.permits.lock().map_err(|_| poisoned())?;
        *permits += 1;
        drop(permits);
        self.available.notify_one();
        Ok(())
    }

    pub fn available_permits(&self) -> usize {
        self.permits.lock().map(|p| *p).unwrap_or(0)
    }
}

fn poisoned() -> EngineError {
    EngineError::PoisonedError { what: "semaphore" }
}

/// 計数セマフォによる有界キュー
#[derive(Debug)]
pub struct SemaphoreQueue<T> {
    ring: Mutex<Ring<T>>,
    space: Semaphore,
    items: Semaphore,
}

impl<T> SemaphoreQueue<T> {
    pub fn new(capacity: usize) -> EngineResult<Self> {
        if capacity == 0 {
            return Err(EngineError::configuration(
                "キュー容量は1以上である必要があります",
            ));
        }
        Ok(Self {
            ring: Mutex::new(Ring::new(capacity)),
            space: Semaphore::new(capacity),
            items: Semaphore::new(0),
        })
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Ring<T>>> {
        self.ring.lock().map_err(|_| EngineError::PoisonedError {
            what: "semaphore queue",
        })
    }
}

impl<T> TaskQueue<T> for SemaphoreQueue<T>
where
    T: Send + Into<usize> + Copy,
{
    fn enqueue(&self, item: T) -> EngineResult<()> {
        self.space.acquire()?;
        let mut ring = self.lock()?;
        if ring.is_aborted() {
            drop(ring);
            self.space.release()?;
            return Err(EngineError::ProducerAborted {
                task_id: item.into(),
            });
        }
        if ring.is_closed() {
            drop(ring);
            // 他の待機中エンキューにも閉鎖を伝える
            self.space.release()?;
            return Err(EngineError::QueueClosedError {
                task_id: item.into(),
            });
        }
        ring.push(item);
        drop(ring);
        self.items.release()
    }

    fn dequeue(&self) -> EngineResult<Dequeued<T>> {
        self.items.acquire()?;
        let popped = {
            let mut ring = self.lock()?;
            if ring.is_aborted() {
                None
            } else {
                ring.pop()
            }
        };
        match popped {
            Some(item) => {
                self.space.release()?;
                Ok(Dequeued::Item(item))
            }
            None => {
                // 終了トークンを次の待機者へ
                self.items.release()?;
                Ok(Dequeued::Closed)
            }
        }
    }

    fn close(&self) -> EngineResult<()> {
        let first = self.lock()?.mark_closed();
        if !first {
            tracing::warn!("semaphore queue closed more than once");
            return Ok(());
        }
        self.items.release()?;
        self.space.release()
    }

    fn abort(&self) -> EngineResult<()> {
        if !self.lock()?.mark_aborted() {
            return Ok(());
        }
        // クローズと同じく、両方のセマフォにトークンを1つずつ流して待機者を順に解放する
        self.items.release()?;
        self.space.release()
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
