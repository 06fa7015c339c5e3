// Shared Task Queue - 共有アリーナ上の有界キュー
// スレッド版 BoundedQueue / SemaphoreQueue と同じ契約。プリミティブはプロセス共有

use super::sync::{SharedCondvar, SharedMutex, SharedMutexGuard, SharedSemaphore};
use super::SharedArena;
use crate::core::{EngineError, EngineResult, SyncStrategy, TaskId};
use crate::engine::queue::{Dequeued, TaskQueue};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;

const STRATEGY_CONDVAR: u32 = 0;
const STRATEGY_SEMAPHORE: u32 = 1;

/// mutex の内側でのみ読み書きされるリング位置
#[repr(C)]
#[derive(Debug, Default)]
struct RingCursor {
    head: usize,
    tail: usize,
    count: usize,
    high_water: usize,
    closed: u32,
    aborted: u32,
}

/// アリーナに配置されるキュー状態
///
/// リング位置は常に mutex で守る。待機には strategy に応じて
/// 条件変数の組かセマフォの組（space = 空き、items = 格納数）のどちらか一方だけを使う。
#[repr(C)]
pub(crate) struct QueueState {
    strategy: u32,
    mutex: SharedMutex,
    not_full: SharedCondvar,
    not_empty: SharedCondvar,
    space: SharedSemaphore,
    items: SharedSemaphore,
    cursor: UnsafeCell<RingCursor>,
}

impl QueueState {
    /// # Safety
    ///
    /// fork 前に所有者が一度だけ呼ぶこと
    pub(crate) unsafe fn init_at(
        this: *mut QueueState,
        capacity: usize,
        strategy: SyncStrategy,
    ) -> EngineResult<()> {
        SharedMutex::init_at(ptr::addr_of_mut!((*this).mutex))?;
        match strategy {
            SyncStrategy::Condvar => {
                SharedCondvar::init_at(ptr::addr_of_mut!((*this).not_full))?;
                SharedCondvar::init_at(ptr::addr_of_mut!((*this).not_empty))?;
                ptr::addr_of_mut!((*this).strategy).write(STRATEGY_CONDVAR);
            }
            SyncStrategy::Semaphore => {
                SharedSemaphore::init_at(ptr::addr_of_mut!((*this).space), capacity)?;
                SharedSemaphore::init_at(ptr::addr_of_mut!((*this).items), 0)?;
                ptr::addr_of_mut!((*this).strategy).write(STRATEGY_SEMAPHORE);
            }
        }
        ptr::addr_of_mut!((*this).cursor).write(UnsafeCell::new(RingCursor::default()));
        Ok(())
    }

    pub(crate) fn strategy(&self) -> SyncStrategy {
        if self.strategy == STRATEGY_SEMAPHORE {
            SyncStrategy::Semaphore
        } else {
            SyncStrategy::Condvar
        }
    }

    /// # Safety
    ///
    /// 所有者が全プロセスの回収後に一度だけ呼ぶこと
    pub(crate) unsafe fn destroy(&self) {
        match self.strategy() {
            SyncStrategy::Condvar => {
                self.not_empty.destroy();
                self.not_full.destroy();
            }
            SyncStrategy::Semaphore => {
                self.items.destroy();
                self.space.destroy();
            }
        }
        self.mutex.destroy();
    }
}

/// ロック保持中のリング操作
struct Locked<'a> {
    guard: SharedMutexGuard<'a>,
    cursor: *mut RingCursor,
}

impl Locked<'_> {
    fn cursor(&self) -> &RingCursor {
        // SAFETY: mutex 保持中
        unsafe { &*self.cursor }
    }

    fn cursor_mut(&mut self) -> &mut RingCursor {
        // SAFETY: mutex 保持中
        unsafe { &mut *self.cursor }
    }

    fn push(&mut self, arena: &SharedArena, item: TaskId) {
        let capacity = arena.capacity();
        let slots = arena.slots_ptr();
        let cursor = self.cursor_mut();
        // SAFETY: tail < capacity、スロット配列は mutex で保護される
        unsafe { slots.add(cursor.tail).write(item) };
        cursor.tail = (cursor.tail + 1) % capacity;
        cursor.count += 1;
        cursor.high_water = cursor.high_water.max(cursor.count);
    }

    fn pop(&mut self, arena: &SharedArena) -> Option<TaskId> {
        let capacity = arena.capacity();
        let slots = arena.slots_ptr();
        let cursor = self.cursor_mut();
        if cursor.count == 0 {
            return None;
        }
        // SAFETY: head < capacity、count > 0
        let item = unsafe { slots.add(cursor.head).read() };
        cursor.head = (cursor.head + 1) % capacity;
        cursor.count -= 1;
        Some(item)
    }
}

/// 共有アリーナ上のキューへのハンドル
#[derive(Clone)]
pub struct SharedTaskQueue {
    arena: Arc<SharedArena>,
}

impl SharedTaskQueue {
    pub fn new(arena: Arc<SharedArena>) -> Self {
        Self { arena }
    }

    fn state(&self) -> &QueueState {
        self.arena.queue_state()
    }

    fn lock(&self) -> EngineResult<Locked<'_>> {
        let state = self.state();
        let guard = state.mutex.lock()?;
        Ok(Locked {
            guard,
            cursor: state.cursor.get(),
        })
    }

    fn wait(&self, condvar: &SharedCondvar, locked: &mut Locked<'_>) -> EngineResult<()> {
        condvar.wait(&mut locked.guard)
    }

    pub fn sync_strategy(&self) -> SyncStrategy {
        self.state().strategy()
    }

    pub fn is_aborted(&self) -> bool {
        self.lock()
            .map(|locked| locked.cursor().aborted != 0)
            .unwrap_or(false)
    }

    fn enqueue_condvar(&self, item: TaskId) -> EngineResult<()> {
        let capacity = self.arena.capacity();
        let mut locked = self.lock()?;
        loop {
            let cursor = locked.cursor();
            if cursor.aborted != 0 {
                return Err(EngineError::ProducerAborted { task_id: item });
            }
            if cursor.closed != 0 {
                return Err(EngineError::QueueClosedError { task_id: item });
            }
            if cursor.count < capacity {
                break;
            }
            self.wait(&self.state().not_full, &mut locked)?;
        }
        locked.push(&self.arena, item);
        drop(locked);

        self.state().not_empty.notify_one()
    }

    fn dequeue_condvar(&self) -> EngineResult<Dequeued<TaskId>> {
        let mut locked = self.lock()?;
        loop {
            let cursor = locked.cursor();
            if cursor.aborted != 0 {
                return Ok(Dequeued::Closed);
            }
            if cursor.count > 0 {
                break;
            }
            if cursor.closed != 0 {
                return Ok(Dequeued::Closed);
            }
            self.wait(&self.state().not_empty, &mut locked)?;
        }
        let popped = locked.pop(&self.arena);
        drop(locked);

        match popped {
            Some(item) => {
                self.state().not_full.notify_one()?;
                Ok(Dequeued::Item(item))
            }
            None => Ok(Dequeued::Closed),
        }
    }

    fn enqueue_semaphore(&self, item: TaskId) -> EngineResult<()> {
        let state = self.state();
        state.space.wait()?;
        let mut locked = self.lock()?;
        let cursor = locked.cursor();
        let refused = if cursor.aborted != 0 {
            Some(EngineError::ProducerAborted { task_id: item })
        } else if cursor.closed != 0 {
            Some(EngineError::QueueClosedError { task_id: item })
        } else {
            None
        };
        if let Some(error) = refused {
            drop(locked);
            // 終了トークンを他の待機中エンキューへ
            state.space.post()?;
            return Err(error);
        }
        locked.push(&self.arena, item);
        drop(locked);
        state.items.post()
    }

    fn dequeue_semaphore(&self) -> EngineResult<Dequeued<TaskId>> {
        let state = self.state();
        state.items.wait()?;
        let popped = {
            let mut locked = self.lock()?;
            if locked.cursor().aborted != 0 {
                None
            } else {
                locked.pop(&self.arena)
            }
        };
        match popped {
            Some(item) => {
                state.space.post()?;
                Ok(Dequeued::Item(item))
            }
            None => {
                // 終了トークンを次の待機者へ
                state.items.post()?;
                Ok(Dequeued::Closed)
            }
        }
    }

    /// クローズ・中断の後で両側の待機者を起こす
    fn wake_all(&self) -> EngineResult<()> {
        let state = self.state();
        match state.strategy() {
            SyncStrategy::Condvar => {
                state.not_empty.notify_all()?;
                state.not_full.notify_all()
            }
            SyncStrategy::Semaphore => {
                state.items.post()?;
                state.space.post()
            }
        }
    }
}

impl TaskQueue<TaskId> for SharedTaskQueue {
    fn enqueue(&self, item: TaskId) -> EngineResult<()> {
        match self.sync_strategy() {
            SyncStrategy::Condvar => self.enqueue_condvar(item),
            SyncStrategy::Semaphore => self.enqueue_semaphore(item),
        }
    }

    fn dequeue(&self) -> EngineResult<Dequeued<TaskId>> {
        match self.sync_strategy() {
            SyncStrategy::Condvar => self.dequeue_condvar(),
            SyncStrategy::Semaphore => self.dequeue_semaphore(),
        }
    }

    fn close(&self) -> EngineResult<()> {
        let first = {
            let mut locked = self.lock()?;
            let cursor = locked.cursor_mut();
            let first = cursor.closed == 0;
            cursor.closed = 1;
            first
        };
        if !first {
            tracing::warn!("shared queue closed more than once");
            // セマフォ版ではトークンを二重に流さない
            if self.sync_strategy() == SyncStrategy::Semaphore {
                return Ok(());
            }
        }
        self.wake_all()
    }

    /// 全ワーカーの消滅後にプロデューサーを解放する
    fn abort(&self) -> EngineResult<()> {
        let first = {
            let mut locked = self.lock()?;
            let cursor = locked.cursor_mut();
            let first = cursor.aborted == 0;
            cursor.aborted = 1;
            first
        };
        if first || self.sync_strategy() == SyncStrategy::Condvar {
            self.wake_all()?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock().map(|locked| locked.cursor().count).unwrap_or(0)
    }

    fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    fn high_water_mark(&self) -> usize {
        self.lock()
            .map(|locked| locked.cursor().high_water)
            .unwrap_or(0)
    }
}
