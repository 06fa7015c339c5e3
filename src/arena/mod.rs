// Shared Arena - プロセス間共有メモリ領域
// 1回の mmap(MAP_SHARED | MAP_ANONYMOUS) にキュー・同期プリミティブ・カウンター・タスクレコードを配置する
//
// 構築手順: 確保 -> 共有属性でプリミティブ初期化 -> ready フラグ設定 -> fork -> 子プロセスで attach
// 子プロセスはプリミティブを再初期化してはならない

pub mod process_pool;
pub mod queue;
pub mod sync;

pub use process_pool::{start_processes, ArenaReport, ChildExit, ProcessPoolOptions, ProcessRun};
pub use queue::SharedTaskQueue;

use crate::core::{
    ComputePipeline, EngineError, EngineResult, PipelineError, SyncStrategy, TaskId, TaskOutcome,
    TaskSource, TaskState,
};
use crate::engine::consumer::TaskStore;
use crate::engine::producer::TaskInputs;
use crate::engine::tracker::CompletionTracker;
use queue::QueueState;
use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

const ARENA_MAGIC: u64 = u64::from_be_bytes(*b"CNNPOOL\0");
const ARENA_VERSION: u32 = 1;

/// タスクレコードに保持するエラーメッセージの最大バイト数
pub const ERROR_TEXT_LEN: usize = 160;
/// タスクレコードに保持するワーカーIDの最大バイト数
pub const WORKER_TEXT_LEN: usize = 48;

#[repr(C)]
struct ArenaHeader {
    magic: u64,
    version: u32,
    ready: AtomicU32,
    task_count: usize,
    capacity: usize,
    input_len: usize,
    output_len: usize,
}

/// InProgress の所有者だけが書き込む領域
#[repr(C)]
struct RecordBody {
    error_len: u32,
    worker_len: u32,
    error: [u8; ERROR_TEXT_LEN],
    worker: [u8; WORKER_TEXT_LEN],
}

#[repr(C)]
struct TaskRecord {
    state: AtomicU32,
    body: UnsafeCell<RecordBody>,
}

/// 各領域のオフセット
#[derive(Debug, Clone, Copy)]
struct ArenaLayout {
    size: usize,
    queue: usize,
    tracker: usize,
    records: usize,
    slots: usize,
    inputs: usize,
    outputs: usize,
}

impl ArenaLayout {
    fn compute(
        task_count: usize,
        capacity: usize,
        input_len: usize,
        output_len: usize,
    ) -> EngineResult<Self> {
        let too_large = || EngineError::configuration("共有アリーナのサイズが上限を超えています");
        let input_total = task_count.checked_mul(input_len).ok_or_else(too_large)?;
        let output_total = task_count.checked_mul(output_len).ok_or_else(too_large)?;

        let layout = Layout::new::<ArenaHeader>();
        let (layout, queue) = layout
            .extend(Layout::new::<QueueState>())
            .map_err(|_| too_large())?;
        let (layout, tracker) = layout
            .extend(Layout::new::<CompletionTracker>())
            .map_err(|_| too_large())?;
        let (layout, records) = Layout::array::<TaskRecord>(task_count)
            .and_then(|records| layout.extend(records))
            .map_err(|_| too_large())?;
        let (layout, slots) = Layout::array::<TaskId>(capacity)
            .and_then(|slots| layout.extend(slots))
            .map_err(|_| too_large())?;
        let (layout, inputs) = Layout::array::<f64>(input_total)
            .and_then(|inputs| layout.extend(inputs))
            .map_err(|_| too_large())?;
        let (layout, outputs) = Layout::array::<f64>(output_total)
            .and_then(|outputs| layout.extend(outputs))
            .map_err(|_| too_large())?;

        Ok(Self {
            size: layout.pad_to_align().size(),
            queue,
            tracker,
            records,
            slots,
            inputs,
            outputs,
        })
    }
}

/// クロスプロセス版の共有メモリ領域
///
/// 所有者（作成したプロセス）のみが Drop でプリミティブを破棄し unmap する。
pub struct SharedArena {
    base: NonNull<u8>,
    layout: ArenaLayout,
    task_count: usize,
    capacity: usize,
    input_len: usize,
    output_len: usize,
    owner_pid: libc::pid_t,
}

// SAFETY: 共有状態への可変アクセスは全てプロセス共有 mutex、アトミック、
// もしくは InProgress の単一所有者規約のいずれかで保護される。
unsafe impl Send for SharedArena {}
unsafe impl Sync for SharedArena {}

impl SharedArena {
    /// 条件変数版キューのアリーナを確保する
    pub fn create(
        task_count: usize,
        capacity: usize,
        input_len: usize,
        output_len: usize,
    ) -> EngineResult<Self> {
        Self::create_with_strategy(
            task_count,
            capacity,
            input_len,
            output_len,
            SyncStrategy::Condvar,
        )
    }

    /// アリーナを確保し、全ての同期プリミティブをプロセス共有属性で初期化する
    pub fn create_with_strategy(
        task_count: usize,
        capacity: usize,
        input_len: usize,
        output_len: usize,
        sync_strategy: SyncStrategy,
    ) -> EngineResult<Self> {
        if capacity == 0 {
            return Err(EngineError::configuration(
                "キュー容量は1以上である必要があります",
            ));
        }
        let layout = ArenaLayout::compute(task_count, capacity, input_len, output_len)?;

        // SAFETY: 匿名共有マッピング。失敗時は MAP_FAILED が返る
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                layout.size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(EngineError::ArenaAllocationError {
                size: layout.size,
                source: std::io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(raw.cast::<u8>()).ok_or_else(|| {
            EngineError::ArenaAllocationError {
                size: layout.size,
                source: std::io::Error::other("mmap returned null"),
            }
        })?;

        let arena = Self {
            base,
            layout,
            task_count,
            capacity,
            input_len,
            output_len,
            owner_pid: unsafe { libc::getpid() },
        };

        // 匿名マッピングはゼロ初期化済み: レコードは Pending、リング位置は 0
        // SAFETY: fork 前で、この領域にアクセスするのは自分だけ
        unsafe {
            arena.header_ptr().write(ArenaHeader {
                magic: ARENA_MAGIC,
                version: ARENA_VERSION,
                ready: AtomicU32::new(0),
                task_count,
                capacity,
                input_len,
                output_len,
            });
            arena
                .at::<CompletionTracker>(layout.tracker)
                .write(CompletionTracker::new(task_count));
            let queue = arena.at::<QueueState>(layout.queue);
            if let Err(e) = QueueState::init_at(queue, capacity, sync_strategy) {
                libc::munmap(base.as_ptr().cast(), layout.size);
                std::mem::forget(arena);
                return Err(e);
            }
        }
        arena.header().ready.store(1, Ordering::Release);

        tracing::debug!(
            size = layout.size,
            task_count,
            capacity,
            ?sync_strategy,
            "shared arena ready"
        );
        Ok(arena)
    }

    /// フォーク後の接続: 初期化済みであることを検証するのみで、プリミティブには触れない
    pub fn attach(&self) -> EngineResult<()> {
        let header = self.header();
        if header.magic != ARENA_MAGIC {
            return Err(EngineError::attach("マジック番号が一致しません"));
        }
        if header.version != ARENA_VERSION {
            return Err(EngineError::attach(format!(
                "バージョン不一致: {}",
                header.version
            )));
        }
        if header.ready.load(Ordering::Acquire) != 1 {
            return Err(EngineError::attach("アリーナが未初期化です"));
        }
        if header.task_count != self.task_count
            || header.capacity != self.capacity
            || header.input_len != self.input_len
            || header.output_len != self.output_len
        {
            return Err(EngineError::attach("ヘッダーのサイズ情報が一致しません"));
        }
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.layout.size
    }

    pub fn tracker(&self) -> &CompletionTracker {
        // SAFETY: create で初期化済み。以降はアトミック操作のみ
        unsafe { &*self.at::<CompletionTracker>(self.layout.tracker) }
    }

    pub(crate) fn queue_state(&self) -> &QueueState {
        // SAFETY: create で初期化済み。可変フィールドは共有 mutex の内側
        unsafe { &*self.at::<QueueState>(self.layout.queue) }
    }

    /// リングのスロット配列の先頭（共有 mutex 保持中にのみ触れること）
    pub(crate) fn slots_ptr(&self) -> *mut TaskId {
        self.at::<TaskId>(self.layout.slots)
    }

    /// タスクの現在の状態
    pub fn task_state(&self, id: TaskId) -> EngineResult<TaskState> {
        let raw = self.record(id)?.state.load(Ordering::Acquire);
        TaskState::from_raw(raw)
            .ok_or_else(|| EngineError::task_state(id, format!("不正な状態値 {raw}")))
    }

    /// Done のタスクを結果として読み出し、それ以外を消失として返す
    ///
    /// 全ての子プロセスを回収した後に呼ぶこと。
    pub fn collect_outcomes(&self) -> (Vec<TaskOutcome>, Vec<TaskId>) {
        let mut outcomes = Vec::new();
        let mut lost = Vec::new();

        for id in 0..self.task_count {
            let Ok(record) = self.record(id) else {
                lost.push(id);
                continue;
            };
            if record.state.load(Ordering::Acquire) != TaskState::Done.as_raw() {
                lost.push(id);
                continue;
            }

            // SAFETY: Done 以降は読み取り専用
            let body = unsafe { &*record.body.get() };
            let error = (body.error_len > 0)
                .then(|| text_from(&body.error, body.error_len));
            let final_outputs = if error.is_some() {
                Vec::new()
            } else {
                unsafe { self.output_slice(id) }.to_vec()
            };
            outcomes.push(TaskOutcome {
                task_id: id,
                worker_id: text_from(&body.worker, body.worker_len),
                final_outputs,
                error,
            });
        }
        (outcomes, lost)
    }

    fn header_ptr(&self) -> *mut ArenaHeader {
        self.base.as_ptr().cast()
    }

    fn header(&self) -> &ArenaHeader {
        // SAFETY: create で書き込み済み
        unsafe { &*self.header_ptr() }
    }

    fn at<T>(&self, offset: usize) -> *mut T {
        // SAFETY: offset は ArenaLayout が計算した領域内の整列済み位置
        unsafe { self.base.as_ptr().add(offset).cast() }
    }

    fn record(&self, id: TaskId) -> EngineResult<&TaskRecord> {
        if id >= self.task_count {
            return Err(EngineError::task_state(id, "タスクプール範囲外"));
        }
        // SAFETY: 範囲チェック済み。ゼロ初期化されたレコードは有効な Pending
        Ok(unsafe { &*self.at::<TaskRecord>(self.layout.records).add(id) })
    }

    /// # Safety
    ///
    /// 呼び出し側がタスク `id` の入力を書き込む唯一の主体であること（投入前のプロデューサー）
    #[allow(clippy::mut_from_ref)]
    unsafe fn input_slice_mut(&self, id: TaskId) -> &mut [f64] {
        let start = self.at::<f64>(self.layout.inputs).add(id * self.input_len);
        std::slice::from_raw_parts_mut(start, self.input_len)
    }

    unsafe fn input_slice(&self, id: TaskId) -> &[f64] {
        let start = self.at::<f64>(self.layout.inputs).add(id * self.input_len);
        std::slice::from_raw_parts(start, self.input_len)
    }

    /// # Safety
    ///
    /// タスク `id` を InProgress で所有していること
    #[allow(clippy::mut_from_ref)]
    unsafe fn output_slice_mut(&self, id: TaskId) -> &mut [f64] {
        let start = self.at::<f64>(self.layout.outputs).add(id * self.output_len);
        std::slice::from_raw_parts_mut(start, self.output_len)
    }

    unsafe fn output_slice(&self, id: TaskId) -> &[f64] {
        let start = self.at::<f64>(self.layout.outputs).add(id * self.output_len);
        std::slice::from_raw_parts(start, self.output_len)
    }

    #[cfg(test)]
    fn corrupt_magic(&self) {
        unsafe { (*self.header_ptr()).magic = 0 };
    }
}

impl Drop for SharedArena {
    fn drop(&mut self) {
        // 子プロセスは _exit で抜けるが、念のため所有者以外は何もしない
        if unsafe { libc::getpid() } != self.owner_pid {
            return;
        }
        // SAFETY: 所有者であり、全ての子プロセスとスレッドは回収済み
        unsafe {
            self.queue_state().destroy();
            libc::munmap(self.base.as_ptr().cast(), self.layout.size);
        }
        tracing::debug!(size = self.layout.size, "shared arena unmapped");
    }
}

impl TaskInputs for SharedArena {
    fn initialize_input(&self, id: TaskId, source: &dyn TaskSource) -> EngineResult<()> {
        if self.task_state(id)? != TaskState::Pending {
            return Err(EngineError::task_state(id, "初期化は Pending のみ可能"));
        }
        // SAFETY: 投入前のタスクに書き込むのはプロデューサーのみ
        source.fill_input(id, unsafe { self.input_slice_mut(id) });
        Ok(())
    }
}

impl TaskStore for SharedArena {
    fn execute<P>(&self, id: TaskId, pipeline: &P, worker_id: &str) -> EngineResult<TaskOutcome>
    where
        P: ComputePipeline + ?Sized,
    {
        let record = self.record(id)?;
        record
            .state
            .compare_exchange(
                TaskState::Pending.as_raw(),
                TaskState::InProgress.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|raw| {
                EngineError::task_state(id, format!("二重取得: 状態 {:?}", TaskState::from_raw(raw)))
            })?;

        // SAFETY: CAS に成功したこのワーカーだけがタスクを所有する
        let input = unsafe { self.input_slice(id) };
        let result = pipeline.execute(input).and_then(|output| {
            if output.final_outputs.len() == self.output_len {
                Ok(output.final_outputs)
            } else {
                Err(PipelineError::ShapeMismatch {
                    expected: self.output_len,
                    actual: output.final_outputs.len(),
                })
            }
        });

        let body = unsafe { &mut *record.body.get() };
        body.worker_len = copy_text(&mut body.worker, worker_id);
        let (final_outputs, error) = match result {
            Ok(outputs) => {
                unsafe { self.output_slice_mut(id) }.copy_from_slice(&outputs);
                body.error_len = 0;
                (outputs, None)
            }
            Err(e) => {
                let message = e.to_string();
                body.error_len = copy_text(&mut body.error, &message);
                (Vec::new(), Some(message))
            }
        };
        record
            .state
            .store(TaskState::Done.as_raw(), Ordering::Release);

        Ok(TaskOutcome {
            task_id: id,
            worker_id: worker_id.to_string(),
            final_outputs,
            error,
        })
    }
}

/// 文字境界を保ったまま固定長バッファへ切り詰めてコピーし、書き込んだ長さを返す
fn copy_text(buffer: &mut [u8], text: &str) -> u32 {
    let mut end = text.len().min(buffer.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    buffer[..end].copy_from_slice(&text.as_bytes()[..end]);
    end as u32
}

fn text_from(buffer: &[u8], len: u32) -> String {
    let len = (len as usize).min(buffer.len());
    String::from_utf8_lossy(&buffer[..len]).into_owned()
}
