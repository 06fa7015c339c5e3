// Process Pool - フォークしたワーカープロセス群
// 子プロセスは共有アリーナに接続してワーカーループを実行し、_exit で終了する。
// 親はプロデューサーを動かし、waitpid で全ての子を回収してから結果を読み出す

use super::{SharedArena, SharedTaskQueue};
use crate::core::{
    ComputePipeline, EngineError, EngineResult, SyncStrategy, TaskId, TaskOutcome, TaskSource,
};
use crate::engine::consumer::run_worker;
use crate::engine::producer::produce;
use crate::engine::queue::TaskQueue;
use crate::engine::tracker::CompletionTracker;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_ATTACH_FAILED: i32 = 2;
const EXIT_WORKER_FAILED: i32 = 3;
const EXIT_PANICKED: i32 = 4;

/// 親が子の終了と進捗を見回る間隔
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 子プロセスの終了状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Finished,
    AttachFailed,
    WorkerFailed,
    Panicked,
    Code(i32),
    Signaled(i32),
    /// waitpid 自体が失敗した
    Unknown,
}

impl ChildExit {
    fn from_status(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            match libc::WEXITSTATUS(status) {
                EXIT_OK => Self::Finished,
                EXIT_ATTACH_FAILED => Self::AttachFailed,
                EXIT_WORKER_FAILED => Self::WorkerFailed,
                EXIT_PANICKED => Self::Panicked,
                code => Self::Code(code),
            }
        } else if libc::WIFSIGNALED(status) {
            Self::Signaled(libc::WTERMSIG(status))
        } else {
            Self::Unknown
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// プロセスモードの実行結果
#[derive(Debug)]
pub struct ArenaReport {
    /// Done に到達したタスクの結果（ID 順）
    pub outcomes: Vec<TaskOutcome>,
    /// Done に到達しなかったタスク
    pub lost: Vec<TaskId>,
    pub done_count: usize,
    pub error_count: usize,
    pub children: Vec<(libc::pid_t, ChildExit)>,
    pub producer_aborted: bool,
}

/// プロセスプールの構成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessPoolOptions {
    pub processes: usize,
    /// 1 なら純粋なプロセスモード、2 以上ならハイブリッド
    pub threads_per_process: usize,
    pub queue_capacity: usize,
    pub sync_strategy: SyncStrategy,
}

impl ProcessPoolOptions {
    pub fn new(processes: usize, threads_per_process: usize, queue_capacity: usize) -> Self {
        Self {
            processes,
            threads_per_process,
            queue_capacity,
            sync_strategy: SyncStrategy::Condvar,
        }
    }

    pub fn with_sync_strategy(mut self, sync_strategy: SyncStrategy) -> Self {
        self.sync_strategy = sync_strategy;
        self
    }
}

/// 実行中のプロセスプール
pub struct ProcessRun {
    arena: Arc<SharedArena>,
    queue: SharedTaskQueue,
    children: Vec<libc::pid_t>,
    producer: JoinHandle<EngineResult<usize>>,
}

/// 子プロセスを全てフォークした後、親側でプロデューサースレッドを起動する
pub fn start_processes<S, P>(
    source: S,
    pipeline: Arc<P>,
    options: ProcessPoolOptions,
) -> EngineResult<ProcessRun>
where
    S: TaskSource + 'static,
    P: ComputePipeline + ?Sized + 'static,
{
    if options.processes == 0 || options.threads_per_process == 0 {
        return Err(EngineError::configuration(
            "プロセス数とプロセス毎のスレッド数は1以上である必要があります",
        ));
    }

    let arena = Arc::new(SharedArena::create_with_strategy(
        source.task_count(),
        options.queue_capacity,
        pipeline.input_len(),
        pipeline.output_len(),
        options.sync_strategy,
    )?);
    fork_workers(arena, source, pipeline, options)
}

/// 初期化済みアリーナの上で子をフォークし、プロデューサーを起動する
fn fork_workers<S, P>(
    arena: Arc<SharedArena>,
    source: S,
    pipeline: Arc<P>,
    options: ProcessPoolOptions,
) -> EngineResult<ProcessRun>
where
    S: TaskSource + 'static,
    P: ComputePipeline + ?Sized + 'static,
{
    let ProcessPoolOptions {
        processes,
        threads_per_process,
        ..
    } = options;
    let queue = SharedTaskQueue::new(Arc::clone(&arena));

    let mut children = Vec::with_capacity(processes);
    for index in 0..processes {
        // SAFETY: 子では共有アリーナとパイプライン以外に触れず、必ず _exit で抜ける
        match unsafe { libc::fork() } {
            -1 => {
                let error = std::io::Error::last_os_error();
                // 既に起動した子を終わらせてから失敗を返す
                queue.close()?;
                reap_children(&children);
                return Err(EngineError::spawn(format!("worker process {index}"), error));
            }
            0 => {
                let code = child_main(&arena, pipeline.as_ref(), threads_per_process);
                // SAFETY: 親から継承した状態のデストラクタを走らせずに終了する
                unsafe { libc::_exit(code) }
            }
            pid => children.push(pid),
        }
    }
    tracing::info!(
        processes,
        threads_per_process,
        sync_strategy = ?options.sync_strategy,
        "worker processes forked"
    );

    let producer = {
        let arena = Arc::clone(&arena);
        let queue = queue.clone();
        thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || produce(&source, arena.as_ref(), &queue))
    };
    let producer = match producer {
        Ok(handle) => handle,
        Err(e) => {
            queue.close()?;
            reap_children(&children);
            return Err(EngineError::spawn("producer", e));
        }
    };

    Ok(ProcessRun {
        arena,
        queue,
        children,
        producer,
    })
}

impl ProcessRun {
    pub fn child_pids(&self) -> &[libc::pid_t] {
        &self.children
    }

    /// 全ての子を回収し、プロデューサーを合流させ、アリーナから結果を読み出す
    pub fn join_all(self) -> EngineResult<ArenaReport> {
        self.join_all_with_progress(|_| {})
    }

    /// `join_all` と同じだが、子の回収を待つ間に完了数が変わるたび `on_progress` を呼ぶ
    pub fn join_all_with_progress<F>(self, mut on_progress: F) -> EngineResult<ArenaReport>
    where
        F: FnMut(usize),
    {
        let children = poll_children(&self.children, self.arena.tracker(), &mut on_progress);

        // 全ワーカーが消えた後もプロデューサーが満杯のキューで待っている可能性がある
        self.queue.abort()?;

        let producer_aborted = match self.producer.join() {
            Ok(Ok(enqueued)) => {
                tracing::debug!(enqueued, "producer joined");
                false
            }
            Ok(Err(EngineError::ProducerAborted { task_id })) => {
                tracing::warn!(task_id, "producer aborted: no worker process left");
                true
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(EngineError::WorkerPanicked {
                    worker: "producer".to_string(),
                })
            }
        };

        let (outcomes, lost) = self.arena.collect_outcomes();
        let tracker = self.arena.tracker();
        Ok(ArenaReport {
            outcomes,
            lost,
            done_count: tracker.done_count(),
            error_count: tracker.error_count(),
            children,
            producer_aborted,
        })
    }
}

fn log_exit(pid: libc::pid_t, exit: ChildExit) {
    if exit.is_success() {
        tracing::debug!(pid, "worker process exited");
    } else {
        tracing::warn!(pid, ?exit, "worker process exited abnormally");
    }
}

/// waitpid で子を1つずつ回収する（EINTR は再試行）
fn reap_children(children: &[libc::pid_t]) -> Vec<(libc::pid_t, ChildExit)> {
    children
        .iter()
        .map(|&pid| {
            let exit = wait_for(pid);
            log_exit(pid, exit);
            (pid, exit)
        })
        .collect()
}

/// WNOHANG で子の終了を見回りながら、共有トラッカーの完了数を通知する
fn poll_children(
    children: &[libc::pid_t],
    tracker: &CompletionTracker,
    on_progress: &mut dyn FnMut(usize),
) -> Vec<(libc::pid_t, ChildExit)> {
    let mut exits: Vec<Option<ChildExit>> = vec![None; children.len()];
    let mut reported = 0;
    loop {
        for (exit, &pid) in exits.iter_mut().zip(children) {
            if exit.is_none() {
                *exit = try_wait(pid);
                if let Some(exit) = *exit {
                    log_exit(pid, exit);
                }
            }
        }

        // 全員の終了を確認した後に読むので、最後の通知は最終値になる
        let done = tracker.done_count();
        if done != reported {
            reported = done;
            on_progress(done);
        }
        if exits.iter().all(Option::is_some) {
            break;
        }
        thread::sleep(PROGRESS_POLL_INTERVAL);
    }

    children
        .iter()
        .zip(exits)
        .map(|(&pid, exit)| (pid, exit.unwrap_or(ChildExit::Unknown)))
        .collect()
}

/// 終了済みなら終了状態を返す。まだ動いていれば None
fn try_wait(pid: libc::pid_t) -> Option<ChildExit> {
    let mut status: libc::c_int = 0;
    // SAFETY: 自分がフォークした子の pid
    let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if result == pid {
        return Some(ChildExit::from_status(status));
    }
    if result == 0 {
        return None;
    }
    let error = std::io::Error::last_os_error();
    if error.kind() == std::io::ErrorKind::Interrupted {
        return None;
    }
    tracing::error!(pid, %error, "waitpid failed");
    Some(ChildExit::Unknown)
}

fn wait_for(pid: libc::pid_t) -> ChildExit {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: 自分がフォークした子の pid
        let result = unsafe { libc::waitpid(pid, &mut status, 0) };
        if result == pid {
            return ChildExit::from_status(status);
        }
        let error = std::io::Error::last_os_error();
        if error.kind() != std::io::ErrorKind::Interrupted {
            tracing::error!(pid, %error, "waitpid failed");
            return ChildExit::Unknown;
        }
    }
}

/// 子プロセスのエントリポイント。戻り値は終了コード
fn child_main<P>(arena: &Arc<SharedArena>, pipeline: &P, threads: usize) -> i32
where
    P: ComputePipeline + ?Sized,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| run_child(arena, pipeline, threads)));
    match result {
        Ok(Ok(_)) => EXIT_OK,
        Ok(Err(EngineError::AttachError { .. })) => EXIT_ATTACH_FAILED,
        Ok(Err(_)) => EXIT_WORKER_FAILED,
        Err(_) => EXIT_PANICKED,
    }
}

fn run_child<P>(arena: &Arc<SharedArena>, pipeline: &P, threads: usize) -> EngineResult<usize>
where
    P: ComputePipeline + ?Sized,
{
    arena.attach()?;
    let pid = std::process::id();
    let queue = SharedTaskQueue::new(Arc::clone(arena));

    if threads == 1 {
        let worker_id = format!("process-{pid}");
        return run_worker(
            &worker_id,
            &queue,
            arena.as_ref(),
            pipeline,
            arena.tracker(),
            |_| {},
        );
    }

    thread::scope(|scope| {
        let handles = (0..threads)
            .map(|t| {
                let queue = &queue;
                let worker_id = format!("process-{pid}/thread-{t}");
                thread::Builder::new()
                    .name(worker_id.clone())
                    .spawn_scoped(scope, move || {
                        run_worker(
                            &worker_id,
                            queue,
                            arena.as_ref(),
                            pipeline,
                            arena.tracker(),
                            |_| {},
                        )
                    })
                    .map_err(|e| EngineError::spawn("worker thread", e))
            })
            .collect::<EngineResult<Vec<_>>>();

        // 起動済みのスレッドはスコープ終了時に join される
        let handles = handles?;
        let mut processed = 0;
        for (t, handle) in handles.into_iter().enumerate() {
            processed += handle.join().map_err(|_| EngineError::WorkerPanicked {
                worker: format!("process-{pid}/thread-{t}"),
            })??;
        }
        Ok(processed)
    })
}
