// プロセス間共有の同期プリミティブ
// pthread の mutex / condvar を PTHREAD_PROCESS_SHARED 属性で、
// POSIX セマフォを pshared = 1 で共有メモリ上に初期化する

use crate::core::{EngineError, EngineResult};
use std::cell::UnsafeCell;
use std::ptr;

fn check_init(primitive: &'static str, code: libc::c_int) -> EngineResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(EngineError::SyncInitError { primitive, code })
    }
}

fn check_op(operation: &'static str, code: libc::c_int) -> EngineResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(EngineError::SyncError { operation, code })
    }
}

/// プロセス共有 mutex
#[repr(C)]
pub struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: pthread_mutex_t は PTHREAD_PROCESS_SHARED で初期化され、
// 全ての操作は pthread 関数経由で行われる。
unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

impl SharedMutex {
    /// 共有メモリ上の未初期化領域に mutex を構築する
    ///
    /// # Safety
    ///
    /// `this` は書き込み可能で `SharedMutex` として整列された領域を指し、
    /// まだ誰も使用していないこと。フォーク後の子プロセスから呼んではならない。
    pub unsafe fn init_at(this: *mut SharedMutex) -> EngineResult<()> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        check_init("pthread_mutexattr_init", libc::pthread_mutexattr_init(&mut attr))?;

        let result = check_init(
            "pthread_mutexattr_setpshared",
            libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED),
        )
        .and_then(|_| {
            let inner = UnsafeCell::raw_get(ptr::addr_of!((*this).inner));
            check_init("pthread_mutex_init", libc::pthread_mutex_init(inner, &attr))
        });

        libc::pthread_mutexattr_destroy(&mut attr);
        result
    }

    pub fn lock(&self) -> EngineResult<SharedMutexGuard<'_>> {
        // SAFETY: init_at 済みの mutex
        let code = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        check_op("pthread_mutex_lock", code)?;
        Ok(SharedMutexGuard { mutex: self })
    }

    /// # Safety
    ///
    /// 全てのプロセス・スレッドが使用を終えた後、所有者が一度だけ呼ぶこと。
    pub unsafe fn destroy(&self) {
        libc::pthread_mutex_destroy(self.inner.get());
    }
}

/// ロック保持中を表す RAII ガード
pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: lock() 成功時にのみ生成される
        let code = unsafe { libc::pthread_mutex_unlock(self.mutex.inner.get()) };
        if code != 0 {
            tracing::error!(code, "pthread_mutex_unlock failed");
        }
    }
}

/// プロセス共有条件変数
#[repr(C)]
pub struct SharedCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

// SAFETY: SharedMutex と同様
unsafe impl Send for SharedCondvar {}
unsafe impl Sync for SharedCondvar {}

impl SharedCondvar {
    /// # Safety
    ///
    /// `SharedMutex::init_at` と同じ条件
    pub unsafe fn init_at(this: *mut SharedCondvar) -> EngineResult<()> {
        let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
        check_init("pthread_condattr_init", libc::pthread_condattr_init(&mut attr))?;

        let result = check_init(
            "pthread_condattr_setpshared",
            libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED),
        )
        .and_then(|_| {
            let inner = UnsafeCell::raw_get(ptr::addr_of!((*this).inner));
            check_init("pthread_cond_init", libc::pthread_cond_init(inner, &attr))
        });

        libc::pthread_condattr_destroy(&mut attr);
        result
    }

    /// ガードの mutex を解放して待機し、起床時に再取得する
    pub fn wait(&self, guard: &mut SharedMutexGuard<'_>) -> EngineResult<()> {
        // SAFETY: guard は対応する mutex をロック中
        let code = unsafe { libc::pthread_cond_wait(self.inner.get(), guard.mutex.inner.get()) };
        check_op("pthread_cond_wait", code)
    }

    pub fn notify_one(&self) -> EngineResult<()> {
        let code = unsafe { libc::pthread_cond_signal(self.inner.get()) };
        check_op("pthread_cond_signal", code)
    }

    pub fn notify_all(&self) -> EngineResult<()> {
        let code = unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
        check_op("pthread_cond_broadcast", code)
    }

    /// # Safety
    ///
    /// `SharedMutex::destroy` と同じ条件
    pub unsafe fn destroy(&self) {
        libc::pthread_cond_destroy(self.inner.get());
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(-1)
}

/// プロセス共有の計数セマフォ
#[repr(C)]
pub struct SharedSemaphore {
    inner: UnsafeCell<libc::sem_t>,
}

// SAFETY: sem_t は pshared = 1 で初期化され、操作は sem_* 関数経由のみ
unsafe impl Send for SharedSemaphore {}
unsafe impl Sync for SharedSemaphore {}

impl SharedSemaphore {
    /// # Safety
    ///
    /// `SharedMutex::init_at` と同じ条件
    pub unsafe fn init_at(this: *mut SharedSemaphore, value: usize) -> EngineResult<()> {
        let value = libc::c_uint::try_from(value).map_err(|_| EngineError::SyncInitError {
            primitive: "sem_init",
            code: libc::EINVAL,
        })?;
        let inner = UnsafeCell::raw_get(ptr::addr_of!((*this).inner));
        if libc::sem_init(inner, 1, value) == 0 {
            Ok(())
        } else {
            Err(EngineError::SyncInitError {
                primitive: "sem_init",
                code: last_errno(),
            })
        }
    }

    /// P 操作。シグナルによる中断は再試行する
    pub fn wait(&self) -> EngineResult<()> {
        loop {
            // SAFETY: init_at 済みのセマフォ
            if unsafe { libc::sem_wait(self.inner.get()) } == 0 {
                return Ok(());
            }
            let code = last_errno();
            if code != libc::EINTR {
                return Err(EngineError::SyncError {
                    operation: "sem_wait",
                    code,
                });
            }
        }
    }

    /// V 操作
    pub fn post(&self) -> EngineResult<()> {
        if unsafe { libc::sem_post(self.inner.get()) } == 0 {
            Ok(())
        } else {
            Err(EngineError::SyncError {
                operation: "sem_post",
                code: last_errno(),
            })
        }
    }

    pub fn value(&self) -> EngineResult<usize> {
        let mut value: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.inner.get(), &mut value) } == 0 {
            Ok(value.max(0) as usize)
        } else {
            Err(EngineError::SyncError {
                operation: "sem_getvalue",
                code: last_errno(),
            })
        }
    }

    /// # Safety
    ///
    /// `SharedMutex::destroy` と同じ条件
    pub unsafe fn destroy(&self) {
        libc::sem_destroy(self.inner.get());
    }
}
