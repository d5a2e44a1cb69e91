//! Main (UI) thread assertions
//!
//! Some helpers must only ever run on the thread that owns the UI. Calling
//! them from anywhere else is a programming error, so [`MainThread::ensure()`]
//! and [`ensure_main_thread()`] panic instead of returning an error.

use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use crate::error::{Result, UtilsError};

const NOT_ON_MAIN_THREAD: &str = "Only meant to be used on the main thread";

/// Identifies the designated main thread of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MainThread {
    id: ThreadId,
}

impl MainThread {
    /// Designates the calling thread as the main thread
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Assert that an operation is running on the main thread
    ///
    /// # Panics
    ///
    /// If called from any other thread.
    #[track_caller]
    pub fn ensure(&self) {
        assert!(self.is_current(), "{}", NOT_ON_MAIN_THREAD);
    }

    /// Like [`MainThread::ensure()`] but reports the violation as an error
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            log::error!("{operation}: {NOT_ON_MAIN_THREAD}");
            Err(UtilsError::NonMainThread(operation.to_string()))
        }
    }
}

static PROCESS_MAIN_THREAD: OnceLock<MainThread> = OnceLock::new();

/// Records the calling thread as the process's main thread
///
/// Calling this again from the same thread is a no-op, calling it from a
/// different thread fails with [`UtilsError::MainThreadAlreadyPrepared`].
pub fn prepare_main_thread() -> Result<MainThread> {
    let current = MainThread::current();
    let main = *PROCESS_MAIN_THREAD.get_or_init(|| {
        log::debug!("Prepared main thread {:?}", current.id);
        current
    });
    if main == current {
        Ok(main)
    } else {
        Err(UtilsError::MainThreadAlreadyPrepared)
    }
}

/// The thread recorded by [`prepare_main_thread()`], if any
pub fn main_thread() -> Option<MainThread> {
    PROCESS_MAIN_THREAD.get().copied()
}

/// Assert that an operation is running on the process's main thread
///
/// # Panics
///
/// If called from a thread other than the one recorded with
/// [`prepare_main_thread()`], or if no main thread has been prepared.
#[track_caller]
pub fn ensure_main_thread() {
    match main_thread() {
        Some(main) => main.ensure(),
        None => panic!("{NOT_ON_MAIN_THREAD} (no main thread has been prepared)"),
    }
}

/// Whether the calling thread is the initial thread of the process
///
/// On Linux based systems (including Android) the initial thread's id is the
/// same as the process id.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn is_process_main_thread() -> bool {
    // SAFETY: neither call has preconditions and both always succeed
    let (tid, pid) = unsafe { (libc::syscall(libc::SYS_gettid), libc::getpid()) };
    tid == pid as libc::c_long
}
