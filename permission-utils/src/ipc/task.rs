use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::{Result, UtilsError};

struct TaskState<T> {
    result: Option<Result<T>>,
    finished: bool,
    waker: Option<Waker>,
}

struct TaskSlot<T> {
    mutex: Mutex<TaskState<T>>,
    cond: Condvar,
}

impl<T> TaskSlot<T> {
    fn finish(&self, result: Result<T>) {
        let waker = {
            let mut guard = self.mutex.lock().unwrap();
            guard.result = Some(result);
            guard.finished = true;
            guard.waker.take()
        };
        self.cond.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

pub(super) fn pair<T>() -> (TaskCompleter<T>, TaskHandle<T>) {
    let slot = Arc::new(TaskSlot {
        mutex: Mutex::new(TaskState {
            result: None,
            finished: false,
            waker: None,
        }),
        cond: Condvar::new(),
    });
    (
        TaskCompleter {
            slot: Some(slot.clone()),
        },
        TaskHandle { slot },
    )
}

/// The worker side of a [`TaskHandle`]
///
/// If a completer is dropped without completing (the job was dropped without
/// running) the handle resolves to [`UtilsError::TaskDropped`].
pub(super) struct TaskCompleter<T> {
    slot: Option<Arc<TaskSlot<T>>>,
}

impl<T> TaskCompleter<T> {
    pub fn complete(mut self, result: Result<T>) {
        if let Some(slot) = self.slot.take() {
            slot.finish(result);
        }
    }
}

impl<T> Drop for TaskCompleter<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.finish(Err(UtilsError::TaskDropped));
        }
    }
}

/// A handle to the result of a task submitted to an
/// [`IpcDispatcher`](super::IpcDispatcher)
///
/// The result can be collected either by blocking with [`TaskHandle::join()`]
/// or by `.await`ing the handle from any async executor. Dropping the handle
/// doesn't cancel the task.
#[must_use = "dropping a TaskHandle discards the task's result"]
pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    /// Whether the task has run to completion (or panicked)
    pub fn is_finished(&self) -> bool {
        self.slot.mutex.lock().unwrap().finished
    }

    /// Blocks the calling thread until the task has finished
    ///
    /// Returns the task's return value, or [`UtilsError::TaskPanicked`] if
    /// the task panicked.
    pub fn join(self) -> Result<T> {
        let mut guard = self.slot.mutex.lock().unwrap();
        while !guard.finished {
            guard = self.slot.cond.wait(guard).unwrap();
        }
        guard.result.take().unwrap_or(Err(UtilsError::TaskDropped))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.slot.mutex.lock().unwrap();
        if guard.finished {
            return Poll::Ready(guard.result.take().unwrap_or(Err(UtilsError::TaskDropped)));
        }
        match &guard.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => guard.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}
