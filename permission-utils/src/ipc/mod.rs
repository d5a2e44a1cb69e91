//! A fixed size worker pool for background work that makes binder calls.
//!
//! Every binder transaction needs space in the process's binder buffer while
//! it is in flight, and that buffer is shared by all threads in the process.
//! If too many threads issue transactions at once, transactions may fail. For
//! instance, if a user has several child profiles, fetching the installed
//! packages of each profile in parallel is enough to exhaust the buffer.
//!
//! [`IpcDispatcher`] bounds that parallelism by construction: there are never
//! more than [`IPC_THREAD_POOL_COUNT`] workers (by default) and excess work
//! waits in a FIFO queue instead of racing for buffer space.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use crate::error::{panic_message, Result, UtilsError};

mod task;
pub use task::TaskHandle;

/// The number of threads in the IPC thread pool.
///
/// This is deliberately conservative, see the module docs.
pub const IPC_THREAD_POOL_COUNT: usize = 4;

const DEFAULT_THREAD_NAME_PREFIX: &str = "ipc";

/// Configuration for an [`IpcDispatcher`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpcConfig {
    /// Number of worker threads. Zero is treated as one.
    pub threads: usize,

    /// Workers are named `"{thread_name_prefix}-{index}"`
    pub thread_name_prefix: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            threads: IPC_THREAD_POOL_COUNT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl IpcConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct DispatcherState {
    queue: VecDeque<Job>,
    active: usize,
    shutdown: bool,
}

struct Shared {
    mutex: Mutex<DispatcherState>,
    cond: Condvar,
}

/// A fixed size pool of worker threads for IPC bound tasks
///
/// Tasks are started in submission order, at most [`IpcDispatcher::threads()`]
/// at a time. There is no way to cancel a task once it has been submitted.
///
/// Dropping the dispatcher is equivalent to calling [`IpcDispatcher::shutdown()`].
pub struct IpcDispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Mutex<Vec<ThreadId>>,
    threads: usize,
}

impl std::fmt::Debug for IpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.shared.mutex.lock().unwrap();
        f.debug_struct("IpcDispatcher")
            .field("threads", &self.threads)
            .field("queued", &guard.queue.len())
            .field("active", &guard.active)
            .field("shutdown", &guard.shutdown)
            .finish()
    }
}

impl IpcDispatcher {
    pub fn new(config: IpcConfig) -> Result<Self> {
        let threads = config.threads.max(1);
        if threads != config.threads {
            log::warn!("IPC dispatcher configured with 0 threads, using 1");
        }

        let dispatcher = Self {
            shared: Arc::new(Shared {
                mutex: Mutex::new(DispatcherState::default()),
                cond: Condvar::new(),
            }),
            workers: Mutex::new(Vec::with_capacity(threads)),
            worker_ids: Mutex::new(Vec::with_capacity(threads)),
            threads,
        };

        for index in 0..threads {
            let shared = dispatcher.shared.clone();
            // On failure, dropping `dispatcher` stops the workers spawned so far
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || worker_loop(shared))
                .map_err(UtilsError::ThreadSpawn)?;
            dispatcher.worker_ids.lock().unwrap().push(handle.thread().id());
            dispatcher.workers.lock().unwrap().push(handle);
        }
        log::debug!("Started IPC dispatcher with {threads} workers");

        Ok(dispatcher)
    }

    /// Creates a dispatcher with [`IPC_THREAD_POOL_COUNT`] workers
    pub fn with_default_threads() -> Result<Self> {
        Self::new(IpcConfig::default())
    }

    /// Queues `task` to run on one of the workers
    ///
    /// This never blocks. A panic inside `task` is caught and reported through
    /// the returned [`TaskHandle`]; it doesn't affect any other task.
    ///
    /// Fails with [`UtilsError::DispatcherShutDown`] after
    /// [`IpcDispatcher::shutdown()`].
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (completer, handle) = task::pair();
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                let msg = panic_message(&*payload);
                log::error!("IPC task panicked: {msg}");
                UtilsError::TaskPanicked(msg)
            });
            completer.complete(result);
        });

        let mut guard = self.shared.mutex.lock().unwrap();
        if guard.shutdown {
            return Err(UtilsError::DispatcherShutDown);
        }
        guard.queue.push_back(job);
        log::trace!(
            "Queued IPC task ({} queued, {} active)",
            guard.queue.len(),
            guard.active
        );
        drop(guard);
        self.shared.cond.notify_one();

        Ok(handle)
    }

    /// The number of worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// The number of submitted tasks that haven't started yet
    pub fn queued(&self) -> usize {
        self.shared.mutex.lock().unwrap().queue.len()
    }

    /// The number of tasks currently running
    pub fn active(&self) -> usize {
        self.shared.mutex.lock().unwrap().active
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.mutex.lock().unwrap().shutdown
    }

    /// Stops accepting new tasks, waits for queued and running tasks to
    /// finish and then joins all workers.
    ///
    /// Calling this more than once, or concurrently from several threads, is
    /// harmless and every caller waits for the queue to drain. When called
    /// from one of the dispatcher's own workers, that worker can't be joined
    /// and the call returns without waiting.
    pub fn shutdown(&self) {
        {
            let mut guard = self.shared.mutex.lock().unwrap();
            if !guard.shutdown {
                log::debug!(
                    "Shutting down IPC dispatcher ({} queued, {} active)",
                    guard.queue.len(),
                    guard.active
                );
            }
            guard.shutdown = true;
        }
        self.shared.cond.notify_all();

        let current = thread::current().id();
        if self.worker_ids.lock().unwrap().contains(&current) {
            log::warn!("IPC dispatcher shut down from its own worker, not waiting for it");
            return;
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if worker.join().is_err() {
                log::error!("IPC worker exited with a panic");
            }
        }

        // Only the first caller gets to join the workers, later callers
        // wait for the same drained state instead
        let mut guard = self.shared.mutex.lock().unwrap();
        while !guard.queue.is_empty() || guard.active > 0 {
            guard = self.shared.cond.wait(guard).unwrap();
        }
    }
}

impl Drop for IpcDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    log::trace!("IPC worker started");
    loop {
        let job = {
            let mut guard = shared.mutex.lock().unwrap();
            loop {
                if let Some(job) = guard.queue.pop_front() {
                    guard.active += 1;
                    break job;
                }
                if guard.shutdown {
                    log::trace!("IPC worker exiting");
                    return;
                }
                guard = shared.cond.wait(guard).unwrap();
            }
        };

        let _active = ActiveJob(&shared);
        // Task panics are already caught in `IpcDispatcher::submit`, this
        // catches panics while completing the handle (e.g. dropping the result)
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            log::error!("Panic while completing IPC task: {}", panic_message(&*payload));
        }
    }
}

/// Decrements the active job count when a job ends, however it ends
struct ActiveJob<'a>(&'a Shared);

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.0.mutex.lock().unwrap().active -= 1;
        self.0.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn test_default_config() {
        let config = IpcConfig::default();
        assert_eq!(config.threads, 4);
        assert_eq!(config.thread_name_prefix, "ipc");

        let dispatcher = IpcDispatcher::with_default_threads().unwrap();
        assert_eq!(dispatcher.threads(), IPC_THREAD_POOL_COUNT);
    }

    #[test]
    fn test_zero_threads_is_clamped() {
        let dispatcher = IpcDispatcher::new(IpcConfig::default().with_threads(0)).unwrap();
        assert_eq!(dispatcher.threads(), 1);
        assert_eq!(dispatcher.submit(|| 7).unwrap().join().unwrap(), 7);
    }

    #[test]
    fn test_fifth_task_waits_for_a_free_worker() {
        let dispatcher = IpcDispatcher::with_default_threads().unwrap();
        let (started_tx, started_rx) = mpsc::channel();

        let mut releases = Vec::new();
        let mut handles = Vec::new();
        for id in 0..5 {
            let (release_tx, release_rx) = mpsc::channel::<()>();
            let started_tx = started_tx.clone();
            handles.push(
                dispatcher
                    .submit(move || {
                        started_tx.send(id).unwrap();
                        release_rx.recv().unwrap();
                        id
                    })
                    .unwrap(),
            );
            releases.push(release_tx);
        }

        let mut started: Vec<i32> = (0..4)
            .map(|_| started_rx.recv_timeout(TIMEOUT).unwrap())
            .collect();
        started.sort();
        assert_eq!(started, vec![0, 1, 2, 3]);
        assert!(started_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(dispatcher.active(), 4);
        assert_eq!(dispatcher.queued(), 1);

        releases[0].send(()).unwrap();
        assert_eq!(started_rx.recv_timeout(TIMEOUT).unwrap(), 4);

        for release in &releases[1..] {
            release.send(()).unwrap();
        }
        let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_concurrency_never_exceeds_pool_size() {
        let dispatcher = IpcDispatcher::with_default_threads().unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                dispatcher
                    .submit(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= IPC_THREAD_POOL_COUNT);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_task_does_not_poison_pool() {
        let dispatcher = IpcDispatcher::new(IpcConfig::default().with_threads(1)).unwrap();

        let failed = dispatcher.submit(|| -> u32 { panic!("binder died") }).unwrap();
        match failed.join() {
            Err(UtilsError::TaskPanicked(msg)) => assert!(msg.contains("binder died")),
            other => panic!("unexpected result: {other:?}"),
        }

        // The only worker must still be alive
        let ok = dispatcher.submit(|| 42).unwrap();
        assert_eq!(ok.join().unwrap(), 42);
        assert_eq!(dispatcher.active(), 0);
    }

    #[test]
    fn test_task_errors_are_returned_to_the_caller() {
        let dispatcher = IpcDispatcher::with_default_threads().unwrap();
        let handle = dispatcher.submit(|| "nope".parse::<u32>()).unwrap();
        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn test_shutdown_drains_queue_and_rejects_new_tasks() {
        let dispatcher = IpcDispatcher::new(IpcConfig::default().with_threads(2)).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let done = done.clone();
                dispatcher
                    .submit(move || {
                        thread::sleep(Duration::from_millis(2));
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        assert_eq!(done.load(Ordering::SeqCst), 8);
        for handle in handles {
            assert!(handle.is_finished());
            handle.join().unwrap();
        }

        assert!(matches!(dispatcher.submit(|| ()), Err(UtilsError::DispatcherShutDown)));

        // Idempotent
        dispatcher.shutdown();
    }

    #[test]
    fn test_panic_while_dropping_result_keeps_worker() {
        struct PanicOnDrop;
        impl Drop for PanicOnDrop {
            fn drop(&mut self) {
                panic!("result dropped");
            }
        }

        let dispatcher = IpcDispatcher::new(IpcConfig::default().with_threads(1)).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let gate = dispatcher.submit(move || release_rx.recv().unwrap()).unwrap();

        // With its handle gone, the result is dropped on the worker
        drop(dispatcher.submit(|| PanicOnDrop).unwrap());
        release_tx.send(()).unwrap();
        gate.join().unwrap();

        let ok = dispatcher.submit(|| 42).unwrap();
        assert_eq!(ok.join().unwrap(), 42);

        dispatcher.shutdown();
        assert_eq!(dispatcher.active(), 0);
    }

    #[test]
    fn test_concurrent_shutdown_waits_for_running_tasks() {
        let dispatcher = Arc::new(IpcDispatcher::new(IpcConfig::default().with_threads(1)).unwrap());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = dispatcher
            .submit(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
            .unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let first = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || dispatcher.shutdown())
        };
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            release_tx.send(()).unwrap();
        });

        thread::sleep(Duration::from_millis(100));
        dispatcher.shutdown();
        assert!(handle.is_finished());
        assert_eq!(dispatcher.active(), 0);

        first.join().unwrap();
        releaser.join().unwrap();
    }

    #[test]
    fn test_shutdown_from_own_worker_returns() {
        let dispatcher = Arc::new(IpcDispatcher::new(IpcConfig::default().with_threads(2)).unwrap());
        let inner = dispatcher.clone();
        dispatcher.submit(move || inner.shutdown()).unwrap().join().unwrap();
        assert!(dispatcher.is_shut_down());
    }

    #[test]
    fn test_worker_thread_names() {
        let dispatcher =
            IpcDispatcher::new(IpcConfig::default().with_thread_name_prefix("pkg-fetch")).unwrap();
        let name = dispatcher
            .submit(|| thread::current().name().map(str::to_string))
            .unwrap()
            .join()
            .unwrap()
            .unwrap();
        assert!(name.starts_with("pkg-fetch-"), "unexpected name {name}");
    }

    #[test]
    fn test_dispatcher_is_send_sync() {
        fn needs_send_sync<T: Send + Sync>() {}
        needs_send_sync::<IpcDispatcher>();
        needs_send_sync::<TaskHandle<u32>>();
    }
}
