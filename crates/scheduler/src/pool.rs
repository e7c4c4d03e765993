//! Bounded I/O thread pool
//!
//! Page renders are I/O-bound and must never run on the caller's thread.
//! [`IoPool`] owns a fixed set of named worker threads fed from one FIFO
//! queue. Callers either fire and forget with [`IoPool::execute`], or submit
//! work and wait on the returned [`TaskHandle`] with a deadline and a
//! cancellation token.
//!
//! A task that outlives its waiter keeps running to completion on its
//! worker; its result is dropped. Task panics are caught and logged so one
//! bad page cannot take a worker down.

use crate::{CancellationToken, SchedulerError, WaitError};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Longest a waiter blocks before re-checking its cancellation token
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Configuration for an [`IoPool`]
#[derive(Debug, Clone)]
pub struct IoPoolConfig {
    /// Number of worker threads. Default: 2.
    pub num_threads: usize,

    /// Worker thread name; multi-threaded pools append `-<id>`.
    pub thread_name: String,
}

impl Default for IoPoolConfig {
    fn default() -> Self {
        Self { num_threads: 2, thread_name: "roadbook-io".to_string() }
    }
}

impl IoPoolConfig {
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads, ..Self::default() }
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Fixed-size pool of worker threads
pub struct IoPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_ids: Vec<ThreadId>,
}

impl IoPool {
    /// Start a pool; a thread count of zero is raised to one
    pub fn new(config: IoPoolConfig) -> Result<Self, SchedulerError> {
        let num_threads = config.num_threads.max(1);
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(num_threads);
        for id in 0..num_threads {
            let name = if num_threads == 1 {
                config.thread_name.clone()
            } else {
                format!("{}-{}", config.thread_name, id)
            };
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(name)
                .spawn(move || Self::run(receiver))
                .map_err(SchedulerError::Spawn)?;
            workers.push(worker);
        }

        let thread_ids = workers.iter().map(|w| w.thread().id()).collect();
        tracing::debug!(threads = num_threads, name = %config.thread_name, "started I/O pool");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            thread_ids,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.thread_ids.len()
    }

    /// Whether the calling thread is one of this pool's workers
    pub fn owns_current_thread(&self) -> bool {
        self.thread_ids.contains(&thread::current().id())
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queue work without waiting for it
    pub fn execute<F>(&self, f: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(SchedulerError::ShutDown)?;
        sender.send(Box::new(f)).map_err(|_| SchedulerError::ShutDown)
    }

    /// Queue work and get a handle to its result
    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.execute(move || {
            // A panic drops `tx`, which the waiter sees as a lost worker.
            let value = f();
            let _ = tx.send(value);
        })?;
        Ok(TaskHandle { receiver: rx })
    }

    /// Run `f` on the pool and wait for it, bounded by `timeout` and `token`
    ///
    /// Work that is still queued when the token fires is skipped.
    pub fn run_with_timeout<T, F>(
        &self,
        token: &CancellationToken,
        timeout: Duration,
        f: F,
    ) -> Result<T, WaitError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if token.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        let task_token = token.clone();
        let handle = self.submit(move || (!task_token.is_cancelled()).then(f))?;
        handle.wait(token, timeout)?.ok_or(WaitError::Cancelled)
    }

    /// Stop accepting work, drain the queue and join the workers
    ///
    /// Idempotent. When called from a worker, that worker is not joined.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("I/O worker exited abnormally");
            }
        }
        tracing::debug!("I/O pool shut down");
    }

    fn run(receiver: Arc<Mutex<Receiver<Task>>>) {
        loop {
            let task = receiver.lock().recv();
            let Ok(task) = task else {
                break;
            };

            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(
                    thread = thread::current().name().unwrap_or("unnamed"),
                    panic = panic_message(panic.as_ref()),
                    "task panicked"
                );
            }
        }
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to the result of work queued with [`IoPool::submit`]
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the result until `timeout` elapses or `token` fires
    pub fn wait(self, token: &CancellationToken, timeout: Duration) -> Result<T, WaitError> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if token.is_cancelled() {
                return Err(WaitError::Cancelled);
            }

            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(WaitError::TimedOut);
                    }
                    remaining.min(WAIT_SLICE)
                }
                None => WAIT_SLICE,
            };

            match self.receiver.recv_timeout(slice) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(WaitError::WorkerLost),
            }
        }
    }

    /// Wait for the result with no deadline
    pub fn join(self) -> Result<T, WaitError> {
        self.receiver.recv().map_err(|_| WaitError::WorkerLost)
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
