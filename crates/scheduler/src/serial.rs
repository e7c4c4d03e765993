//! Single-threaded executor with FIFO ordering
//!
//! Work handed to a [`SerialExecutor`] runs on one dedicated thread, one item
//! at a time, in submission order. Window loads go through it so their
//! results are published in the order they were requested, and document
//! loads started in the background never overlap.

use crate::pool::{IoPool, IoPoolConfig, TaskHandle};
use crate::SchedulerError;

/// Dedicated thread running queued work strictly in order
pub struct SerialExecutor {
    pool: IoPool,
}

impl SerialExecutor {
    pub fn new(thread_name: impl Into<String>) -> Result<Self, SchedulerError> {
        let pool = IoPool::new(IoPoolConfig::new(1).with_thread_name(thread_name))?;
        Ok(Self { pool })
    }

    pub fn execute<F>(&self, f: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(f)
    }

    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(f)
    }

    /// Whether the caller is already running on the executor thread
    pub fn is_current(&self) -> bool {
        self.pool.owns_current_thread()
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.is_shut_down()
    }

    /// Finish queued work and stop the thread
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
