use std::io;

/// Errors from handing work to an executor
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The executor has been shut down and accepts no more work
    #[error("executor is shut down")]
    ShutDown,

    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Errors from waiting on submitted work
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("work was cancelled")]
    Cancelled,

    #[error("work did not finish in time")]
    TimedOut,

    /// The task panicked or its worker went away without a result
    #[error("worker lost before producing a result")]
    WorkerLost,

    #[error("executor is shut down")]
    ShutDown,
}

impl From<SchedulerError> for WaitError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ShutDown => WaitError::ShutDown,
            SchedulerError::Spawn(_) => WaitError::WorkerLost,
        }
    }
}
