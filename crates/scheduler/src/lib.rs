//! Roadbook Scheduler Library
//!
//! Threads and coordination primitives for page loading: a bounded I/O pool
//! for renders, a serial executor for ordered window loads, duplicate call
//! suppression and cooperative cancellation.
//!
//! # Example
//!
//! ```
//! use roadbook_scheduler::{CancellationToken, IoPool, IoPoolConfig};
//! use std::time::Duration;
//!
//! let pool = IoPool::new(IoPoolConfig::new(2)).unwrap();
//! let token = CancellationToken::new();
//!
//! let rendered = pool.run_with_timeout(&token, Duration::from_secs(1), || "page 0");
//! assert_eq!(rendered, Ok("page 0"));
//!
//! pool.shutdown();
//! ```

mod cancel;
mod error;
mod pool;
mod serial;
mod single_flight;

pub use cancel::CancellationToken;
pub use error::{SchedulerError, WaitError};
pub use pool::{IoPool, IoPoolConfig, TaskHandle};
pub use serial::SerialExecutor;
pub use single_flight::SingleFlight;
