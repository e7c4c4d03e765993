//! Error types shared across the session layer

use crate::config::ConfigError;
use crate::store::StoreError;
use roadbook_render::{OpenError, PageIndex, RenderError};
use roadbook_scheduler::{SchedulerError, WaitError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Error category the presentation layer branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Storage unreadable, stream closed mid-copy, renderer failure
    Io,
    /// Access denied; the UI may prompt for access
    Permission,
    /// Page index out of range
    NotFound,
    /// Document failed to open or import
    Open,
    /// A bounded I/O wait expired
    Timeout,
    /// Superseded work; never shown to the user
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Io => "io",
            ErrorKind::Permission => "permission",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Open => "open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Failure of a single window load
///
/// Local to the batch that produced it: cached pages and the pager stay
/// usable, so the same request can simply be issued again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("page {index} was not rendered within {timeout:?}")]
    TimedOut { index: PageIndex, timeout: Duration },

    #[error("load superseded by a newer document")]
    Cancelled,

    #[error("render pool is unavailable")]
    PoolUnavailable,
}

impl PageError {
    pub(crate) fn from_wait(index: PageIndex, timeout: Duration, err: WaitError) -> Self {
        match err {
            WaitError::Cancelled => PageError::Cancelled,
            WaitError::TimedOut => PageError::TimedOut { index, timeout },
            WaitError::WorkerLost => {
                PageError::Render(RenderError::Io(format!("renderer crashed on page {index}")))
            }
            WaitError::ShutDown => PageError::PoolUnavailable,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PageError::Render(RenderError::Io(_)) => ErrorKind::Io,
            PageError::Render(RenderError::Permission(_)) => ErrorKind::Permission,
            PageError::Render(RenderError::NotFound { .. }) => ErrorKind::NotFound,
            PageError::TimedOut { .. } => ErrorKind::Timeout,
            PageError::Cancelled => ErrorKind::Cancelled,
            PageError::PoolUnavailable => ErrorKind::Io,
        }
    }
}

/// Errors from session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open document: {0}")]
    Open(#[from] OpenError),

    #[error("failed to persist session state: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Page(#[from] PageError),

    #[error("no document is loaded")]
    NoDocument,

    #[error("session is shut down")]
    ShutDown,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Open(OpenError::Permission(_)) => ErrorKind::Permission,
            SessionError::Open(_) => ErrorKind::Open,
            SessionError::Page(err) => err.kind(),
            SessionError::NoDocument => ErrorKind::NotFound,
            SessionError::Store(_)
            | SessionError::Config(_)
            | SessionError::Scheduler(_)
            | SessionError::ShutDown => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_errors_map_to_kinds() {
        assert_eq!(PageError::from(RenderError::Io("eof".into())).kind(), ErrorKind::Io);
        assert_eq!(
            PageError::from(RenderError::Permission("denied".into())).kind(),
            ErrorKind::Permission
        );
        assert_eq!(
            PageError::from(RenderError::NotFound { index: 9, page_count: 3 }).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(PageError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn wait_errors_become_page_errors() {
        let timeout = Duration::from_millis(250);
        assert_eq!(
            PageError::from_wait(4, timeout, WaitError::TimedOut),
            PageError::TimedOut { index: 4, timeout }
        );
        assert_eq!(PageError::from_wait(4, timeout, WaitError::Cancelled), PageError::Cancelled);
        assert_eq!(
            PageError::from_wait(4, timeout, WaitError::ShutDown),
            PageError::PoolUnavailable
        );
        assert_eq!(PageError::from_wait(4, timeout, WaitError::WorkerLost).kind(), ErrorKind::Io);
    }

    #[test]
    fn session_errors_map_to_kinds() {
        let denied = SessionError::from(OpenError::Permission("/doc.pdf".into()));
        assert_eq!(denied.kind(), ErrorKind::Permission);

        let invalid = SessionError::from(OpenError::Invalid("not a pdf".into()));
        assert_eq!(invalid.kind(), ErrorKind::Open);

        let timed_out = SessionError::from(PageError::TimedOut {
            index: 0,
            timeout: Duration::from_secs(1),
        });
        assert_eq!(timed_out.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn error_kind_labels() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(serde_json::to_string(&ErrorKind::Timeout).unwrap(), "\"timeout\"");
    }
}
