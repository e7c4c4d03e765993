//! Load state observed by the presentation layer

use crate::error::ErrorKind;
use crate::pager::PageBatch;
use parking_lot::Mutex;
use roadbook_render::PageIndex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Pagination state of the active document
#[derive(Debug, Clone)]
pub enum LoadState {
    /// No document identity is set
    NotLoaded,
    /// A window request is in flight
    Loading { anchor: Option<PageIndex> },
    /// A batch was delivered for the latest request
    Loaded { batch: Arc<PageBatch> },
    /// The latest request failed; previously delivered pages stay valid
    Error { anchor: Option<PageIndex>, kind: ErrorKind, message: String },
}

impl LoadState {
    pub fn name(&self) -> &'static str {
        match self {
            LoadState::NotLoaded => "not_loaded",
            LoadState::Loading { .. } => "loading",
            LoadState::Loaded { .. } => "loaded",
            LoadState::Error { .. } => "error",
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded { .. })
    }

    pub fn batch(&self) -> Option<&Arc<PageBatch>> {
        match self {
            LoadState::Loaded { batch } => Some(batch),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    ///
    /// Loads only move forward (`Loading` to `Loaded` or `Error`); leaving a
    /// settled state requires a new request. Any state may return to
    /// `NotLoaded` when the document is cleared.
    pub fn can_transition_to(&self, next: &LoadState) -> bool {
        use LoadState::*;

        match (self, next) {
            (_, NotLoaded) => true,
            (_, Loading { .. }) => true,
            (Loading { .. }, Loaded { .. } | Error { .. }) => true,
            _ => false,
        }
    }
}

struct HubState {
    current: LoadState,
    subscribers: Vec<Sender<LoadState>>,
}

/// Current load state plus its subscribers
pub(crate) struct StateHub {
    state: Mutex<HubState>,
}

impl StateHub {
    pub fn new() -> Self {
        Self { state: Mutex::new(HubState { current: LoadState::NotLoaded, subscribers: Vec::new() }) }
    }

    pub fn current(&self) -> LoadState {
        self.state.lock().current.clone()
    }

    /// New receiver, seeded with the current state
    pub fn subscribe(&self) -> Receiver<LoadState> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state.lock();
        // The receiver is alive, so this send cannot fail.
        let _ = tx.send(state.current.clone());
        state.subscribers.push(tx);
        rx
    }

    /// Publish `next`; illegal transitions are logged and dropped
    pub fn publish(&self, next: LoadState) -> bool {
        let mut state = self.state.lock();
        if !state.current.can_transition_to(&next) {
            tracing::warn!(from = state.current.name(), to = next.name(), "rejected load state transition");
            return false;
        }

        tracing::debug!(from = state.current.name(), to = next.name(), "load state changed");
        state.subscribers.retain(|subscriber| subscriber.send(next.clone()).is_ok());
        state.current = next;
        true
    }
}
