//! Persisted scroll position

use crate::store::{keys, KeyValueStore, StoreError, StoreOp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Last viewed page and the offset within it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub page_index: u32,
    pub page_offset: u32,
}

impl ScrollPosition {
    pub const ORIGIN: ScrollPosition = ScrollPosition { page_index: 0, page_offset: 0 };

    pub fn new(page_index: u32, page_offset: u32) -> Self {
        Self { page_index, page_offset }
    }

    pub(crate) fn store_ops(self) -> [StoreOp; 2] {
        [
            StoreOp::set_int(keys::PAGE_INDEX, i64::from(self.page_index)),
            StoreOp::set_int(keys::PAGE_OFFSET, i64::from(self.page_offset)),
        ]
    }
}

/// Reads and writes the scroll position in a [`KeyValueStore`]
///
/// Both fields are written in one store update. A stored value that is
/// negative, too large or not an integer makes the whole position read as
/// the origin; a missing field reads as zero.
#[derive(Clone)]
pub struct ScrollLedger {
    store: Arc<dyn KeyValueStore>,
}

impl ScrollLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn get(&self) -> ScrollPosition {
        match (self.field(keys::PAGE_INDEX), self.field(keys::PAGE_OFFSET)) {
            (Some(page_index), Some(page_offset)) => ScrollPosition { page_index, page_offset },
            _ => {
                tracing::warn!("persisted scroll position is malformed, using origin");
                ScrollPosition::ORIGIN
            }
        }
    }

    pub fn set(&self, position: ScrollPosition) -> Result<(), StoreError> {
        self.store.apply(&position.store_ops())
    }

    pub fn reset(&self) -> Result<(), StoreError> {
        self.set(ScrollPosition::ORIGIN)
    }

    /// `Some(0)` when absent, `None` when malformed
    fn field(&self, key: &str) -> Option<u32> {
        if !self.store.contains(key) {
            return Some(0);
        }
        self.store.get_int(key).and_then(|value| u32::try_from(value).ok())
    }
}
