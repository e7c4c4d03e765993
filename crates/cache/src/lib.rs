//! Roadbook Cache Library
//!
//! Bounded render cache for pages of the active document with LRU eviction
//! and explicit release of departing pages.

pub mod render;

pub use render::{CacheStats, Epoch, ReleaseHook, ReleaseReason, ReleasedPage, RenderCache};
