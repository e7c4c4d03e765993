//! Render cache with LRU eviction
//!
//! Holds rendered pages of the active document keyed by page index, bounded
//! by an entry count. Pages leaving the cache (evicted, replaced or
//! invalidated) are handed to a release hook so their pixel buffers are
//! returned explicitly instead of lingering until some later drop.
//!
//! The cache also carries an epoch. Invalidating the cache advances the
//! epoch, and the `*_in` accessors refuse any other epoch, so a render that
//! started for a superseded document can never land in the new one.

use lru::LruCache;
use parking_lot::Mutex;
use roadbook_render::{Page, PageIndex};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Generation of the cache contents, advanced by every invalidation
pub type Epoch = u64;

/// Why a page left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Pushed out as the least recently used entry
    Evicted,
    /// Overwritten by a newer render of the same index
    Replaced,
    /// Dropped by `evict_all`/`invalidate`
    Invalidated,
    /// Removed explicitly
    Removed,
}

/// A page leaving the cache, owned by the release hook
#[derive(Debug)]
pub struct ReleasedPage {
    pub page: Page,
    pub reason: ReleaseReason,
}

/// Callback that takes ownership of pages leaving the cache
pub type ReleaseHook = Arc<dyn Fn(ReleasedPage) + Send + Sync>;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of pages currently cached
    pub entries: usize,

    /// Maximum number of pages
    pub capacity: usize,

    /// Approximate bytes held by cached pages
    pub bytes: usize,

    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,

    /// Pages pushed out by the size bound
    pub evictions: u64,

    /// Inserts refused because they targeted a stale epoch
    pub rejected: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    entries: LruCache<PageIndex, Page>,
    bytes: usize,
    epoch: Epoch,
    stats: CacheStats,
}

impl CacheState {
    fn new(max_entries: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(max_entries),
            bytes: 0,
            epoch: 0,
            stats: CacheStats { capacity: max_entries.get(), ..Default::default() },
        }
    }

    fn lookup(&mut self, index: PageIndex) -> Option<Page> {
        match self.entries.get(&index) {
            Some(page) => {
                self.stats.hits += 1;
                Some(page.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, index: PageIndex, page: Page, released: &mut Vec<ReleasedPage>) {
        self.bytes += page.approximate_byte_size();
        self.stats.insertions += 1;

        if let Some((old_index, old_page)) = self.entries.push(index, page) {
            self.bytes = self.bytes.saturating_sub(old_page.approximate_byte_size());
            let reason = if old_index == index {
                ReleaseReason::Replaced
            } else {
                self.stats.evictions += 1;
                ReleaseReason::Evicted
            };
            released.push(ReleasedPage { page: old_page, reason });
        }

        self.sync_stats();
    }

    fn drain(&mut self, reason: ReleaseReason, released: &mut Vec<ReleasedPage>) {
        while let Some((_, page)) = self.entries.pop_lru() {
            released.push(ReleasedPage { page, reason });
        }
        self.bytes = 0;
        self.sync_stats();
    }

    fn sync_stats(&mut self) {
        self.stats.entries = self.entries.len();
        self.stats.bytes = self.bytes;
        self.stats.capacity = self.entries.cap().get();
    }
}

/// Bounded LRU cache of rendered pages
///
/// Internally synchronized; every method takes `&self`. The release hook is
/// always invoked after the internal lock has been dropped.
///
/// # Example
///
/// ```
/// use roadbook_cache::RenderCache;
/// use roadbook_render::{Page, RenderedImage};
///
/// let cache = RenderCache::new(2);
/// cache.put(0, Page::new(0, RenderedImage::blank(8, 8)));
/// cache.put(1, Page::new(1, RenderedImage::blank(8, 8)));
/// cache.put(2, Page::new(2, RenderedImage::blank(8, 8)));
///
/// assert!(!cache.contains(0));
/// assert_eq!(cache.len(), 2);
/// ```
pub struct RenderCache {
    state: Mutex<CacheState>,
    release: Option<ReleaseHook>,
}

impl RenderCache {
    /// Default bound on cached pages
    pub const DEFAULT_MAX_ENTRIES: usize = 20;

    /// Create a cache holding at most `max_entries` pages (at least one)
    pub fn new(max_entries: usize) -> Self {
        Self { state: Mutex::new(CacheState::new(non_zero(max_entries))), release: None }
    }

    /// Create a cache that hands every departing page to `hook`
    pub fn with_release_hook(max_entries: usize, hook: ReleaseHook) -> Self {
        Self { release: Some(hook), ..Self::new(max_entries) }
    }

    /// Current epoch
    pub fn epoch(&self) -> Epoch {
        self.state.lock().epoch
    }

    /// Look up a page, marking it most recently used
    pub fn get(&self, index: PageIndex) -> Option<Page> {
        self.state.lock().lookup(index)
    }

    /// Look up a page on behalf of a reader bound to `epoch`
    ///
    /// Returns `None` if the cache has moved on to another epoch.
    pub fn get_in(&self, epoch: Epoch, index: PageIndex) -> Option<Page> {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return None;
        }
        state.lookup(index)
    }

    /// Check for a page without touching recency or statistics
    pub fn contains(&self, index: PageIndex) -> bool {
        self.state.lock().entries.contains(&index)
    }

    /// Store a page, evicting the least recently used one if full
    pub fn put(&self, index: PageIndex, page: Page) {
        let mut released = Vec::new();
        {
            let mut state = self.state.lock();
            state.insert(index, page, &mut released);
        }
        self.release_all(released);
    }

    /// Store a page rendered on behalf of `epoch`
    ///
    /// Returns `false`, releasing the page, if the epoch is stale.
    pub fn put_in(&self, epoch: Epoch, index: PageIndex, page: Page) -> bool {
        let mut released = Vec::new();
        let accepted = {
            let mut state = self.state.lock();
            if state.epoch == epoch {
                state.insert(index, page, &mut released);
                true
            } else {
                state.stats.rejected += 1;
                tracing::debug!(page = index, epoch, current = state.epoch, "rejected stale render");
                released.push(ReleasedPage { page, reason: ReleaseReason::Invalidated });
                false
            }
        };
        self.release_all(released);
        accepted
    }

    /// Remove a single page
    pub fn remove(&self, index: PageIndex) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.entries.pop(&index);
            if let Some(page) = &removed {
                state.bytes = state.bytes.saturating_sub(page.approximate_byte_size());
                state.sync_stats();
            }
            removed
        };

        match removed {
            Some(page) => {
                self.release_all(vec![ReleasedPage { page, reason: ReleaseReason::Removed }]);
                true
            }
            None => false,
        }
    }

    /// Drop every cached page, returning how many were released
    pub fn evict_all(&self) -> usize {
        let mut released = Vec::new();
        {
            let mut state = self.state.lock();
            state.drain(ReleaseReason::Invalidated, &mut released);
        }
        let count = released.len();
        self.release_all(released);
        count
    }

    /// Drop every cached page and advance the epoch
    ///
    /// Both happen under one lock acquisition: once this returns, no reader
    /// bound to an older epoch can observe or insert pages.
    pub fn invalidate(&self) -> Epoch {
        let mut released = Vec::new();
        let epoch = {
            let mut state = self.state.lock();
            state.drain(ReleaseReason::Invalidated, &mut released);
            state.epoch += 1;
            state.epoch
        };
        tracing::debug!(epoch, released = released.len(), "render cache invalidated");
        self.release_all(released);
        epoch
    }

    /// Change the entry bound, evicting least recently used pages as needed
    pub fn resize(&self, max_entries: usize) {
        let max_entries = non_zero(max_entries);
        let mut released = Vec::new();
        {
            let mut state = self.state.lock();
            while state.entries.len() > max_entries.get() {
                let Some((_, page)) = state.entries.pop_lru() else {
                    break;
                };
                state.bytes = state.bytes.saturating_sub(page.approximate_byte_size());
                state.stats.evictions += 1;
                released.push(ReleasedPage { page, reason: ReleaseReason::Evicted });
            }
            state.entries.resize(max_entries);
            state.sync_stats();
        }
        self.release_all(released);
    }

    /// Cached page indices from least to most recently used
    pub fn indices_by_recency(&self) -> Vec<PageIndex> {
        let state = self.state.lock();
        state.entries.iter().rev().map(|(index, _)| *index).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    fn release_all(&self, released: Vec<ReleasedPage>) {
        for page in released {
            if page.reason == ReleaseReason::Evicted {
                tracing::trace!(page = page.page.index(), "evicted page");
            }
            if let Some(hook) = &self.release {
                hook(page);
            }
        }
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

impl fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RenderCache")
            .field("epoch", &state.epoch)
            .field("stats", &state.stats)
            .finish()
    }
}

fn non_zero(max_entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)
}
