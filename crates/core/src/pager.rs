//! Windowed page loading
//!
//! The pager turns a window request (an anchor page and a number of pages)
//! into a [`PageBatch`]: it clamps the range to the document, serves pages
//! from the [`RenderCache`] where it can, renders the rest on the I/O pool
//! and computes the keys for the neighbouring windows.
//!
//! A pager is bound to one document generation. It captures the cache epoch
//! and a cancellation token when it is created; once the session moves to
//! another document the token fires and the cache refuses the old epoch, so
//! nothing this pager still has in flight can leak into the new document.

use crate::error::PageError;
use roadbook_cache::{Epoch, RenderCache};
use roadbook_render::{Page, PageIndex, PageRenderSource};
use roadbook_scheduler::{CancellationToken, IoPool, SingleFlight};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Opened page source, shared between a pager and its render tasks
///
/// Each document generation gets its own source, so renders still running
/// for a superseded document never hold up the next one.
pub type SharedSource = Arc<dyn PageRenderSource>;

/// Window sizes, in pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerConfig {
    /// Pages per forward or backward load
    pub page_size: u32,
    /// Pages per refresh or jump
    pub initial_load_size: u32,
    /// Pages the presentation window keeps before trimming
    pub max_window_size: u32,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self { page_size: 5, initial_load_size: 7, max_window_size: 30 }
    }
}

/// Range and neighbour keys of one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowKeys {
    /// Pages to fetch, always within `[0, page_count)`
    pub range: Range<PageIndex>,
    /// `None` iff the window starts at page 0
    pub prev_key: Option<PageIndex>,
    /// `None` iff the window reaches the last page
    pub next_key: Option<PageIndex>,
}

/// Compute the fetch range and neighbour keys of a window
///
/// A `load_size` of zero is treated as one.
///
/// ```
/// use roadbook_core::pager::window_keys;
///
/// let keys = window_keys(45, 5, 50);
/// assert_eq!(keys.range, 45..50);
/// assert_eq!(keys.prev_key, Some(40));
/// assert_eq!(keys.next_key, None);
/// ```
pub fn window_keys(position: PageIndex, load_size: u32, page_count: u32) -> WindowKeys {
    let load_size = load_size.max(1);
    let requested_end = position.saturating_add(load_size);

    let end = requested_end.min(page_count);
    let start = position.min(end);

    let prev_key = (position != 0).then(|| position.saturating_sub(load_size));
    let next_key = (requested_end < page_count).then_some(requested_end);

    WindowKeys { range: start..end, prev_key, next_key }
}

/// What to load: an anchor (`None` meaning page 0) and a page count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadParams {
    pub key: Option<PageIndex>,
    pub load_size: u32,
}

impl LoadParams {
    pub fn new(key: Option<PageIndex>, load_size: u32) -> Self {
        Self { key, load_size: load_size.max(1) }
    }

    /// Reload from the refresh key, which is always the start of the document
    pub fn refresh(config: &PagerConfig) -> Self {
        Self::new(None, config.initial_load_size)
    }

    /// Load the window starting at an arbitrary page
    pub fn jump(anchor: PageIndex, config: &PagerConfig) -> Self {
        Self::new(Some(anchor), config.initial_load_size)
    }

    /// Load forward from a `next_key`
    pub fn append(next_key: PageIndex, config: &PagerConfig) -> Self {
        Self::new(Some(next_key), config.page_size)
    }

    /// Load the pages in `[prev_key, before)`
    ///
    /// Sizing the load by the gap keeps the new batch contiguous with the
    /// window it extends.
    pub fn prepend(prev_key: PageIndex, before: PageIndex) -> Self {
        Self::new(Some(prev_key), before.saturating_sub(prev_key))
    }

    pub fn position(&self) -> PageIndex {
        self.key.unwrap_or(0)
    }
}

/// Pages of one window load, in ascending index order
#[derive(Debug, Clone)]
pub struct PageBatch {
    pages: Vec<Page>,
    prev_key: Option<PageIndex>,
    next_key: Option<PageIndex>,
    anchor: Option<PageIndex>,
    load_size: u32,
}

impl PageBatch {
    /// Assemble a batch; `pages` must be in ascending index order
    pub fn from_parts(
        pages: Vec<Page>,
        prev_key: Option<PageIndex>,
        next_key: Option<PageIndex>,
        anchor: Option<PageIndex>,
        load_size: u32,
    ) -> Self {
        debug_assert!(pages.windows(2).all(|w| w[0].index() < w[1].index()));
        Self { pages, prev_key, next_key, anchor, load_size }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn prev_key(&self) -> Option<PageIndex> {
        self.prev_key
    }

    pub fn next_key(&self) -> Option<PageIndex> {
        self.next_key
    }

    /// Anchor of the request that produced this batch
    pub fn anchor(&self) -> Option<PageIndex> {
        self.anchor
    }

    pub fn load_size(&self) -> u32 {
        self.load_size
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Indices covered, empty if the batch has no pages
    pub fn range(&self) -> Range<PageIndex> {
        match (self.pages.first(), self.pages.last()) {
            (Some(first), Some(last)) => first.index()..last.index() + 1,
            _ => 0..0,
        }
    }

    pub fn indices(&self) -> Vec<PageIndex> {
        self.pages.iter().map(Page::index).collect()
    }
}

/// Loads page windows of one document generation
pub struct WindowedPager {
    config: PagerConfig,
    epoch: Epoch,
    page_count: u32,
    token: CancellationToken,
    source: SharedSource,
    cache: Arc<RenderCache>,
    pool: Arc<IoPool>,
    io_timeout: Duration,
    in_flight: SingleFlight<PageIndex, Result<Page, PageError>>,
}

impl WindowedPager {
    /// Bind a pager to the document open in `source`
    ///
    /// The pager captures the cache's current epoch, so it must be created
    /// after the cache was invalidated for this document.
    pub fn new(
        config: PagerConfig,
        source: SharedSource,
        cache: Arc<RenderCache>,
        pool: Arc<IoPool>,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            epoch: cache.epoch(),
            page_count: source.page_count(),
            token,
            source,
            cache,
            pool,
            io_timeout: Duration::from_secs(30),
            in_flight: SingleFlight::new(),
        }
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Generation this pager belongs to
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Load one window
    ///
    /// Fails with the first page error; pages rendered before it stay
    /// cached, so re-issuing the request only renders what is missing.
    pub fn load(&self, params: LoadParams) -> Result<PageBatch, PageError> {
        let keys = window_keys(params.position(), params.load_size, self.page_count);
        tracing::debug!(
            epoch = self.epoch,
            start = keys.range.start,
            end = keys.range.end,
            "loading window"
        );

        let mut pages = Vec::with_capacity(keys.range.len());
        for index in keys.range.clone() {
            if self.token.is_cancelled() {
                return Err(PageError::Cancelled);
            }
            pages.push(self.fetch(index)?);
        }

        Ok(PageBatch {
            pages,
            prev_key: keys.prev_key,
            next_key: keys.next_key,
            anchor: params.key,
            load_size: params.load_size,
        })
    }

    fn fetch(&self, index: PageIndex) -> Result<Page, PageError> {
        if let Some(page) = self.cache.get_in(self.epoch, index) {
            tracing::trace!(page = index, "cache hit");
            return Ok(page);
        }

        self.in_flight.run(index, || {
            // A leader that just finished may have filled the entry.
            if let Some(page) = self.cache.get_in(self.epoch, index) {
                return Ok(page);
            }
            tracing::trace!(page = index, "cache miss");

            let source = Arc::clone(&self.source);
            let image = self
                .pool
                .run_with_timeout(&self.token, self.io_timeout, move || source.render(index))
                .map_err(|err| PageError::from_wait(index, self.io_timeout, err))??;

            let page = Page::new(index, image);
            if !self.cache.put_in(self.epoch, index, page.clone()) {
                return Err(PageError::Cancelled);
            }
            Ok(page)
        })
    }
}

impl fmt::Debug for WindowedPager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedPager")
            .field("config", &self.config)
            .field("epoch", &self.epoch)
            .field("page_count", &self.page_count)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
