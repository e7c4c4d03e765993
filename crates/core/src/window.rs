//! Presentation-side page window
//!
//! [`PageWindow`] accumulates the batches delivered for one document into a
//! contiguous run of pages, the way a scrolling list holds them. It trims
//! itself to `max_window_size`, dropping pages on the side away from the
//! newest batch, and keeps the outer keys pointing at what was dropped so
//! the user can scroll back into it.

use crate::pager::{LoadParams, PageBatch, PagerConfig};
use roadbook_render::{Page, PageIndex};
use std::collections::BTreeMap;
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct PageWindow {
    config: PagerConfig,
    pages: Vec<Page>,
    prev_key: Option<PageIndex>,
    next_key: Option<PageIndex>,
}

impl PageWindow {
    pub fn new(config: PagerConfig) -> Self {
        Self { config, pages: Vec::new(), prev_key: None, next_key: None }
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

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn range(&self) -> Range<PageIndex> {
        match (self.pages.first(), self.pages.last()) {
            (Some(first), Some(last)) => first.index()..last.index() + 1,
            _ => 0..0,
        }
    }

    pub fn indices(&self) -> Vec<PageIndex> {
        self.pages.iter().map(Page::index).collect()
    }

    /// Drop every page, e.g. when the document changes
    pub fn reset(&mut self) {
        self.pages.clear();
        self.prev_key = None;
        self.next_key = None;
    }

    /// Request that extends the window forward, if there is more to load
    pub fn append_params(&self) -> Option<LoadParams> {
        self.next_key.map(|key| LoadParams::append(key, &self.config))
    }

    /// Request that extends the window backward, if there is more to load
    pub fn prepend_params(&self) -> Option<LoadParams> {
        let key = self.prev_key?;
        Some(LoadParams::prepend(key, self.range().start))
    }

    /// Merge a delivered batch
    ///
    /// A batch that overlaps or touches the window extends it; any other
    /// batch (a jump) replaces it.
    pub fn apply(&mut self, batch: &PageBatch) {
        let current = self.range();
        let incoming = batch.range();

        let touches = !self.pages.is_empty()
            && !batch.is_empty()
            && incoming.start <= current.end
            && incoming.end >= current.start;

        if !touches {
            self.pages = batch.pages().to_vec();
            self.prev_key = batch.prev_key();
            self.next_key = batch.next_key();
            return;
        }

        let mut merged: BTreeMap<PageIndex, Page> =
            self.pages.drain(..).map(|page| (page.index(), page)).collect();
        for page in batch.pages() {
            merged.insert(page.index(), page.clone());
        }
        self.pages = merged.into_values().collect();

        if incoming.start <= current.start {
            self.prev_key = batch.prev_key();
        }
        if incoming.end >= current.end {
            self.next_key = batch.next_key();
        }

        let forward = incoming.start >= current.start;
        self.trim(forward);
    }

    fn trim(&mut self, forward: bool) {
        let max = self.config.max_window_size.max(1) as usize;
        if self.pages.len() <= max {
            return;
        }
        let excess = self.pages.len() - max;

        if forward {
            self.pages.drain(..excess);
            let first = self.range().start;
            self.prev_key = (first != 0).then(|| first.saturating_sub(self.config.page_size));
        } else {
            self.pages.truncate(max);
            self.next_key = Some(self.range().end);
        }

        tracing::trace!(dropped = excess, forward, "trimmed page window");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::window_keys;
    use roadbook_render::RenderedImage;

    const PAGE_COUNT: u32 = 100;

    fn batch(params: LoadParams) -> PageBatch {
        let keys = window_keys(params.position(), params.load_size, PAGE_COUNT);
        let pages = keys.range.clone().map(|i| Page::new(i, RenderedImage::blank(2, 2))).collect();
        PageBatch::from_parts(pages, keys.prev_key, keys.next_key, params.key, params.load_size)
    }

    fn config() -> PagerConfig {
        PagerConfig { page_size: 5, initial_load_size: 7, max_window_size: 12 }
    }

    #[test]
    fn first_batch_fills_window() {
        let mut window = PageWindow::new(config());
        window.apply(&batch(LoadParams::refresh(&config())));

        assert_eq!(window.range(), 0..7);
        assert_eq!(window.prev_key(), None);
        assert_eq!(window.next_key(), Some(7));
        assert_eq!(window.prepend_params(), None);
    }

    #[test]
    fn appending_trims_the_head() {
        let mut window = PageWindow::new(config());
        window.apply(&batch(LoadParams::refresh(&config())));

        window.apply(&batch(window.append_params().unwrap()));
        assert_eq!(window.range(), 0..12);

        window.apply(&batch(window.append_params().unwrap()));
        assert_eq!(window.range(), 5..17);
        assert_eq!(window.prev_key(), Some(0));
        assert_eq!(window.next_key(), Some(17));
        assert_eq!(window.len(), 12);
    }

    #[test]
    fn prepending_trims_the_tail_and_stays_contiguous() {
        let mut window = PageWindow::new(config());
        window.apply(&batch(LoadParams::jump(40, &config())));
        assert_eq!(window.prev_key(), Some(33));

        let params = window.prepend_params().unwrap();
        assert_eq!(params, LoadParams { key: Some(33), load_size: 7 });
        window.apply(&batch(params));

        assert_eq!(window.range(), 33..45);
        assert_eq!(window.indices(), (33..45).collect::<Vec<_>>());
        assert_eq!(window.next_key(), Some(45));
        assert_eq!(window.prev_key(), Some(26));
    }

    #[test]
    fn jump_replaces_window() {
        let mut window = PageWindow::new(config());
        window.apply(&batch(LoadParams::refresh(&config())));
        window.apply(&batch(LoadParams::jump(60, &config())));

        assert_eq!(window.range(), 60..67);
        assert_eq!(window.prev_key(), Some(53));
    }

    #[test]
    fn overlapping_batch_replaces_pages_in_place() {
        let mut window = PageWindow::new(config());
        window.apply(&batch(LoadParams::refresh(&config())));
        let old = window.pages()[3].clone();

        window.apply(&batch(LoadParams::new(Some(2), 4)));
        assert_eq!(window.range(), 0..7);
        assert!(!window.pages()[3].shares_image_with(&old));
        assert_eq!(window.next_key(), Some(7));
    }

    #[test]
    fn reset_clears_everything() {
        let mut window = PageWindow::new(config());
        window.apply(&batch(LoadParams::jump(10, &config())));
        window.reset();

        assert!(window.is_empty());
        assert_eq!(window.prev_key(), None);
        assert_eq!(window.append_params(), None);
    }
}
