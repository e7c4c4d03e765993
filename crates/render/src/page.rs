//! Rendered page content
//!
//! A [`Page`] pairs a zero-based page index with the RGBA image produced by a
//! [`PageRenderSource`](crate::PageRenderSource). The image sits behind an
//! `Arc` so the cache, the pager and the presentation layer can share one
//! buffer; the pixels are freed when the last holder drops it.

use std::fmt;
use std::sync::Arc;

/// Zero-based page index within a document.
pub type PageIndex = u32;

/// Bytes per pixel of the RGBA buffers produced by renderers.
pub const BYTES_PER_PIXEL: usize = 4;

/// An RGBA image of a single rendered page
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RenderedImage {
    /// Create an image from raw RGBA pixel data
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels }
    }

    /// Create an opaque white image of the given size
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        Self::new(width, height, vec![0xFF; len])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory held by the pixel buffer in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for RenderedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// A rendered page of the active document
#[derive(Debug, Clone)]
pub struct Page {
    index: PageIndex,
    image: Arc<RenderedImage>,
}

impl Page {
    pub fn new(index: PageIndex, image: RenderedImage) -> Self {
        Self { index, image: Arc::new(image) }
    }

    pub fn index(&self) -> PageIndex {
        self.index
    }

    pub fn image(&self) -> &Arc<RenderedImage> {
        &self.image
    }

    /// Approximate memory footprint of the page content
    pub fn approximate_byte_size(&self) -> usize {
        self.image.byte_size()
    }

    /// Whether two pages share the same underlying image buffer
    pub fn shares_image_with(&self, other: &Page) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_image_is_white_rgba() {
        let image = RenderedImage::blank(4, 2);
        assert_eq!(image.byte_size(), 4 * 2 * BYTES_PER_PIXEL);
        assert!(image.pixels().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn cloned_page_shares_buffer() {
        let page = Page::new(3, RenderedImage::blank(10, 10));
        let copy = page.clone();

        assert_eq!(copy.index(), 3);
        assert!(page.shares_image_with(&copy));
        assert_eq!(page.approximate_byte_size(), 400);
    }
}
