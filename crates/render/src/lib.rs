//! Roadbook Render Library
//!
//! Page source contract, rendered page types and document import.

pub mod import;
pub mod page;
#[cfg(feature = "pdfium")]
pub mod pdf;
pub mod source;

pub use import::{ContentHandle, ContentImportSource, FileImporter};
pub use page::{Page, PageIndex, RenderedImage, BYTES_PER_PIXEL};
#[cfg(feature = "pdfium")]
pub use pdf::{PdfiumSource, DEFAULT_TARGET_DPI};
pub use source::{check_page_index, DocumentId, OpenError, PageRenderSource, RenderError};
