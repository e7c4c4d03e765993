//! Page source contract
//!
//! [`PageRenderSource`] is the capability the pager calls into to learn the
//! page count and to render one page. It owns no caching or scheduling
//! policy; callers decide which thread a render runs on.

use crate::page::{PageIndex, RenderedImage};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Stable identity of an opened document
///
/// In practice this is the path of the durable local copy produced by a
/// [`ContentImportSource`](crate::ContentImportSource), independent of the
/// handle the document was originally imported from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from rendering a single page
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Underlying storage could not be read
    #[error("I/O error: {0}")]
    Io(String),

    /// Access to the document was denied
    #[error("permission denied: {0}")]
    Permission(String),

    /// Page index outside `[0, page_count)`
    #[error("page {index} not found (document has {page_count} pages)")]
    NotFound { index: PageIndex, page_count: u32 },
}

impl From<io::Error> for RenderError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => RenderError::Permission(err.to_string()),
            _ => RenderError::Io(err.to_string()),
        }
    }
}

/// Errors from opening or importing a document
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("document not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied opening {}", .0.display())]
    Permission(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The content could be read but is not a usable document
    #[error("invalid document: {0}")]
    Invalid(String),
}

impl OpenError {
    /// Classify an I/O error raised while accessing `path`
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => OpenError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => OpenError::Permission(path.to_path_buf()),
            _ => OpenError::Io(err),
        }
    }
}

/// Capability that turns a document plus a page index into an image
///
/// `open` must fully replace any previously open resource: the old one is
/// closed before the new one is opened. Implementations are shared across
/// I/O threads, hence `Send + Sync`.
pub trait PageRenderSource: Send + Sync {
    /// Open the document at `identity`, closing any open one first
    fn open(&mut self, identity: &DocumentId) -> Result<(), OpenError>;

    /// Release the open document, if any
    fn close(&mut self);

    /// Number of pages in the open document, 0 if none is open
    fn page_count(&self) -> u32;

    /// Render one page
    fn render(&self, index: PageIndex) -> Result<RenderedImage, RenderError>;
}

/// Shared range check used by sources before touching the document
pub fn check_page_index(index: PageIndex, page_count: u32) -> Result<(), RenderError> {
    if index < page_count {
        Ok(())
    } else {
        Err(RenderError::NotFound { index, page_count })
    }
}
