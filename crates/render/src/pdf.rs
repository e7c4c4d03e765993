//! PDFium-backed page source
//!
//! Renders roadbook pages with PDFium at twice the 72 DPI page space, which
//! keeps the pictograms and distances of a roadbook legible on small
//! screens. The PDFium library is bound lazily on the first `open` and shared
//! by every source in the process.

use crate::page::{PageIndex, RenderedImage};
use crate::source::{check_page_index, DocumentId, OpenError, PageRenderSource, RenderError};
use parking_lot::Mutex;
use pdfium_render::prelude::*;

/// Process-wide PDFium binding; documents borrow it until exit
static PDFIUM: Mutex<Option<&'static Pdfium>> = parking_lot::const_mutex(None);

/// DPI of the PDF page coordinate space
const PAGE_SPACE_DPI: u32 = 72;

/// Default output DPI for rendered pages
pub const DEFAULT_TARGET_DPI: u32 = 144;

/// Page source that renders PDF documents through PDFium
pub struct PdfiumSource {
    pdfium: Option<&'static Pdfium>,
    document: Option<PdfDocument<'static>>,
    target_dpi: u32,
}

impl PdfiumSource {
    pub fn new() -> Self {
        Self::with_target_dpi(DEFAULT_TARGET_DPI)
    }

    pub fn with_target_dpi(target_dpi: u32) -> Self {
        Self { pdfium: None, document: None, target_dpi: target_dpi.max(1) }
    }

    /// Bind the PDFium library, once per process
    fn bind(&mut self) -> Result<&'static Pdfium, OpenError> {
        if let Some(pdfium) = self.pdfium {
            return Ok(pdfium);
        }

        let mut shared = PDFIUM.lock();
        let pdfium = match *shared {
            Some(pdfium) => pdfium,
            None => {
                let pdfium: &'static Pdfium = Box::leak(Box::new(Pdfium::new(load_bindings()?)));
                tracing::debug!("bound PDFium library");
                *shared = Some(pdfium);
                pdfium
            }
        };
        self.pdfium = Some(pdfium);
        Ok(pdfium)
    }

    fn scaled(&self, points: f32) -> u32 {
        ((points * self.target_dpi as f32) / PAGE_SPACE_DPI as f32).round().max(1.0) as u32
    }
}

/// Load the PDFium bindings
///
/// Search order:
/// 1. Executable's directory (app bundles ship the library next to the binary)
/// 2. Current working directory
/// 3. System library paths
fn load_bindings() -> Result<Box<dyn PdfiumLibraryBindings>, OpenError> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));

    exe_dir
        .and_then(|dir| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).ok()
        })
        .map(Ok)
        .unwrap_or_else(|| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
        })
        .map_err(|e| OpenError::Invalid(format!("PDFium unavailable: {e}")))
}

impl Default for PdfiumSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRenderSource for PdfiumSource {
    fn open(&mut self, identity: &DocumentId) -> Result<(), OpenError> {
        self.close();

        let path = identity.as_path();
        if !path.is_file() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| OpenError::Invalid(e.to_string()))?;

        tracing::debug!(identity = %identity, pages = document.pages().len(), "opened PDF");
        self.document = Some(document);
        Ok(())
    }

    fn close(&mut self) {
        if self.document.take().is_some() {
            tracing::debug!("closed PDF");
        }
    }

    fn page_count(&self) -> u32 {
        self.document.as_ref().map_or(0, |doc| u32::from(doc.pages().len()))
    }

    fn render(&self, index: PageIndex) -> Result<RenderedImage, RenderError> {
        let document = self
            .document
            .as_ref()
            .ok_or(RenderError::NotFound { index, page_count: 0 })?;
        check_page_index(index, self.page_count())?;

        let page_index = u16::try_from(index)
            .map_err(|_| RenderError::NotFound { index, page_count: self.page_count() })?;
        let page = document.pages().get(page_index).map_err(|e| RenderError::Io(e.to_string()))?;

        let width = self.scaled(page.width().value);
        let height = self.scaled(page.height().value);

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| RenderError::Io(e.to_string()))?;

        Ok(RenderedImage::new(width, height, bitmap.as_rgba_bytes().to_vec()))
    }
}
