//! PDF collaborator layer for the annotation engine.
//!
//! Decode metadata (page count, page dimensions), vector segment extraction
//! for the snapping index, the export transform that bakes markups into the
//! document bytes, and a raster print-preview transform. Everything here is
//! pure `lopdf`/`image`; rasterizing actual page content is a rendering
//! backend concern and stays outside this workspace.

pub mod export;
pub mod raster;
pub mod vector_extract;

use lopdf::Document;
use planmark_core::session::{DecodedDocument, PageDimensions};

pub use export::{export_to_pdf, ExportOptions};
pub use raster::render_print_preview;
pub use vector_extract::PdfVectorSource;

/// Errors from the PDF layer.
#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("malformed document: {0}")]
    Malformed(String),
}

pub type PdfResult<T> = Result<T, PdfEngineError>;

/// Decoded document metadata.
#[derive(Debug, Clone)]
pub struct PdfInfo {
    pub page_count: u32,
    pub page_sizes: Vec<PageDimensions>,
}

impl PdfInfo {
    /// Hand-off format for opening a core document session.
    pub fn into_decoded(self) -> DecodedDocument {
        DecodedDocument { page_count: self.page_count, page_dimensions: self.page_sizes }
    }
}

/// Read page count and per-page dimensions from raw PDF bytes.
pub fn read_info(bytes: &[u8]) -> PdfResult<PdfInfo> {
    if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
        return Err(PdfEngineError::EncryptedUnsupported);
    }

    let doc = Document::load_mem(bytes)?;
    let pages = doc.get_pages();
    let mut sizes = Vec::with_capacity(pages.len());

    for (_, object_id) in pages {
        sizes.push(page_dimensions(&doc, object_id));
    }

    if sizes.is_empty() {
        return Err(PdfEngineError::Malformed("document has no pages".to_owned()));
    }

    Ok(PdfInfo { page_count: sizes.len() as u32, page_sizes: sizes })
}

/// MediaBox of a page, falling back to US Letter when absent or malformed.
pub(crate) fn page_dimensions(doc: &Document, page_id: lopdf::ObjectId) -> PageDimensions {
    doc.get_dictionary(page_id)
        .ok()
        .and_then(|dict| dict.get(b"MediaBox").ok())
        .and_then(|obj| obj.as_array().ok())
        .and_then(|array| {
            if array.len() != 4 {
                return None;
            }
            let x0 = array[0].as_float().ok()?;
            let y0 = array[1].as_float().ok()?;
            let x1 = array[2].as_float().ok()?;
            let y1 = array[3].as_float().ok()?;
            Some(PageDimensions { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
        })
        .unwrap_or(PageDimensions { width_pt: 612.0, height_pt: 792.0 })
}


#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;

    #[test]
    fn test_read_info_single_page() {
        let bytes = test_pdf::single_page(612.0, 792.0, Vec::new());
        let info = read_info(&bytes).expect("info reads");

        assert_eq!(info.page_count, 1);
        assert!((info.page_sizes[0].width_pt - 612.0).abs() < 0.001);
        assert!((info.page_sizes[0].height_pt - 792.0).abs() < 0.001);
    }

    #[test]
    fn test_read_info_rejects_encrypted() {
        let mut bytes = test_pdf::single_page(612.0, 792.0, Vec::new());
        bytes.extend_from_slice(b"/Encrypt");
        assert!(matches!(read_info(&bytes), Err(PdfEngineError::EncryptedUnsupported)));
    }

    #[test]
    fn test_read_info_rejects_garbage() {
        assert!(read_info(b"not a pdf at all").is_err());
    }

    #[test]
    fn test_into_decoded() {
        let bytes = test_pdf::single_page(
            200.0,
            400.0,
            vec![Operation::new("m", vec![0.into(), 0.into()])],
        );
        let decoded = read_info(&bytes).unwrap().into_decoded();
        assert_eq!(decoded.page_count, 1);
        assert!((decoded.page_dimensions[0].height_pt - 400.0).abs() < 0.001);
    }
}
