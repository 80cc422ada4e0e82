//! Vector line-segment extraction from page content streams.
//!
//! Walks a page's content operations tracking the graphics state stack
//! (`q`/`Q`) and transformation matrix (`cm`), and harvests the straight
//! path construction operators (`m`, `l`, `h`, `re`) as device-space
//! segments. Curves only advance the current point; the snapping index
//! works with straight geometry.

use crate::{page_dimensions, PdfEngineError, PdfResult};
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use planmark_core::error::{CoreError, CoreResult};
use planmark_core::geometry::PdfPoint;
use planmark_core::vector_index::{LineSegment, VectorSource};
use std::collections::BTreeMap;
use tracing::debug;

/// 2D affine transform in PDF matrix form `[a b c d e f]`.
#[derive(Debug, Clone, Copy)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    const IDENTITY: Matrix = Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// `self` applied first, then `after`.
    fn then(&self, after: &Matrix) -> Matrix {
        Matrix {
            a: self.a * after.a + self.b * after.c,
            b: self.a * after.b + self.b * after.d,
            c: self.c * after.a + self.d * after.c,
            d: self.c * after.b + self.d * after.d,
            e: self.e * after.a + self.f * after.c + after.e,
            f: self.e * after.b + self.f * after.d + after.f,
        }
    }
}

/// Extract straight segments from one page's content, in PDF point space.
pub fn extract_pdf_segments(doc: &Document, page_id: ObjectId) -> PdfResult<Vec<(PdfPoint, PdfPoint)>> {
    let content_data = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_data)?;

    let mut segments = Vec::new();
    let mut ctm = Matrix::IDENTITY;
    let mut stack: Vec<Matrix> = Vec::new();
    let mut current: Option<(f32, f32)> = None;
    let mut subpath_start: Option<(f32, f32)> = None;

    for op in &content.operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => stack.push(ctm),
            "Q" => {
                if let Some(saved) = stack.pop() {
                    ctm = saved;
                }
            }
            "cm" => {
                if let Some(m) = matrix_operands(operands) {
                    ctm = m.then(&ctm);
                }
            }
            "m" => {
                if let Some((x, y)) = point_operands(operands, 0) {
                    let p = ctm.apply(x, y);
                    current = Some(p);
                    subpath_start = Some(p);
                }
            }
            "l" => {
                if let (Some(from), Some((x, y))) = (current, point_operands(operands, 0)) {
                    let to = ctm.apply(x, y);
                    push_segment(&mut segments, from, to);
                    current = Some(to);
                }
            }
            "h" => {
                if let (Some(from), Some(start)) = (current, subpath_start) {
                    push_segment(&mut segments, from, start);
                    current = Some(start);
                }
            }
            "re" => {
                if let Some([x, y, w, h]) = quad_operands(operands) {
                    let corners = [
                        ctm.apply(x, y),
                        ctm.apply(x + w, y),
                        ctm.apply(x + w, y + h),
                        ctm.apply(x, y + h),
                    ];
                    for i in 0..4 {
                        push_segment(&mut segments, corners[i], corners[(i + 1) % 4]);
                    }
                    // A rectangle also resets the current point to its origin.
                    current = Some(corners[0]);
                    subpath_start = Some(corners[0]);
                }
            }
            // Curves advance the current point without contributing
            // straight segments.
            "c" => {
                if let Some((x, y)) = point_operands(operands, 4) {
                    current = Some(ctm.apply(x, y));
                }
            }
            "v" | "y" => {
                if let Some((x, y)) = point_operands(operands, 2) {
                    current = Some(ctm.apply(x, y));
                }
            }
            _ => {}
        }
    }

    Ok(segments
        .into_iter()
        .map(|(from, to)| (PdfPoint::new(from.0, from.1), PdfPoint::new(to.0, to.1)))
        .collect())
}

fn push_segment(segments: &mut Vec<((f32, f32), (f32, f32))>, from: (f32, f32), to: (f32, f32)) {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    if dx * dx + dy * dy > 1e-6 {
        segments.push((from, to));
    }
}

fn matrix_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() != 6 {
        return None;
    }
    Some(Matrix {
        a: operands[0].as_float().ok()?,
        b: operands[1].as_float().ok()?,
        c: operands[2].as_float().ok()?,
        d: operands[3].as_float().ok()?,
        e: operands[4].as_float().ok()?,
        f: operands[5].as_float().ok()?,
    })
}

fn point_operands(operands: &[Object], offset: usize) -> Option<(f32, f32)> {
    let x = operands.get(offset)?.as_float().ok()?;
    let y = operands.get(offset + 1)?.as_float().ok()?;
    Some((x, y))
}

fn quad_operands(operands: &[Object]) -> Option<[f32; 4]> {
    if operands.len() != 4 {
        return None;
    }
    Some([
        operands[0].as_float().ok()?,
        operands[1].as_float().ok()?,
        operands[2].as_float().ok()?,
        operands[3].as_float().ok()?,
    ])
}

/// [`VectorSource`] backed by a parsed PDF document.
///
/// Converts extracted PDF-space segments into document-native coordinates
/// at the session's base render scale.
pub struct PdfVectorSource {
    document: Document,
    page_ids: BTreeMap<u32, ObjectId>,
    base_scale: f32,
}

impl PdfVectorSource {
    pub fn new(bytes: &[u8], base_scale: f32) -> PdfResult<Self> {
        let document = Document::load_mem(bytes)?;
        let page_ids = document.get_pages();
        if page_ids.is_empty() {
            return Err(PdfEngineError::Malformed("document has no pages".to_owned()));
        }
        Ok(Self { document, page_ids, base_scale })
    }

    fn extract_native(&self, page: u32) -> PdfResult<Vec<LineSegment>> {
        let page_id = *self.page_ids.get(&page).ok_or(PdfEngineError::PageOutOfRange {
            page,
            page_count: self.page_ids.len() as u32,
        })?;

        let height_pt = page_dimensions(&self.document, page_id).height_pt;
        let segments = extract_pdf_segments(&self.document, page_id)?;
        debug!(page, count = segments.len(), "extracted vector segments");

        Ok(segments
            .into_iter()
            .map(|(from, to)| {
                LineSegment::new(
                    from.to_page(height_pt, self.base_scale),
                    to.to_page(height_pt, self.base_scale),
                )
            })
            .collect())
    }
}

impl VectorSource for PdfVectorSource {
    fn extract(&self, page: u32) -> CoreResult<Vec<LineSegment>> {
        self.extract_native(page)
            .map_err(|err| CoreError::Decode(err.to_string()))
    }
}
