//! Export transform: bake markups into the document bytes.
//!
//! For each page a single scale factor (`1 / base_scale`) converts
//! document-native markup coordinates into PDF page space, which is
//! vertically flipped relative to markup space; every y conversion applies
//! `page_height - y * scale_factor`. Each markup variant has a fixed
//! drawing recipe emitted as content-stream operators appended to the page.
//! The transform is pure: identical input produces byte-identical output.

use crate::{page_dimensions, PdfEngineError, PdfResult};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use planmark_core::geometry::{self, PagePoint};
use planmark_core::markup::{Markup, MarkupShape, MarkupStyle};
use planmark_core::scale::ScaleCalibration;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Bezier control-point ratio approximating a quarter circle.
const KAPPA: f32 = 0.552_284_8;

/// Count marker disc radius in native pixels.
const COUNT_RADIUS_PX: f32 = 12.0;

/// Offset of measurement value labels from the path midpoint, native pixels.
const LABEL_OFFSET_PX: f32 = 4.0;

/// Options for the export transform.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Calibration used to format measurement value labels. Without it the
    /// markup's own label text is used when present.
    pub calibration: Option<ScaleCalibration>,

    /// Leave out markups still pending AI confirmation.
    pub skip_pending: bool,
}

/// Bake markups into the original document bytes.
///
/// Markups on pages the document does not have are skipped with a warning,
/// as are markups with degenerate geometry; neither aborts the export.
pub fn export_to_pdf(
    original: &[u8],
    markups_by_page: &BTreeMap<u32, Vec<Markup>>,
    base_scale: f32,
    options: &ExportOptions,
) -> PdfResult<Vec<u8>> {
    if base_scale <= 0.0 {
        return Err(PdfEngineError::Malformed("base render scale must be positive".to_owned()));
    }

    let mut doc = Document::load_mem(original)?;
    let pages = doc.get_pages();
    let scale_factor = 1.0 / base_scale;

    // Shared objects are created once per document.
    let mut font_id: Option<ObjectId> = None;
    let mut gs_ids: BTreeMap<u8, ObjectId> = BTreeMap::new();

    for (&page_no, markups) in markups_by_page {
        let Some(&page_id) = pages.get(&page_no) else {
            warn!(page = page_no, "markup page not present in document; skipped");
            continue;
        };

        let page_height = page_dimensions(&doc, page_id).height_pt;
        let mut needs = PageNeeds::default();
        let mut operations = Vec::new();

        for markup in markups {
            if options.skip_pending && markup.is_pending() {
                continue;
            }
            if markup.shape.is_degenerate() {
                warn!(markup = %markup.id, kind = markup.shape.kind_name(), "degenerate markup skipped");
                continue;
            }
            operations.extend(markup_operations(
                markup,
                page_height,
                scale_factor,
                options.calibration.as_ref(),
                &mut needs,
            ));
        }

        if operations.is_empty() {
            continue;
        }

        debug!(page = page_no, ops = operations.len(), "baking markups");

        if needs.font && font_id.is_none() {
            font_id = Some(doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
            }));
        }
        for &opacity in &needs.opacities {
            gs_ids.entry(opacity).or_insert_with(|| {
                doc.add_object(dictionary! {
                    "Type" => "ExtGState",
                    "CA" => Object::Real(opacity as f32 / 100.0),
                    "ca" => Object::Real(opacity as f32 / 100.0),
                })
            });
        }

        let encoded = Content { operations }
            .encode()
            .map_err(PdfEngineError::Parse)?;
        let stream_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        append_content(&mut doc, page_id, stream_id)?;
        set_resources(
            &mut doc,
            page_id,
            if needs.font { font_id } else { None },
            &needs
                .opacities
                .iter()
                .map(|o| (gs_name(*o), gs_ids[o]))
                .collect::<Vec<_>>(),
        )?;
    }

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

/// Per-page resource requirements discovered while generating operations.
#[derive(Debug, Default)]
struct PageNeeds {
    font: bool,
    opacities: BTreeSet<u8>,
}

fn gs_name(opacity: u8) -> String {
    format!("PMgs{opacity}")
}

/// Append a stream to the page's Contents, preserving existing streams.
fn append_content(doc: &mut Document, page_id: ObjectId, stream_id: ObjectId) -> PdfResult<()> {
    let page_dict = doc.get_dictionary_mut(page_id)?;
    let existing = page_dict.get(b"Contents").ok().cloned();
    let contents = match existing {
        Some(Object::Reference(id)) => {
            Object::Array(vec![Object::Reference(id), stream_id.into()])
        }
        Some(Object::Array(mut array)) => {
            array.push(stream_id.into());
            Object::Array(array)
        }
        _ => stream_id.into(),
    };
    page_dict.set("Contents", contents);
    Ok(())
}

/// Install font and graphics-state entries into the page's resources.
///
/// Inherited or referenced resource dictionaries are copied onto the page
/// itself so shared ancestors are never mutated.
fn set_resources(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: Option<ObjectId>,
    gstates: &[(String, ObjectId)],
) -> PdfResult<()> {
    if font_id.is_none() && gstates.is_empty() {
        return Ok(());
    }

    let mut resources = {
        let page_dict = doc.get_dictionary(page_id)?;
        match page_dict.get(b"Resources") {
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
            Ok(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        }
    };

    if let Some(font_id) = font_id {
        let mut fonts = match resources.get(b"Font") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
            _ => Dictionary::new(),
        };
        fonts.set("PMHelv", Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));
    }

    if !gstates.is_empty() {
        let mut states = match resources.get(b"ExtGState") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
            _ => Dictionary::new(),
        };
        for (name, id) in gstates {
            states.set(name.as_str(), Object::Reference(*id));
        }
        resources.set("ExtGState", Object::Dictionary(states));
    }

    let page_dict = doc.get_dictionary_mut(page_id)?;
    page_dict.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Rounded operand; keeps output streams stable across runs.
fn real(value: f32) -> Object {
    Object::Real((value * 100.0).round() / 100.0)
}

/// Drawing recipe dispatch for one markup.
fn markup_operations(
    markup: &Markup,
    page_height: f32,
    scale_factor: f32,
    calibration: Option<&ScaleCalibration>,
    needs: &mut PageNeeds,
) -> Vec<Operation> {
    let tp = |p: &PagePoint| PdfXY::of(p.to_pdf(page_height, scale_factor));
    let style = &markup.style;

    let mut ops = vec![Operation::new("q", vec![])];

    if style.opacity < 100 {
        needs.opacities.insert(style.opacity);
        ops.push(Operation::new("gs", vec![gs_name(style.opacity).into()]));
    }

    let (r, g, b) = style.stroke_color.to_normalized();
    ops.push(Operation::new("RG", vec![real(r), real(g), real(b)]));
    ops.push(Operation::new("w", vec![real(style.stroke_width * scale_factor)]));
    if let Some(fill) = &style.fill_color {
        let (r, g, b) = fill.to_normalized();
        ops.push(Operation::new("rg", vec![real(r), real(g), real(b)]));
    }
    let filled = style.fill_color.is_some();

    match &markup.shape {
        MarkupShape::Line { start, end } => {
            ops.extend(stroke_path(&[tp(start), tp(end)], false));
        }
        MarkupShape::Arrow { start, end } => {
            let from = tp(start);
            let to = tp(end);
            ops.extend(stroke_path(&[from, to], false));
            ops.extend(arrowhead(from, to, style, scale_factor));
        }
        MarkupShape::Rectangle { top_left, bottom_right } => {
            let a = tp(top_left);
            let b2 = tp(bottom_right);
            let x = a.x.min(b2.x);
            let y = a.y.min(b2.y);
            let w = (b2.x - a.x).abs();
            let h = (b2.y - a.y).abs();
            ops.push(Operation::new("re", vec![real(x), real(y), real(w), real(h)]));
            ops.push(Operation::new(if filled { "B" } else { "S" }, vec![]));
        }
        MarkupShape::Ellipse { center, radius_x, radius_y } => {
            let c = tp(center);
            ops.extend(ellipse_path(
                c,
                radius_x * scale_factor,
                radius_y * scale_factor,
            ));
            ops.push(Operation::new(if filled { "b" } else { "s" }, vec![]));
        }
        MarkupShape::Polyline { points } | MarkupShape::Freehand { points } => {
            let path: Vec<PdfXY> = points.iter().map(|p| tp(p)).collect();
            ops.extend(stroke_path(&path, false));
        }
        MarkupShape::Polygon { points } => {
            let path: Vec<PdfXY> = points.iter().map(|p| tp(p)).collect();
            ops.extend(path_ops(&path));
            ops.push(Operation::new(if filled { "b" } else { "s" }, vec![]));
        }
        MarkupShape::Cloud { points } => {
            let path: Vec<PdfXY> = points.iter().map(|p| tp(p)).collect();
            ops.extend(cloud_path(&path));
            ops.push(Operation::new(if filled { "b" } else { "s" }, vec![]));
        }
        MarkupShape::Text { position, .. } => {
            if let Some(label) = &markup.label {
                ops.extend(text_ops(tp(position), label, style, scale_factor, needs));
            }
        }
        MarkupShape::Callout { anchor, text_position } => {
            let tip = tp(anchor);
            let tail = tp(text_position);
            ops.extend(stroke_path(&[tail, tip], false));
            ops.extend(arrowhead(tail, tip, style, scale_factor));
            if let Some(label) = &markup.label {
                ops.extend(text_ops(tail, label, style, scale_factor, needs));
            }
        }
        MarkupShape::Stamp { position, name } => {
            let origin = tp(position);
            let w = 120.0 * scale_factor;
            let h = 40.0 * scale_factor;
            // Native position is the stamp's top-left corner.
            ops.push(Operation::new(
                "re",
                vec![real(origin.x), real(origin.y - h), real(w), real(h)],
            ));
            ops.push(Operation::new("S", vec![]));
            ops.extend(text_ops(
                PdfXY { x: origin.x + 6.0 * scale_factor, y: origin.y - h / 2.0 },
                name,
                style,
                scale_factor,
                needs,
            ));
        }
        MarkupShape::CountMarker { position, number } => {
            let c = tp(position);
            let radius = COUNT_RADIUS_PX * scale_factor;

            // Filled disc in the stroke color.
            let (r, g, b) = style.stroke_color.to_normalized();
            ops.push(Operation::new("rg", vec![real(r), real(g), real(b)]));
            ops.extend(ellipse_path(c, radius, radius));
            ops.push(Operation::new("f", vec![]));

            // Centered numeral in white.
            let text = number.to_string();
            let font_size = 14.0 * scale_factor;
            let x = c.x - 0.27 * font_size * text.len() as f32;
            let y = c.y - 0.35 * font_size;
            ops.push(Operation::new("rg", vec![real(1.0), real(1.0), real(1.0)]));
            ops.extend(raw_text_ops(PdfXY { x, y }, &text, font_size, needs));
        }
        MarkupShape::LengthMeasurement { points } => {
            let path: Vec<PdfXY> = points.iter().map(|p| tp(p)).collect();
            ops.extend(stroke_path(&path, false));
            if let Some(label) = measurement_label(markup, calibration) {
                if let Some(mid) = geometry::path_midpoint(points) {
                    let anchor = tp(&PagePoint::new(
                        mid.x + LABEL_OFFSET_PX,
                        mid.y - LABEL_OFFSET_PX,
                    ));
                    ops.extend(text_ops(anchor, &label, style, scale_factor, needs));
                }
            }
        }
        MarkupShape::AreaMeasurement { points } => {
            let path: Vec<PdfXY> = points.iter().map(|p| tp(p)).collect();
            ops.extend(path_ops(&path));
            ops.push(Operation::new(if filled { "b" } else { "s" }, vec![]));
            if let Some(label) = measurement_label(markup, calibration) {
                let centroid = centroid(points);
                ops.extend(text_ops(tp(&centroid), &label, style, scale_factor, needs));
            }
        }
    }

    ops.push(Operation::new("Q", vec![]));
    ops
}

/// PDF-space coordinate pair used while emitting operators.
#[derive(Debug, Clone, Copy)]
struct PdfXY {
    x: f32,
    y: f32,
}

impl PdfXY {
    fn of(p: planmark_core::geometry::PdfPoint) -> Self {
        Self { x: p.x, y: p.y }
    }
}

fn path_ops(points: &[PdfXY]) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(points.len());
    if let Some(first) = points.first() {
        ops.push(Operation::new("m", vec![real(first.x), real(first.y)]));
        for point in &points[1..] {
            ops.push(Operation::new("l", vec![real(point.x), real(point.y)]));
        }
    }
    ops
}

fn stroke_path(points: &[PdfXY], close: bool) -> Vec<Operation> {
    let mut ops = path_ops(points);
    ops.push(Operation::new(if close { "s" } else { "S" }, vec![]));
    ops
}

/// Four-Bezier ellipse outline.
fn ellipse_path(center: PdfXY, rx: f32, ry: f32) -> Vec<Operation> {
    let kx = rx * KAPPA;
    let ky = ry * KAPPA;
    let (cx, cy) = (center.x, center.y);
    vec![
        Operation::new("m", vec![real(cx + rx), real(cy)]),
        Operation::new(
            "c",
            vec![
                real(cx + rx),
                real(cy + ky),
                real(cx + kx),
                real(cy + ry),
                real(cx),
                real(cy + ry),
            ],
        ),
        Operation::new(
            "c",
            vec![
                real(cx - kx),
                real(cy + ry),
                real(cx - rx),
                real(cy + ky),
                real(cx - rx),
                real(cy),
            ],
        ),
        Operation::new(
            "c",
            vec![
                real(cx - rx),
                real(cy - ky),
                real(cx - kx),
                real(cy - ry),
                real(cx),
                real(cy - ry),
            ],
        ),
        Operation::new(
            "c",
            vec![
                real(cx + kx),
                real(cy - ry),
                real(cx + rx),
                real(cy - ky),
                real(cx + rx),
                real(cy),
            ],
        ),
    ]
}

/// Two stroke legs forming an arrowhead at `to`.
fn arrowhead(from: PdfXY, to: PdfXY, style: &MarkupStyle, scale_factor: f32) -> Vec<Operation> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx * dx + dy * dy < 1e-6 {
        return Vec::new();
    }

    let angle = dy.atan2(dx);
    let length = (10.0 * style.stroke_width.max(1.0) * scale_factor).max(4.0 * scale_factor);
    let spread = std::f32::consts::PI / 6.0;

    let left = PdfXY {
        x: to.x - length * (angle - spread).cos(),
        y: to.y - length * (angle - spread).sin(),
    };
    let right = PdfXY {
        x: to.x - length * (angle + spread).cos(),
        y: to.y - length * (angle + spread).sin(),
    };

    vec![
        Operation::new("m", vec![real(to.x), real(to.y)]),
        Operation::new("l", vec![real(left.x), real(left.y)]),
        Operation::new("m", vec![real(to.x), real(to.y)]),
        Operation::new("l", vec![real(right.x), real(right.y)]),
        Operation::new("S", vec![]),
    ]
}

/// Scalloped cloud outline: each polygon edge becomes a run of outward
/// Bezier arcs.
fn cloud_path(points: &[PdfXY]) -> Vec<Operation> {
    const SCALLOP_LEN: f32 = 16.0;
    const BULGE: f32 = 5.0;

    let mut ops = Vec::new();
    let Some(first) = points.first() else {
        return ops;
    };
    ops.push(Operation::new("m", vec![real(first.x), real(first.y)]));

    for i in 0..points.len() {
        let from = points[i];
        let to = points[(i + 1) % points.len()];
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        let length = (dx * dx + dy * dy).sqrt();
        if length < 1e-3 {
            continue;
        }

        let chunks = (length / SCALLOP_LEN).ceil().max(1.0) as usize;
        // Left-hand normal of the travel direction.
        let nx = -dy / length;
        let ny = dx / length;

        for chunk in 0..chunks {
            let t0 = chunk as f32 / chunks as f32;
            let t1 = (chunk + 1) as f32 / chunks as f32;
            let ax = from.x + dx * t0;
            let ay = from.y + dy * t0;
            let bx = from.x + dx * t1;
            let by = from.y + dy * t1;
            let mx = (ax + bx) / 2.0 + nx * BULGE;
            let my = (ay + by) / 2.0 + ny * BULGE;
            ops.push(Operation::new(
                "c",
                vec![real(mx), real(my), real(mx), real(my), real(bx), real(by)],
            ));
        }
    }

    ops
}

fn raw_text_ops(at: PdfXY, text: &str, font_size: f32, needs: &mut PageNeeds) -> Vec<Operation> {
    needs.font = true;
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["PMHelv".into(), real(font_size)]),
        Operation::new("Td", vec![real(at.x), real(at.y)]),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ]
}

fn text_ops(
    at: PdfXY,
    text: &str,
    style: &MarkupStyle,
    scale_factor: f32,
    needs: &mut PageNeeds,
) -> Vec<Operation> {
    let font_size = style.font_size.unwrap_or(12.0) * scale_factor;
    let (r, g, b) = style.stroke_color.to_normalized();
    let mut ops = vec![Operation::new("rg", vec![real(r), real(g), real(b)])];
    ops.extend(raw_text_ops(at, text, font_size, needs));
    ops
}

/// Value label for a measurement markup: computed from the calibration if
/// one is supplied, otherwise the markup's own label text.
fn measurement_label(markup: &Markup, calibration: Option<&ScaleCalibration>) -> Option<String> {
    if let Some(calibration) = calibration {
        match &markup.shape {
            MarkupShape::LengthMeasurement { .. } => {
                let value = calibration.px_to_units(markup.shape.path_length());
                return Some(calibration.format_length(value));
            }
            MarkupShape::AreaMeasurement { .. } => {
                let value = calibration.px_area_to_units(markup.shape.enclosed_area());
                return Some(calibration.format_area(value));
            }
            _ => {}
        }
    }
    markup.label.clone()
}

fn centroid(points: &[PagePoint]) -> PagePoint {
    if points.is_empty() {
        return PagePoint::new(0.0, 0.0);
    }
    let sum_x: f32 = points.iter().map(|p| p.x).sum();
    let sum_y: f32 = points.iter().map(|p| p.y).sum();
    let n = points.len() as f32;
    PagePoint::new(sum_x / n, sum_y / n)
}
