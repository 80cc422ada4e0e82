//! Raster print-preview transform.
//!
//! Draws the same per-variant recipes as the export bake onto an ephemeral
//! RGBA surface. Raster surfaces share the markup space's top-left origin,
//! so no vertical flip is applied here.

use image::{ImageBuffer, Rgba};
use planmark_core::geometry::PagePoint;
use planmark_core::markup::{Color, Markup, MarkupShape};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Render a page's markups onto a white print-preview surface.
///
/// `width_px`/`height_px` are the page size in native pixels at the base
/// render scale; markup coordinates map 1:1 onto the surface. Degenerate
/// markups are skipped, matching the export transform.
pub fn render_print_preview(markups: &[Markup], width_px: u32, height_px: u32) -> RgbaImage {
    let mut surface = RgbaImage::from_pixel(
        width_px.max(1),
        height_px.max(1),
        Rgba([255, 255, 255, 255]),
    );

    for markup in markups {
        if markup.shape.is_degenerate() {
            continue;
        }
        draw_markup(&mut surface, markup);
    }

    surface
}

fn draw_markup(surface: &mut RgbaImage, markup: &Markup) {
    let color = markup.style.stroke_color;

    match &markup.shape {
        MarkupShape::Line { start, end } | MarkupShape::Arrow { start, end } => {
            draw_line(surface, *start, *end, color);
        }
        MarkupShape::Rectangle { top_left, bottom_right } => {
            let corners = [
                *top_left,
                PagePoint::new(bottom_right.x, top_left.y),
                *bottom_right,
                PagePoint::new(top_left.x, bottom_right.y),
            ];
            for i in 0..4 {
                draw_line(surface, corners[i], corners[(i + 1) % 4], color);
            }
        }
        MarkupShape::Ellipse { center, radius_x, radius_y } => {
            draw_ellipse(surface, *center, *radius_x, *radius_y, color, false);
        }
        MarkupShape::Polyline { points }
        | MarkupShape::Freehand { points }
        | MarkupShape::LengthMeasurement { points } => {
            draw_path(surface, points, color, false);
        }
        MarkupShape::Polygon { points }
        | MarkupShape::Cloud { points }
        | MarkupShape::AreaMeasurement { points } => {
            draw_path(surface, points, color, true);
        }
        MarkupShape::Text { position, .. } | MarkupShape::Callout { text_position: position, .. } => {
            // Text rendering proper belongs to the UI layer; the preview
            // marks the anchor.
            draw_ellipse(surface, *position, 3.0, 3.0, color, true);
        }
        MarkupShape::Stamp { position, .. } => {
            let corners = [
                *position,
                PagePoint::new(position.x + 120.0, position.y),
                PagePoint::new(position.x + 120.0, position.y + 40.0),
                PagePoint::new(position.x, position.y + 40.0),
            ];
            for i in 0..4 {
                draw_line(surface, corners[i], corners[(i + 1) % 4], color);
            }
        }
        MarkupShape::CountMarker { position, .. } => {
            draw_ellipse(surface, *position, 12.0, 12.0, color, true);
        }
    }
}

fn draw_path(surface: &mut RgbaImage, points: &[PagePoint], color: Color, close: bool) {
    for window in points.windows(2) {
        draw_line(surface, window[0], window[1], color);
    }
    if close && points.len() > 2 {
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            draw_line(surface, *last, *first, color);
        }
    }
}

/// Stroke a segment by stepping along its length.
fn draw_line(surface: &mut RgbaImage, from: PagePoint, to: PagePoint, color: Color) {
    let length = from.distance_to(&to);
    let steps = (length.ceil() as u32).max(1);
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let x = from.x + (to.x - from.x) * t;
        let y = from.y + (to.y - from.y) * t;
        put_pixel(surface, x, y, color);
    }
}

fn draw_ellipse(
    surface: &mut RgbaImage,
    center: PagePoint,
    radius_x: f32,
    radius_y: f32,
    color: Color,
    fill: bool,
) {
    if fill {
        let min_x = (center.x - radius_x).floor() as i64;
        let max_x = (center.x + radius_x).ceil() as i64;
        let min_y = (center.y - radius_y).floor() as i64;
        let max_y = (center.y + radius_y).ceil() as i64;
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = (x as f32 - center.x) / radius_x.max(0.5);
                let dy = (y as f32 - center.y) / radius_y.max(0.5);
                if dx * dx + dy * dy <= 1.0 {
                    put_pixel(surface, x as f32, y as f32, color);
                }
            }
        }
        return;
    }

    let circumference = std::f32::consts::TAU * radius_x.max(radius_y).max(1.0);
    let steps = (circumference.ceil() as u32).max(8);
    for step in 0..steps {
        let angle = std::f32::consts::TAU * step as f32 / steps as f32;
        put_pixel(
            surface,
            center.x + radius_x * angle.cos(),
            center.y + radius_y * angle.sin(),
            color,
        );
    }
}

fn put_pixel(surface: &mut RgbaImage, x: f32, y: f32, color: Color) {
    let xi = x.round() as i64;
    let yi = y.round() as i64;
    if xi < 0 || yi < 0 || xi >= surface.width() as i64 || yi >= surface.height() as i64 {
        return;
    }
    surface.put_pixel(xi as u32, yi as u32, Rgba([color.r, color.g, color.b, color.a]));
}
