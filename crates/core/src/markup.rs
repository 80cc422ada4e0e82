//! Markup data model.
//!
//! A markup is one user- or AI-placed annotation object on a page. Geometry
//! is always stored in document-native coordinates at the fixed base render
//! scale ([`PagePoint`]), so a markup can be interpreted without knowing the
//! current viewport.

use crate::geometry::{self, PagePoint};
use uuid::Uuid;

/// Unique identifier for a markup, stable across the document lifetime.
pub type MarkupId = Uuid;

/// RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Normalized RGB components (0.0 to 1.0), used by the export recipes.
    pub fn to_normalized(&self) -> (f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        )
    }

    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
}

/// Visual styling for markup rendering.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarkupStyle {
    pub stroke_color: Color,

    /// Fill color for closed shapes; `None` means no fill.
    pub fill_color: Option<Color>,

    /// Stroke width in native pixels.
    pub stroke_width: f32,

    /// Opacity from 0 (transparent) to 100 (opaque).
    pub opacity: u8,

    /// Font size in native pixels, for text-bearing markups.
    pub font_size: Option<f32>,

    pub font_family: Option<String>,
}

impl MarkupStyle {
    pub fn new() -> Self {
        Self {
            stroke_color: Color::RED,
            fill_color: None,
            stroke_width: 2.0,
            opacity: 100,
            font_size: None,
            font_family: None,
        }
    }

    /// Style used for text-bearing markups.
    pub fn text() -> Self {
        Self {
            font_size: Some(12.0),
            font_family: Some("Helvetica".to_string()),
            ..Self::new()
        }
    }
}

impl Default for MarkupStyle {
    fn default() -> Self {
        Self::new()
    }
}

/// Provenance for markups proposed by the AI pipeline.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AiProvenance {
    /// Awaiting user confirmation. Cleared in place on confirm; reject goes
    /// through the normal delete path.
    pub pending: bool,

    /// Advisory note attached by the pipeline.
    pub note: Option<String>,

    /// Id of the source item the pipeline derived this markup from.
    pub source_item: Option<String>,

    /// Session batch this markup was placed in.
    pub group_id: Option<Uuid>,
}

/// Markup geometry, one variant per markup kind.
///
/// The set is closed: geometry handling, styling, and export recipes all
/// match exhaustively, so adding a kind is a compile-time checklist.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MarkupShape {
    Rectangle {
        top_left: PagePoint,
        bottom_right: PagePoint,
    },
    Ellipse {
        center: PagePoint,
        radius_x: f32,
        radius_y: f32,
    },
    Line {
        start: PagePoint,
        end: PagePoint,
    },
    Arrow {
        start: PagePoint,
        end: PagePoint,
    },
    Polyline {
        points: Vec<PagePoint>,
    },
    Polygon {
        points: Vec<PagePoint>,
    },
    Freehand {
        points: Vec<PagePoint>,
    },
    /// Closed revision cloud: a polygon outline drawn with scalloped arcs.
    Cloud {
        points: Vec<PagePoint>,
    },
    Text {
        position: PagePoint,
        /// Wrap width in native pixels; `None` for no wrapping.
        max_width: Option<f32>,
    },
    /// Text box with a leader line pointing at an anchor.
    Callout {
        anchor: PagePoint,
        text_position: PagePoint,
    },
    Stamp {
        position: PagePoint,
        name: String,
    },
    /// Count takeoff marker with its displayed index.
    CountMarker {
        position: PagePoint,
        number: u32,
    },
    /// Length takeoff along a polyline path.
    LengthMeasurement {
        points: Vec<PagePoint>,
    },
    /// Area takeoff over a closed polygon.
    AreaMeasurement {
        points: Vec<PagePoint>,
    },
}

impl MarkupShape {
    /// Short lowercase kind name for logging and history descriptions.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MarkupShape::Rectangle { .. } => "rectangle",
            MarkupShape::Ellipse { .. } => "ellipse",
            MarkupShape::Line { .. } => "line",
            MarkupShape::Arrow { .. } => "arrow",
            MarkupShape::Polyline { .. } => "polyline",
            MarkupShape::Polygon { .. } => "polygon",
            MarkupShape::Freehand { .. } => "freehand",
            MarkupShape::Cloud { .. } => "cloud",
            MarkupShape::Text { .. } => "text",
            MarkupShape::Callout { .. } => "callout",
            MarkupShape::Stamp { .. } => "stamp",
            MarkupShape::CountMarker { .. } => "count",
            MarkupShape::LengthMeasurement { .. } => "length",
            MarkupShape::AreaMeasurement { .. } => "area",
        }
    }

    /// Bounding box as `(min_x, min_y, max_x, max_y)` in native coordinates.
    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        match self {
            MarkupShape::Rectangle { top_left, bottom_right } => (
                top_left.x.min(bottom_right.x),
                top_left.y.min(bottom_right.y),
                top_left.x.max(bottom_right.x),
                top_left.y.max(bottom_right.y),
            ),
            MarkupShape::Ellipse { center, radius_x, radius_y } => (
                center.x - radius_x,
                center.y - radius_y,
                center.x + radius_x,
                center.y + radius_y,
            ),
            MarkupShape::Line { start, end } | MarkupShape::Arrow { start, end } => (
                start.x.min(end.x),
                start.y.min(end.y),
                start.x.max(end.x),
                start.y.max(end.y),
            ),
            MarkupShape::Polyline { points }
            | MarkupShape::Polygon { points }
            | MarkupShape::Freehand { points }
            | MarkupShape::Cloud { points }
            | MarkupShape::LengthMeasurement { points }
            | MarkupShape::AreaMeasurement { points } => bounds_of(points),
            MarkupShape::Text { position, max_width } => {
                let width = max_width.unwrap_or(200.0);
                (position.x, position.y, position.x + width, position.y + 50.0)
            }
            MarkupShape::Callout { anchor, text_position } => (
                anchor.x.min(text_position.x),
                anchor.y.min(text_position.y),
                anchor.x.max(text_position.x),
                anchor.y.max(text_position.y),
            ),
            MarkupShape::Stamp { position, .. } => {
                (position.x, position.y, position.x + 120.0, position.y + 40.0)
            }
            MarkupShape::CountMarker { position, .. } => (
                position.x - 12.0,
                position.y - 12.0,
                position.x + 12.0,
                position.y + 12.0,
            ),
        }
    }

    /// Snap points offered to the snapping engine: corners, midpoints,
    /// centers, and line/polyline endpoints.
    pub fn snap_points(&self) -> Vec<PagePoint> {
        match self {
            MarkupShape::Rectangle { top_left, bottom_right } => vec![
                *top_left,
                *bottom_right,
                PagePoint::new(bottom_right.x, top_left.y),
                PagePoint::new(top_left.x, bottom_right.y),
                top_left.midpoint(bottom_right),
            ],
            MarkupShape::Ellipse { center, .. } => vec![*center],
            MarkupShape::Line { start, end } | MarkupShape::Arrow { start, end } => {
                vec![*start, *end, start.midpoint(end)]
            }
            MarkupShape::Polyline { points }
            | MarkupShape::Polygon { points }
            | MarkupShape::Cloud { points }
            | MarkupShape::LengthMeasurement { points }
            | MarkupShape::AreaMeasurement { points } => points.clone(),
            // Freehand strokes carry too many incidental points to be useful
            // snap targets; offer only their endpoints.
            MarkupShape::Freehand { points } => {
                let mut snaps = Vec::new();
                if let Some(first) = points.first() {
                    snaps.push(*first);
                }
                if points.len() > 1 {
                    if let Some(last) = points.last() {
                        snaps.push(*last);
                    }
                }
                snaps
            }
            MarkupShape::Text { position, .. } => vec![*position],
            MarkupShape::Callout { anchor, text_position } => vec![*anchor, *text_position],
            MarkupShape::Stamp { position, .. } => vec![*position],
            MarkupShape::CountMarker { position, .. } => vec![*position],
        }
    }

    /// Hit test against the markup outline (selection).
    pub fn contains_point(&self, point: &PagePoint, tolerance: f32) -> bool {
        match self {
            MarkupShape::Line { start, end } | MarkupShape::Arrow { start, end } => {
                geometry::point_near_segment(point, start, end, tolerance)
            }
            MarkupShape::Polyline { points }
            | MarkupShape::Freehand { points }
            | MarkupShape::LengthMeasurement { points } => open_path_hit(points, point, tolerance),
            MarkupShape::Polygon { points }
            | MarkupShape::Cloud { points }
            | MarkupShape::AreaMeasurement { points } => closed_path_hit(points, point, tolerance),
            MarkupShape::Ellipse { center, radius_x, radius_y } => {
                if *radius_x <= 0.0 || *radius_y <= 0.0 {
                    return false;
                }
                let dx = (point.x - center.x) / radius_x;
                let dy = (point.y - center.y) / radius_y;
                let dist = (dx * dx + dy * dy).sqrt();
                (dist - 1.0).abs() * radius_x.max(*radius_y) <= tolerance
            }
            MarkupShape::CountMarker { position, .. } => {
                point.distance_to(position) <= 12.0 + tolerance
            }
            MarkupShape::Rectangle { .. }
            | MarkupShape::Text { .. }
            | MarkupShape::Callout { .. }
            | MarkupShape::Stamp { .. } => {
                let (min_x, min_y, max_x, max_y) = self.bounding_box();
                point.x >= min_x - tolerance
                    && point.x <= max_x + tolerance
                    && point.y >= min_y - tolerance
                    && point.y <= max_y + tolerance
            }
        }
    }

    /// Path length in native pixels, for line-like markups.
    pub fn path_length(&self) -> f32 {
        match self {
            MarkupShape::Line { start, end } | MarkupShape::Arrow { start, end } => {
                start.distance_to(end)
            }
            MarkupShape::Polyline { points }
            | MarkupShape::Freehand { points }
            | MarkupShape::LengthMeasurement { points } => geometry::path_length(points),
            _ => 0.0,
        }
    }

    /// Enclosed area in square native pixels, for closed markups.
    pub fn enclosed_area(&self) -> f32 {
        match self {
            MarkupShape::Rectangle { top_left, bottom_right } => {
                (bottom_right.x - top_left.x).abs() * (bottom_right.y - top_left.y).abs()
            }
            MarkupShape::Ellipse { radius_x, radius_y, .. } => {
                std::f32::consts::PI * radius_x * radius_y
            }
            MarkupShape::Polygon { points }
            | MarkupShape::Cloud { points }
            | MarkupShape::AreaMeasurement { points } => geometry::polygon_area(points),
            _ => 0.0,
        }
    }

    /// Whether the geometry is too degenerate to draw.
    ///
    /// Degenerate markups are skipped per-item during export rendering, not
    /// treated as fatal.
    pub fn is_degenerate(&self) -> bool {
        match self {
            MarkupShape::Polyline { points }
            | MarkupShape::Freehand { points }
            | MarkupShape::LengthMeasurement { points } => points.len() < 2,
            MarkupShape::Polygon { points }
            | MarkupShape::Cloud { points }
            | MarkupShape::AreaMeasurement { points } => points.len() < 3,
            MarkupShape::Ellipse { radius_x, radius_y, .. } => {
                *radius_x <= 0.0 || *radius_y <= 0.0
            }
            _ => false,
        }
    }
}

/// One annotation object on a page.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Markup {
    /// Stable unique identifier.
    pub id: MarkupId,

    /// Page number, 1-indexed.
    pub page: u32,

    pub shape: MarkupShape,

    pub style: MarkupStyle,

    /// Locked markups reject updates until unlocked.
    #[serde(default)]
    pub locked: bool,

    #[serde(default)]
    pub author: Option<String>,

    /// Creation timestamp (Unix seconds).
    pub created_at: i64,

    /// Optional human label; also carries text content for text-bearing
    /// markups and the formatted value fallback for measurements.
    #[serde(default)]
    pub label: Option<String>,

    /// Product this markup's measurement belongs to, if any. Used to
    /// reconstruct a measurement link when history replay has no captured
    /// delta for it.
    #[serde(default)]
    pub product_ref: Option<Uuid>,

    /// Set when the markup was proposed by the AI pipeline.
    #[serde(default)]
    pub ai: Option<AiProvenance>,
}

impl Markup {
    /// Create a markup with a generated id and the current timestamp.
    pub fn new(page: u32, shape: MarkupShape, style: MarkupStyle) -> Self {
        Self {
            id: MarkupId::new_v4(),
            page,
            shape,
            style,
            locked: false,
            author: None,
            created_at: now_unix(),
            label: None,
            product_ref: None,
            ai: None,
        }
    }

    /// Create a markup with a specific id (deserialization, history replay).
    pub fn with_id(id: MarkupId, page: u32, shape: MarkupShape, style: MarkupStyle) -> Self {
        Self { id, ..Self::new(page, shape, style) }
    }

    /// Whether this markup is an unconfirmed AI proposal.
    pub fn is_pending(&self) -> bool {
        self.ai.as_ref().map(|ai| ai.pending).unwrap_or(false)
    }

    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        self.shape.bounding_box()
    }

    pub fn hit_test(&self, point: &PagePoint, tolerance: f32) -> bool {
        self.shape.contains_point(point, tolerance)
    }
}

/// Partial update applied through the store's update path.
///
/// Unset fields leave the markup untouched.
#[derive(Debug, Clone, Default)]
pub struct MarkupPatch {
    pub shape: Option<MarkupShape>,
    pub style: Option<MarkupStyle>,
    pub label: Option<Option<String>>,
    pub locked: Option<bool>,
    pub product_ref: Option<Option<Uuid>>,
}

impl MarkupPatch {
    pub fn shape(shape: MarkupShape) -> Self {
        Self { shape: Some(shape), ..Self::default() }
    }

    pub fn style(style: MarkupStyle) -> Self {
        Self { style: Some(style), ..Self::default() }
    }
}

fn bounds_of(points: &[PagePoint]) -> (f32, f32, f32, f32) {
    if points.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let mut min_x = points[0].x;
    let mut max_x = points[0].x;
    let mut min_y = points[0].y;
    let mut max_y = points[0].y;
    for point in points.iter().skip(1) {
        min_x = min_x.min(point.x);
        max_x = max_x.max(point.x);
        min_y = min_y.min(point.y);
        max_y = max_y.max(point.y);
    }
    (min_x, min_y, max_x, max_y)
}

fn open_path_hit(points: &[PagePoint], point: &PagePoint, tolerance: f32) -> bool {
    points
        .windows(2)
        .any(|w| geometry::point_near_segment(point, &w[0], &w[1], tolerance))
}

fn closed_path_hit(points: &[PagePoint], point: &PagePoint, tolerance: f32) -> bool {
    if points.len() < 2 {
        return false;
    }
    (0..points.len()).any(|i| {
        let next = (i + 1) % points.len();
        geometry::point_near_segment(point, &points[i], &points[next], tolerance)
    })
}

pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
