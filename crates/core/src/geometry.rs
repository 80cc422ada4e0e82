//! Coordinate spaces and pure geometry helpers.
//!
//! Three point types keep the engine's coordinate spaces apart at the type
//! level:
//!
//! - [`PagePoint`] — document-native space at the fixed base render scale.
//!   Origin top-left, y grows downward. All stored markup geometry uses this
//!   space, independent of the current zoom.
//! - [`ScreenPoint`] — viewport space at the current zoom. Exists only at the
//!   editing boundary; never stored.
//! - [`PdfPoint`] — target PDF page space. Origin bottom-left, y grows
//!   upward, units in points (1/72 inch). Produced by the export transform.
//!
//! Conversions between spaces are explicit; accidentally mixing spaces is a
//! compile error rather than a runtime bug.

/// Document-native coordinate at the fixed base render scale.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PagePoint {
    pub x: f32,
    pub y: f32,
}

impl PagePoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another native point.
    pub fn distance_to(&self, other: &PagePoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Midpoint between two native points.
    pub fn midpoint(&self, other: &PagePoint) -> PagePoint {
        PagePoint::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Convert into PDF page space.
    ///
    /// `scale_factor` is `1 / base_scale` (points per native pixel);
    /// `page_height_pt` is the target page height in points. The y axis
    /// flips because PDF pages have a bottom-left origin.
    pub fn to_pdf(&self, page_height_pt: f32, scale_factor: f32) -> PdfPoint {
        PdfPoint {
            x: self.x * scale_factor,
            y: page_height_pt - self.y * scale_factor,
        }
    }

    /// Convert into viewport space at the given zoom.
    pub fn to_screen(&self, zoom: f32) -> ScreenPoint {
        ScreenPoint { x: self.x * zoom, y: self.y * zoom }
    }
}

/// Viewport coordinate at the current zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Convert back into document-native space.
    pub fn to_page(&self, zoom: f32) -> PagePoint {
        let zoom = if zoom > 0.0 { zoom } else { 1.0 };
        PagePoint::new(self.x / zoom, self.y / zoom)
    }
}

/// PDF page-space coordinate in points, bottom-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfPoint {
    pub x: f32,
    pub y: f32,
}

impl PdfPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Convert into document-native space.
    ///
    /// `base_scale` is the fixed render scale (native pixels per point).
    pub fn to_page(&self, page_height_pt: f32, base_scale: f32) -> PagePoint {
        PagePoint::new(self.x * base_scale, (page_height_pt - self.y) * base_scale)
    }
}

/// Nearest point on the segment `[start, end]` to `point`.
pub fn nearest_point_on_segment(
    point: &PagePoint,
    start: &PagePoint,
    end: &PagePoint,
) -> PagePoint {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length_sq = dx * dx + dy * dy;

    if length_sq < 1e-6 {
        // Degenerate segment
        return *start;
    }

    let t = ((point.x - start.x) * dx + (point.y - start.y) * dy) / length_sq;
    let t = t.clamp(0.0, 1.0);

    PagePoint::new(start.x + t * dx, start.y + t * dy)
}

/// Check whether `point` lies within `tolerance` of the segment.
pub fn point_near_segment(
    point: &PagePoint,
    start: &PagePoint,
    end: &PagePoint,
    tolerance: f32,
) -> bool {
    point.distance_to(&nearest_point_on_segment(point, start, end)) <= tolerance
}

/// Intersection of two line segments, if they cross.
///
/// Touching endpoints count as an intersection; collinear overlap does not
/// produce a point.
pub fn segment_intersection(
    a1: &PagePoint,
    a2: &PagePoint,
    b1: &PagePoint,
    b2: &PagePoint,
) -> Option<PagePoint> {
    let d1x = a2.x - a1.x;
    let d1y = a2.y - a1.y;
    let d2x = b2.x - b1.x;
    let d2y = b2.y - b1.y;

    let denom = d1x * d2y - d1y * d2x;
    if denom.abs() < 1e-9 {
        return None; // Parallel or collinear
    }

    let t = ((b1.x - a1.x) * d2y - (b1.y - a1.y) * d2x) / denom;
    let u = ((b1.x - a1.x) * d1y - (b1.y - a1.y) * d1x) / denom;

    if !(0.0..=1.0).contains(&t) || !(0.0..=1.0).contains(&u) {
        return None;
    }

    Some(PagePoint::new(a1.x + t * d1x, a1.y + t * d1y))
}

/// Total length of a polyline path.
pub fn path_length(points: &[PagePoint]) -> f32 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

/// Enclosed area of a closed polygon (shoelace formula).
pub fn polygon_area(points: &[PagePoint]) -> f32 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y;
        area -= points[j].x * points[i].y;
    }
    (area / 2.0).abs()
}

/// Point along a polyline at half its total length.
///
/// Used to anchor measurement value labels.
pub fn path_midpoint(points: &[PagePoint]) -> Option<PagePoint> {
    match points {
        [] => None,
        [only] => Some(*only),
        _ => {
            let half = path_length(points) / 2.0;
            let mut accumulated = 0.0;
            for window in points.windows(2) {
                let segment = window[0].distance_to(&window[1]);
                if segment > 0.0 && accumulated + segment >= half {
                    let t = (half - accumulated) / segment;
                    return Some(PagePoint::new(
                        window[0].x + t * (window[1].x - window[0].x),
                        window[0].y + t * (window[1].y - window[0].y),
                    ));
                }
                accumulated += segment;
            }
            points.last().copied()
        }
    }
}
