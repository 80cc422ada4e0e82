//! Snapping engine for precision markup placement.
//!
//! Given a candidate point, the engine returns the possibly-adjusted point
//! and which geometric feature produced the adjustment. Sources are tried
//! in a fixed priority order and the first one within the snap radius wins:
//! document endpoints, document intersections, document line segments,
//! markup-derived points, then the grid.

use crate::geometry::{nearest_point_on_segment, PagePoint};
use crate::store::MarkupStore;
use crate::vector_index::PageVectorIndex;
use std::collections::HashMap;
use tracing::debug;

/// What adjusted a candidate point. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapSource {
    /// Endpoint of a document-native vector segment.
    DocumentEndpoint,
    /// Computed intersection of two document-native segments.
    DocumentIntersection,
    /// Nearest point on a document-native segment.
    DocumentLine,
    /// Markup corner, midpoint, center, or endpoint.
    MarkupPoint,
    /// Nearest grid intersection.
    Grid,
}

/// Result of a snap query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapResolution {
    pub point: PagePoint,
    /// `None` when nothing within radius fired; `point` is then the
    /// original candidate unchanged.
    pub source: Option<SnapSource>,
}

/// Snapping configuration, persisted with the project settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SnapConfig {
    pub enabled: bool,

    /// Snap radius in native pixels.
    pub radius: f32,

    /// Snap to document vector endpoints and intersections.
    pub document_points: bool,

    /// Snap to the nearest point on document vector segments.
    pub document_lines: bool,

    /// Snap to markup corners, midpoints, centers, and endpoints.
    pub markup_points: bool,

    pub grid: bool,

    /// Grid spacing in native pixels.
    pub grid_spacing: f32,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 10.0,
            document_points: true,
            document_lines: true,
            markup_points: true,
            grid: false,
            grid_spacing: 10.0,
        }
    }
}

#[derive(Debug)]
struct MarkupSnapCache {
    revision: u64,
    points: Vec<PagePoint>,
}

/// Resolves candidate points against snap geometry.
#[derive(Debug)]
pub struct SnapEngine {
    config: SnapConfig,
    /// Markup snap points per page, rebuilt whole whenever the page's
    /// markup set changes (tracked through the store's snap revision).
    markup_cache: HashMap<u32, MarkupSnapCache>,
}

impl SnapEngine {
    pub fn new() -> Self {
        Self::with_config(SnapConfig::default())
    }

    pub fn with_config(config: SnapConfig) -> Self {
        Self { config, markup_cache: HashMap::new() }
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SnapConfig) {
        self.config = config;
    }

    /// Resolve a candidate point on a page.
    ///
    /// `index` carries the page's document vector geometry if it has been
    /// extracted; pass `None` to skip document-derived snapping.
    pub fn resolve_snap(
        &mut self,
        page: u32,
        point: PagePoint,
        store: &MarkupStore,
        index: Option<&PageVectorIndex>,
    ) -> SnapResolution {
        if !self.config.enabled {
            return SnapResolution { point, source: None };
        }

        let radius = self.config.radius;

        if let Some(index) = index {
            if self.config.document_points {
                if let Some(hit) = nearest_within(&point, index.endpoints(), radius) {
                    return SnapResolution {
                        point: hit,
                        source: Some(SnapSource::DocumentEndpoint),
                    };
                }
                if let Some(hit) = nearest_within(&point, index.intersections(), radius) {
                    return SnapResolution {
                        point: hit,
                        source: Some(SnapSource::DocumentIntersection),
                    };
                }
            }

            if self.config.document_lines {
                if let Some(hit) = nearest_on_segments(&point, index, radius) {
                    return SnapResolution { point: hit, source: Some(SnapSource::DocumentLine) };
                }
            }
        }

        if self.config.markup_points {
            let points = self.markup_points_for(page, store);
            if let Some(hit) = nearest_within(&point, points, radius) {
                return SnapResolution { point: hit, source: Some(SnapSource::MarkupPoint) };
            }
        }

        if self.config.grid {
            let spacing = self.config.grid_spacing;
            if spacing > 0.0 {
                let grid_point = PagePoint::new(
                    (point.x / spacing).round() * spacing,
                    (point.y / spacing).round() * spacing,
                );
                if point.distance_to(&grid_point) <= radius {
                    return SnapResolution { point: grid_point, source: Some(SnapSource::Grid) };
                }
            }
        }

        SnapResolution { point, source: None }
    }

    /// The page's current markup snap-point set, for interactive feedback
    /// overlays.
    pub fn page_snap_points(&mut self, page: u32, store: &MarkupStore) -> &[PagePoint] {
        self.markup_points_for(page, store)
    }

    /// Markup snap points for a page, rebuilt from scratch when the store's
    /// snap revision has moved since the cache was filled.
    fn markup_points_for(&mut self, page: u32, store: &MarkupStore) -> &[PagePoint] {
        let revision = store.snap_revision();
        let stale = self
            .markup_cache
            .get(&page)
            .map(|cache| cache.revision != revision)
            .unwrap_or(true);

        if stale {
            let mut points = Vec::new();
            for markup in store.markups_on(page) {
                points.extend(markup.shape.snap_points());
            }
            debug!(page, count = points.len(), "markup snap cache rebuilt");
            self.markup_cache.insert(page, MarkupSnapCache { revision, points });
        }

        &self.markup_cache.get(&page).expect("cache filled above").points
    }
}

impl Default for SnapEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn nearest_within(point: &PagePoint, candidates: &[PagePoint], radius: f32) -> Option<PagePoint> {
    let mut best: Option<(f32, PagePoint)> = None;
    for candidate in candidates {
        let distance = point.distance_to(candidate);
        if distance <= radius && best.map(|(d, _)| distance < d).unwrap_or(true) {
            best = Some((distance, *candidate));
        }
    }
    best.map(|(_, p)| p)
}

fn nearest_on_segments(
    point: &PagePoint,
    index: &PageVectorIndex,
    radius: f32,
) -> Option<PagePoint> {
    let mut best: Option<(f32, PagePoint)> = None;
    for segment in index.segments() {
        let candidate = nearest_point_on_segment(point, &segment.start, &segment.end);
        let distance = point.distance_to(&candidate);
        if distance <= radius && best.map(|(d, _)| distance < d).unwrap_or(true) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, p)| p)
}
