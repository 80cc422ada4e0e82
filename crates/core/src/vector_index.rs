//! Document vector index: extracted page geometry used for snapping.
//!
//! Extraction walks the document's native content (a collaborator concern,
//! see [`VectorSource`]) and yields line segments. The index derives
//! endpoints and pairwise intersections once, is cached per page, and is
//! never mutated after creation.

use crate::error::CoreResult;
use crate::geometry::{segment_intersection, PagePoint};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A straight line segment in document-native coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: PagePoint,
    pub end: PagePoint,
}

impl LineSegment {
    pub fn new(start: PagePoint, end: PagePoint) -> Self {
        Self { start, end }
    }
}

/// Extractor of native vector content for one document.
///
/// Implemented by the PDF layer; the engine only consumes segments.
pub trait VectorSource {
    /// Extract the line segments of a page (1-indexed).
    fn extract(&self, page: u32) -> CoreResult<Vec<LineSegment>>;
}

/// Immutable snap geometry for one page.
#[derive(Debug, Default)]
pub struct PageVectorIndex {
    segments: Vec<LineSegment>,
    endpoints: Vec<PagePoint>,
    intersections: Vec<PagePoint>,
}

impl PageVectorIndex {
    /// Build the index from raw segments, deriving endpoints and computed
    /// segment intersections.
    pub fn build(segments: Vec<LineSegment>) -> Self {
        let mut endpoints = Vec::with_capacity(segments.len() * 2);
        for segment in &segments {
            endpoints.push(segment.start);
            endpoints.push(segment.end);
        }

        let mut intersections = Vec::new();
        for i in 0..segments.len() {
            for j in (i + 1)..segments.len() {
                if let Some(point) = segment_intersection(
                    &segments[i].start,
                    &segments[i].end,
                    &segments[j].start,
                    &segments[j].end,
                ) {
                    intersections.push(point);
                }
            }
        }

        Self { segments, endpoints, intersections }
    }

    pub fn segments(&self) -> &[LineSegment] {
        &self.segments
    }

    pub fn endpoints(&self) -> &[PagePoint] {
        &self.endpoints
    }

    pub fn intersections(&self) -> &[PagePoint] {
        &self.intersections
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Lazy per-page cache of vector indexes for one document.
///
/// Extraction for an already-cached page is a no-op, and at most one
/// extraction per page may be in flight; concurrent requests for the same
/// page are silently dropped.
#[derive(Debug, Default)]
pub struct VectorIndexCache {
    pages: HashMap<u32, Arc<PageVectorIndex>>,
    in_flight: HashSet<u32>,
}

impl VectorIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached index for a page, if extraction has completed.
    pub fn get(&self, page: u32) -> Option<Arc<PageVectorIndex>> {
        self.pages.get(&page).cloned()
    }

    pub fn is_extracted(&self, page: u32) -> bool {
        self.pages.contains_key(&page)
    }

    /// Extract a page through `source` if it is not cached yet.
    ///
    /// Safe to call speculatively and repeatedly; returns the cached index
    /// when present. Returns `Ok(None)` when another extraction for the
    /// same page is already in flight (the request is dropped).
    pub fn ensure(
        &mut self,
        page: u32,
        source: &dyn VectorSource,
    ) -> CoreResult<Option<Arc<PageVectorIndex>>> {
        if let Some(index) = self.pages.get(&page) {
            return Ok(Some(index.clone()));
        }
        if !self.in_flight.insert(page) {
            debug!(page, "vector extraction already in flight; request dropped");
            return Ok(None);
        }

        let result = source.extract(page);
        self.in_flight.remove(&page);

        let segments = result?;
        debug!(page, segments = segments.len(), "vector index built");
        let index = Arc::new(PageVectorIndex::build(segments));
        self.pages.insert(page, index.clone());
        Ok(Some(index))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}
