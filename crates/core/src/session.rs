//! Document sessions and the session manager.
//!
//! A session is one open document: its decoded page geometry, the original
//! byte payload (kept for export), the per-page markup store, and the
//! per-page vector index cache. Sessions coexist; exactly one is active for
//! editing commands at a time.

use crate::error::{CoreError, CoreResult};
use crate::geometry::{PagePoint, ScreenPoint};
use crate::markup::{Markup, MarkupId};
use crate::store::MarkupStore;
use crate::vector_index::{PageVectorIndex, VectorIndexCache, VectorSource};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for an open document session.
pub type DocumentId = Uuid;

/// Native page dimensions in points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PageDimensions {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Decode result handed over by the document-rendering collaborator.
#[derive(Debug, Clone)]
pub struct DecodedDocument {
    pub page_count: u32,
    pub page_dimensions: Vec<PageDimensions>,
}

/// One open document.
#[derive(Debug)]
pub struct DocumentSession {
    id: DocumentId,
    name: String,
    page_count: u32,
    page_dimensions: Vec<PageDimensions>,
    /// Fixed base render scale: native pixels per point. Markup geometry is
    /// anchored to this scale, independent of the current zoom.
    base_scale: f32,
    current_page: u32,
    zoom: f32,
    store: MarkupStore,
    vectors: VectorIndexCache,
    /// Original document bytes, required for export round-trips.
    original_bytes: Vec<u8>,
}

impl DocumentSession {
    /// Create a session from a decode result and the original bytes.
    pub fn open(
        name: impl Into<String>,
        decoded: DecodedDocument,
        original_bytes: Vec<u8>,
        base_scale: f32,
    ) -> CoreResult<Self> {
        if decoded.page_count == 0 {
            return Err(CoreError::Decode("document has no pages".into()));
        }
        if decoded.page_dimensions.len() != decoded.page_count as usize {
            return Err(CoreError::Decode(format!(
                "page dimension count {} does not match page count {}",
                decoded.page_dimensions.len(),
                decoded.page_count
            )));
        }
        if base_scale <= 0.0 {
            return Err(CoreError::Decode("base render scale must be positive".into()));
        }

        Ok(Self {
            id: DocumentId::new_v4(),
            name: name.into(),
            page_count: decoded.page_count,
            page_dimensions: decoded.page_dimensions,
            base_scale,
            current_page: 1,
            zoom: 1.0,
            store: MarkupStore::new(),
            vectors: VectorIndexCache::new(),
            original_bytes,
        })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn base_scale(&self) -> f32 {
        self.base_scale
    }

    pub fn original_bytes(&self) -> &[u8] {
        &self.original_bytes
    }

    /// Dimensions of a page (1-indexed) in points.
    pub fn page_dimensions(&self, page: u32) -> CoreResult<PageDimensions> {
        self.check_page(page)?;
        Ok(self.page_dimensions[(page - 1) as usize])
    }

    /// Size of a page in native pixels at the base render scale.
    pub fn page_size_px(&self, page: u32) -> CoreResult<(f32, f32)> {
        let dims = self.page_dimensions(page)?;
        Ok((dims.width_pt * self.base_scale, dims.height_pt * self.base_scale))
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn set_current_page(&mut self, page: u32) -> CoreResult<()> {
        self.check_page(page)?;
        self.current_page = page;
        Ok(())
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(0.05, 32.0);
    }

    /// Viewport point to document-native point at the current zoom.
    pub fn screen_to_page(&self, point: ScreenPoint) -> PagePoint {
        point.to_page(self.zoom)
    }

    /// Document-native point to viewport point at the current zoom.
    pub fn page_to_screen(&self, point: PagePoint) -> ScreenPoint {
        point.to_screen(self.zoom)
    }

    pub fn store(&self) -> &MarkupStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MarkupStore {
        &mut self.store
    }

    /// Add a markup after validating its page number.
    pub fn add_markup(&mut self, markup: Markup) -> CoreResult<MarkupId> {
        self.check_page(markup.page)?;
        Ok(self.store.add_markup(markup))
    }

    /// Add a batch of markups as a single undoable unit per page.
    ///
    /// Every page is validated before anything is inserted, so a bad
    /// candidate leaves the store untouched.
    pub fn add_markup_batch(&mut self, markups: Vec<Markup>) -> CoreResult<Vec<MarkupId>> {
        for markup in &markups {
            self.check_page(markup.page)?;
        }
        Ok(self.store.add_markup_batch(markups))
    }

    /// Ensure the vector index for a page has been extracted.
    ///
    /// Safe to call speculatively; memoized per page. Returns `None` when a
    /// concurrent extraction for the page is in flight.
    pub fn ensure_vector_index(
        &mut self,
        page: u32,
        source: &dyn VectorSource,
    ) -> CoreResult<Option<Arc<PageVectorIndex>>> {
        self.check_page(page)?;
        self.vectors.ensure(page, source)
    }

    /// The cached vector index for a page, if extraction has completed.
    pub fn vector_index(&self, page: u32) -> Option<Arc<PageVectorIndex>> {
        self.vectors.get(page)
    }

    pub fn is_modified(&self) -> bool {
        self.store.is_modified()
    }

    pub fn clear_modified(&mut self) {
        self.store.clear_modified();
    }

    fn check_page(&self, page: u32) -> CoreResult<()> {
        if page == 0 || page > self.page_count {
            return Err(CoreError::PageOutOfRange { page, page_count: self.page_count });
        }
        Ok(())
    }
}

/// Owns every open session; exactly one is active for editing commands.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<DocumentId, DocumentSession>,
    active: Option<DocumentId>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and make it the active one.
    pub fn open(&mut self, session: DocumentSession) -> DocumentId {
        let id = session.id();
        debug!(document = %id, name = %session.name(), "session opened");
        self.sessions.insert(id, session);
        self.active = Some(id);
        id
    }

    /// Close a session, returning it to the caller.
    pub fn close(&mut self, id: DocumentId) -> Option<DocumentSession> {
        let session = self.sessions.remove(&id);
        if self.active == Some(id) {
            // Fall back to any remaining session.
            self.active = self.sessions.keys().next().copied();
        }
        session
    }

    pub fn activate(&mut self, id: DocumentId) -> CoreResult<()> {
        if !self.sessions.contains_key(&id) {
            return Err(CoreError::UnknownDocument(id));
        }
        self.active = Some(id);
        Ok(())
    }

    pub fn active(&self) -> CoreResult<&DocumentSession> {
        self.active
            .and_then(|id| self.sessions.get(&id))
            .ok_or(CoreError::NoActiveSession)
    }

    pub fn active_mut(&mut self) -> CoreResult<&mut DocumentSession> {
        match self.active {
            Some(id) => self.sessions.get_mut(&id).ok_or(CoreError::NoActiveSession),
            None => Err(CoreError::NoActiveSession),
        }
    }

    pub fn get(&self, id: DocumentId) -> Option<&DocumentSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: DocumentId) -> Option<&mut DocumentSession> {
        self.sessions.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        self.sessions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{MarkupShape, MarkupStyle};

    fn letter_pages(count: u32) -> DecodedDocument {
        DecodedDocument {
            page_count: count,
            page_dimensions: vec![PageDimensions { width_pt: 612.0, height_pt: 792.0 }; count as usize],
        }
    }

    fn open_session(pages: u32) -> DocumentSession {
        DocumentSession::open("plan.pdf", letter_pages(pages), vec![0x25, 0x50], 2.0)
            .expect("session opens")
    }

    #[test]
    fn test_open_validates_decode_result() {
        let err = DocumentSession::open("x", letter_pages(0), Vec::new(), 2.0).unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));

        let mismatched = DecodedDocument {
            page_count: 3,
            page_dimensions: vec![PageDimensions { width_pt: 612.0, height_pt: 792.0 }],
        };
        let err = DocumentSession::open("x", mismatched, Vec::new(), 2.0).unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
    }

    #[test]
    fn test_page_geometry() {
        let session = open_session(2);
        assert_eq!(session.page_count(), 2);

        let (w, h) = session.page_size_px(1).unwrap();
        assert!((w - 1224.0).abs() < 0.001);
        assert!((h - 1584.0).abs() < 0.001);

        assert!(matches!(
            session.page_size_px(3),
            Err(CoreError::PageOutOfRange { page: 3, page_count: 2 })
        ));
    }

    #[test]
    fn test_current_page_and_zoom() {
        let mut session = open_session(3);
        session.set_current_page(2).unwrap();
        assert_eq!(session.current_page(), 2);
        assert!(session.set_current_page(0).is_err());

        session.set_zoom(2.5);
        let screen = session.page_to_screen(PagePoint::new(10.0, 20.0));
        assert!((screen.x - 25.0).abs() < 0.001);
        let back = session.screen_to_page(screen);
        assert!((back.y - 20.0).abs() < 0.001);
    }

    #[test]
    fn test_add_markup_validates_page() {
        let mut session = open_session(2);
        let markup = Markup::new(
            5,
            MarkupShape::Line {
                start: PagePoint::new(0.0, 0.0),
                end: PagePoint::new(10.0, 10.0),
            },
            MarkupStyle::new(),
        );
        assert!(session.add_markup(markup).is_err());
        assert!(!session.is_modified());
    }

    #[test]
    fn test_batch_validates_before_inserting() {
        let mut session = open_session(2);
        let good = Markup::new(
            1,
            MarkupShape::CountMarker { position: PagePoint::new(5.0, 5.0), number: 1 },
            MarkupStyle::new(),
        );
        let bad = Markup::new(
            9,
            MarkupShape::CountMarker { position: PagePoint::new(5.0, 5.0), number: 2 },
            MarkupStyle::new(),
        );

        assert!(session.add_markup_batch(vec![good, bad]).is_err());
        assert_eq!(session.store().total_count(), 0);
    }

    #[test]
    fn test_manager_active_session() {
        let mut manager = SessionManager::new();
        assert!(matches!(manager.active(), Err(CoreError::NoActiveSession)));

        let first = manager.open(open_session(1));
        let second = manager.open(open_session(2));
        assert_eq!(manager.active().unwrap().id(), second);

        manager.activate(first).unwrap();
        assert_eq!(manager.active().unwrap().id(), first);

        assert!(manager.activate(DocumentId::new_v4()).is_err());
    }

    #[test]
    fn test_close_falls_back_to_remaining_session() {
        let mut manager = SessionManager::new();
        let first = manager.open(open_session(1));
        let second = manager.open(open_session(1));

        manager.close(second).expect("session existed");
        assert_eq!(manager.active().unwrap().id(), first);

        manager.close(first);
        assert!(manager.is_empty());
        assert!(matches!(manager.active(), Err(CoreError::NoActiveSession)));
    }
}
