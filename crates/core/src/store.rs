//! Per-document markup store.
//!
//! Owns the page-indexed markup collections and the document's undo/redo
//! history. Every mutation records one history entry with full before/after
//! snapshots of the affected page, and deletions cascade into the
//! measurement link graph through the injected [`LinkSink`] capability
//! before the call returns.

use crate::error::{CoreError, CoreResult};
use crate::history::{HistoryEngine, HistoryEntry, LinkDelta, DEFAULT_HISTORY_DEPTH};
use crate::links::{LinkSink, LinkedMeasurement, MeasurementKind};
use crate::markup::{now_unix, Markup, MarkupId, MarkupPatch, MarkupShape};
use crate::scale::ScaleCalibration;
use crate::geometry::PagePoint;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Context undo/redo needs to reconstruct measurement links when a history
/// entry carries no captured delta for a re-added markup.
pub struct LinkContext<'a> {
    pub document_id: Uuid,
    pub calibration: &'a ScaleCalibration,
}

/// Page-indexed markup collections for one document.
#[derive(Debug)]
pub struct MarkupStore {
    pages: BTreeMap<u32, Vec<Markup>>,
    history: HistoryEngine,
    /// Bumped on every collection change; the snapping engine rebuilds its
    /// per-page markup snap cache when this moves.
    snap_revision: u64,
    modified: bool,
}

impl MarkupStore {
    pub fn new() -> Self {
        Self::with_history_depth(DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_history_depth(depth: usize) -> Self {
        Self {
            pages: BTreeMap::new(),
            history: HistoryEngine::with_depth(depth),
            snap_revision: 0,
            modified: false,
        }
    }

    /// Markups on a page, in insertion order.
    pub fn markups_on(&self, page: u32) -> &[Markup] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, page: u32, id: MarkupId) -> Option<&Markup> {
        self.markups_on(page).iter().find(|m| m.id == id)
    }

    /// All pages that currently hold markups.
    pub fn pages_with_markups(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    /// Per-page snapshot of every markup, for export and persistence.
    pub fn markups_by_page(&self) -> BTreeMap<u32, Vec<Markup>> {
        self.pages.clone()
    }

    pub fn total_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    /// Add one markup, recording a history entry.
    pub fn add_markup(&mut self, markup: Markup) -> MarkupId {
        let page = markup.page;
        let id = markup.id;
        let before = self.markups_on(page).to_vec();
        let description = format!("add {}", markup.shape.kind_name());

        self.pages.entry(page).or_default().push(markup);

        let after = self.markups_on(page).to_vec();
        self.history.push(HistoryEntry::new(page, before, after, description));
        self.touch();
        id
    }

    /// Insert a batch of markups (one AI placement run) as a single
    /// undoable unit per affected page.
    pub fn add_markup_batch(&mut self, markups: Vec<Markup>) -> Vec<MarkupId> {
        if markups.is_empty() {
            return Vec::new();
        }

        let mut ids = Vec::with_capacity(markups.len());
        let mut by_page: BTreeMap<u32, Vec<Markup>> = BTreeMap::new();
        for markup in markups {
            ids.push(markup.id);
            by_page.entry(markup.page).or_default().push(markup);
        }

        for (page, group) in by_page {
            let before = self.markups_on(page).to_vec();
            let description = format!("place {} proposed markups", group.len());
            self.pages.entry(page).or_default().extend(group);
            let after = self.markups_on(page).to_vec();
            self.history.push(HistoryEntry::new(page, before, after, description));
        }

        self.touch();
        ids
    }

    /// Apply a partial update to one markup.
    ///
    /// Locked markups reject every patch except one that unlocks them.
    pub fn update_markup(&mut self, page: u32, id: MarkupId, patch: MarkupPatch) -> CoreResult<()> {
        let collection = self.pages.get(&page).ok_or(CoreError::MarkupNotFound(id))?;
        let index = collection
            .iter()
            .position(|m| m.id == id)
            .ok_or(CoreError::MarkupNotFound(id))?;

        if collection[index].locked && patch.locked != Some(false) {
            return Err(CoreError::MarkupLocked(id));
        }

        let before = collection.clone();
        let markup = &mut self.pages.get_mut(&page).expect("page exists")[index];
        let description = format!("edit {}", markup.shape.kind_name());

        if let Some(shape) = patch.shape {
            markup.shape = shape;
        }
        if let Some(style) = patch.style {
            markup.style = style;
        }
        if let Some(label) = patch.label {
            markup.label = label;
        }
        if let Some(locked) = patch.locked {
            markup.locked = locked;
        }
        if let Some(product_ref) = patch.product_ref {
            markup.product_ref = product_ref;
        }

        let after = self.markups_on(page).to_vec();
        self.history.push(HistoryEntry::new(page, before, after, description));
        self.touch();
        Ok(())
    }

    /// Renumber a count marker's displayed index.
    ///
    /// The linked measurement's stored value is patched in place without
    /// changing link identity (the one sanctioned in-place value edit).
    pub fn renumber_count(
        &mut self,
        page: u32,
        id: MarkupId,
        number: u32,
        links: &mut dyn LinkSink,
    ) -> CoreResult<()> {
        let markup = self.find(page, id).ok_or(CoreError::MarkupNotFound(id))?;
        let position = match &markup.shape {
            MarkupShape::CountMarker { position, .. } => *position,
            other => {
                return Err(CoreError::DegenerateGeometry(format!(
                    "renumber applies to count markers, not {}",
                    other.kind_name()
                )));
            }
        };

        self.update_markup(
            page,
            id,
            MarkupPatch::shape(MarkupShape::CountMarker { position, number }),
        )?;

        if links.link_for_markup(id).is_some() {
            links.patch_count_value(id, number as f32);
        }
        Ok(())
    }

    /// Delete markups from a page, cascading their measurement links.
    ///
    /// Unlinked payloads are captured into the history entry so undo can
    /// replay them. Returns the number of markups actually removed.
    pub fn delete_markups(
        &mut self,
        page: u32,
        ids: &[MarkupId],
        links: &mut dyn LinkSink,
    ) -> usize {
        let Some(collection) = self.pages.get(&page) else {
            return 0;
        };

        let targets: HashSet<MarkupId> = ids.iter().copied().collect();
        let before = collection.clone();
        let removed_ids: Vec<MarkupId> = collection
            .iter()
            .filter(|m| targets.contains(&m.id))
            .map(|m| m.id)
            .collect();

        if removed_ids.is_empty() {
            return 0;
        }

        self.pages
            .get_mut(&page)
            .expect("page exists")
            .retain(|m| !targets.contains(&m.id));

        let mut entry = HistoryEntry::new(
            page,
            before,
            self.markups_on(page).to_vec(),
            format!("delete {} markup(s)", removed_ids.len()),
        );

        for id in &removed_ids {
            if let Some(record) = links.unlink_markup(*id) {
                debug!(markup = %id, product = %record.product_id, "cascade unlink");
                entry.link_deltas.push(LinkDelta { product_id: record.product_id, record });
            }
        }

        self.history.push(entry);
        self.touch();
        removed_ids.len()
    }

    /// Confirm an AI proposal: clears the pending flag in place. Not a
    /// collection change, so it records no history entry.
    pub fn confirm_ai(&mut self, page: u32, id: MarkupId) -> CoreResult<()> {
        let collection = self.pages.get_mut(&page).ok_or(CoreError::MarkupNotFound(id))?;
        let markup = collection
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(CoreError::MarkupNotFound(id))?;

        match markup.ai.as_mut() {
            Some(ai) => {
                ai.pending = false;
                self.modified = true;
                Ok(())
            }
            None => Err(CoreError::Candidate(format!("markup {id} was not proposed by AI"))),
        }
    }

    /// Reject an AI proposal: routed through the normal delete path so the
    /// link cascade applies.
    pub fn reject_ai(&mut self, page: u32, id: MarkupId, links: &mut dyn LinkSink) -> CoreResult<()> {
        if self.find(page, id).is_none() {
            return Err(CoreError::MarkupNotFound(id));
        }
        self.delete_markups(page, &[id], links);
        Ok(())
    }

    /// Undo the most recent mutation.
    ///
    /// Returns the affected page, or `None` when there is nothing to undo.
    pub fn undo(&mut self, ctx: &LinkContext<'_>, links: &mut dyn LinkSink) -> Option<u32> {
        let entry = self.history.undo()?.clone();
        self.apply_replay(&entry.after, &entry.before, &entry.link_deltas, ctx, links);
        self.pages.insert(entry.page, entry.before.clone());
        self.touch();
        Some(entry.page)
    }

    /// Redo the most recently undone mutation.
    pub fn redo(&mut self, ctx: &LinkContext<'_>, links: &mut dyn LinkSink) -> Option<u32> {
        let entry = self.history.redo()?.clone();
        self.apply_replay(&entry.before, &entry.after, &entry.link_deltas, ctx, links);
        self.pages.insert(entry.page, entry.after.clone());
        self.touch();
        Some(entry.page)
    }

    /// Unlink markups the replay removes and relink markups it restores.
    ///
    /// `from` is the collection being left, `to` the collection being
    /// applied. Relink prefers captured deltas and falls back to the
    /// markup's own embedded product reference; both paths are idempotent.
    fn apply_replay(
        &self,
        from: &[Markup],
        to: &[Markup],
        deltas: &[LinkDelta],
        ctx: &LinkContext<'_>,
        links: &mut dyn LinkSink,
    ) {
        let from_ids: HashSet<MarkupId> = from.iter().map(|m| m.id).collect();
        let to_ids: HashSet<MarkupId> = to.iter().map(|m| m.id).collect();

        // Markups removed by this replay lose their links.
        for markup in from.iter().filter(|m| !to_ids.contains(&m.id)) {
            links.unlink_markup(markup.id);
        }

        // Markups restored by this replay get their links back.
        for markup in to.iter().filter(|m| !from_ids.contains(&m.id)) {
            if let Some(delta) = deltas.iter().find(|d| d.record.markup_id == markup.id) {
                links.restore_link(delta.record.clone());
                continue;
            }

            let Some(product_id) = markup.product_ref else {
                continue;
            };
            let Some((kind, value, unit)) = measured_value(&markup.shape, ctx.calibration) else {
                warn!(markup = %markup.id, "product reference on a non-takeoff markup; skipped");
                continue;
            };

            links.restore_link(LinkedMeasurement {
                id: Uuid::new_v4(),
                product_id,
                markup_id: markup.id,
                document_id: ctx.document_id,
                page: markup.page,
                kind,
                value,
                unit,
                group_id: markup.ai.as_ref().and_then(|ai| ai.group_id),
                group_label: None,
                created_at: now_unix(),
            });
        }
    }

    /// Markups at a point on a page, most recently placed first.
    pub fn hit_test(&self, page: u32, point: &PagePoint, tolerance: f32) -> Vec<&Markup> {
        let mut hits: Vec<&Markup> = self
            .markups_on(page)
            .iter()
            .filter(|m| m.hit_test(point, tolerance))
            .collect();
        hits.reverse();
        hits
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> &HistoryEngine {
        &self.history
    }

    /// Current snap cache revision; moves on every collection change.
    pub fn snap_revision(&self) -> u64 {
        self.snap_revision
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    /// Load a persisted collection without recording history.
    pub fn load_markups(&mut self, markups: Vec<Markup>) {
        for markup in markups {
            self.pages.entry(markup.page).or_default().push(markup);
        }
        self.snap_revision += 1;
    }

    fn touch(&mut self) {
        self.snap_revision += 1;
        self.modified = true;
    }
}

impl Default for MarkupStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the takeoff quantity a markup contributes, in real-world units.
pub fn measured_value(
    shape: &MarkupShape,
    calibration: &ScaleCalibration,
) -> Option<(MeasurementKind, f32, String)> {
    match MeasurementKind::for_shape(shape)? {
        MeasurementKind::Count => {
            let number = match shape {
                MarkupShape::CountMarker { number, .. } => *number,
                _ => return None,
            };
            Some((MeasurementKind::Count, number as f32, "ea".to_string()))
        }
        MeasurementKind::Length => Some((
            MeasurementKind::Length,
            calibration.px_to_units(shape.path_length()),
            calibration.unit().to_string(),
        )),
        MeasurementKind::Area => Some((
            MeasurementKind::Area,
            calibration.px_area_to_units(shape.enclosed_area()),
            format!("{}²", calibration.unit()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{MeasurementInput, MeasurementLinkGraph, ProductId};
    use crate::markup::MarkupStyle;

    fn ctx_calibration() -> ScaleCalibration {
        ScaleCalibration::manual(15.0, "ft")
    }

    fn link_ctx<'a>(calibration: &'a ScaleCalibration, document_id: Uuid) -> LinkContext<'a> {
        LinkContext { document_id, calibration }
    }

    fn count_marker(page: u32, number: u32) -> Markup {
        Markup::new(
            page,
            MarkupShape::CountMarker { position: PagePoint::new(40.0, 40.0), number },
            MarkupStyle::new(),
        )
    }

    fn length_markup(page: u32) -> Markup {
        Markup::new(
            page,
            MarkupShape::LengthMeasurement {
                points: vec![PagePoint::new(0.0, 0.0), PagePoint::new(300.0, 0.0)],
            },
            MarkupStyle::new(),
        )
    }

    fn link_count(
        graph: &mut MeasurementLinkGraph,
        product: ProductId,
        markup: &Markup,
        document_id: Uuid,
        value: f32,
    ) {
        graph.link(
            product,
            MeasurementInput {
                markup_id: markup.id,
                document_id,
                page: markup.page,
                kind: MeasurementKind::Count,
                value,
                unit: "ea".to_string(),
                group_id: None,
                group_label: None,
            },
        );
    }

    #[test]
    fn test_add_and_find() {
        let mut store = MarkupStore::new();
        let markup = count_marker(1, 1);
        let id = store.add_markup(markup);

        assert_eq!(store.markups_on(1).len(), 1);
        assert!(store.find(1, id).is_some());
        assert!(store.is_modified());
        assert!(store.can_undo());
    }

    #[test]
    fn test_update_patch() {
        let mut store = MarkupStore::new();
        let id = store.add_markup(count_marker(1, 1));

        store
            .update_markup(1, id, MarkupPatch { label: Some(Some("door".into())), ..Default::default() })
            .unwrap();
        assert_eq!(store.find(1, id).unwrap().label.as_deref(), Some("door"));
    }

    #[test]
    fn test_locked_markup_rejects_updates() {
        let mut store = MarkupStore::new();
        let id = store.add_markup(count_marker(1, 1));

        store
            .update_markup(1, id, MarkupPatch { locked: Some(true), ..Default::default() })
            .unwrap();

        let err = store
            .update_markup(1, id, MarkupPatch { label: Some(Some("x".into())), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, CoreError::MarkupLocked(_)));

        // Unlocking is the one patch a locked markup accepts.
        store
            .update_markup(1, id, MarkupPatch { locked: Some(false), ..Default::default() })
            .unwrap();
    }

    #[test]
    fn test_delete_cascades_unlink() {
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let document_id = Uuid::new_v4();
        let product = ProductId::new_v4();

        let markup = count_marker(1, 3);
        let id = markup.id;
        link_count(&mut graph, product, &markup, document_id, 3.0);
        store.add_markup(markup);

        let removed = store.delete_markups(1, &[id], &mut graph);
        assert_eq!(removed, 1);
        assert!(graph.get_by_markup(id).is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_delete_undo_restores_link() {
        // Add markup A on page 2, link it to product X with value 3, delete,
        // undo: product X again shows exactly one measurement with value 3
        // and the same markup id.
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let document_id = Uuid::new_v4();
        let calibration = ctx_calibration();
        let product_x = ProductId::new_v4();

        let markup = count_marker(2, 3);
        let markup_id = markup.id;
        link_count(&mut graph, product_x, &markup, document_id, 3.0);
        store.add_markup(markup);

        store.delete_markups(2, &[markup_id], &mut graph);
        assert!(graph.is_empty());

        let page = store.undo(&link_ctx(&calibration, document_id), &mut graph);
        assert_eq!(page, Some(2));
        assert_eq!(store.markups_on(2).len(), 1);

        let restored = graph.links_for_product(product_x);
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].markup_id, markup_id);
        assert_eq!(restored[0].value, 3.0);
        assert_eq!(restored[0].product_id, product_x);
    }

    #[test]
    fn test_redo_of_delete_unlinks_again() {
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let document_id = Uuid::new_v4();
        let calibration = ctx_calibration();

        let markup = count_marker(1, 1);
        let id = markup.id;
        link_count(&mut graph, ProductId::new_v4(), &markup, document_id, 1.0);
        store.add_markup(markup);

        store.delete_markups(1, &[id], &mut graph);
        let ctx = link_ctx(&calibration, document_id);
        store.undo(&ctx, &mut graph);
        assert_eq!(graph.len(), 1);

        store.redo(&ctx, &mut graph);
        assert!(store.markups_on(1).is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_undo_redo_symmetry() {
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let document_id = Uuid::new_v4();
        let calibration = ctx_calibration();
        let ctx = link_ctx(&calibration, document_id);

        let a = store.add_markup(count_marker(1, 1));
        store.add_markup(count_marker(2, 2));
        store.add_markup(length_markup(1));
        store
            .update_markup(1, a, MarkupPatch { label: Some(Some("west wall".into())), ..Default::default() })
            .unwrap();
        store.delete_markups(1, &[a], &mut graph);

        let expected = store.markups_by_page();

        for _ in 0..5 {
            store.undo(&ctx, &mut graph);
        }
        assert!(store.markups_on(1).is_empty());
        assert!(store.markups_on(2).is_empty());

        for _ in 0..5 {
            store.redo(&ctx, &mut graph);
        }
        assert_eq!(store.markups_by_page(), expected);
    }

    #[test]
    fn test_undo_on_empty_store_is_noop() {
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let calibration = ctx_calibration();
        let ctx = link_ctx(&calibration, Uuid::new_v4());

        assert!(store.undo(&ctx, &mut graph).is_none());
        assert!(store.redo(&ctx, &mut graph).is_none());
    }

    #[test]
    fn test_relink_fallback_from_product_ref() {
        // No captured delta: the markup's embedded product reference is used
        // to reconstruct the link on redo.
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let document_id = Uuid::new_v4();
        let calibration = ctx_calibration();
        let ctx = link_ctx(&calibration, document_id);
        let product = ProductId::new_v4();

        let mut markup = length_markup(1);
        markup.product_ref = Some(product);
        let id = store.add_markup(markup);

        // Undo the add removes the (unlinked) markup; redo re-adds it and
        // reconstructs a link from the embedded reference.
        store.undo(&ctx, &mut graph);
        assert!(store.markups_on(1).is_empty());

        store.redo(&ctx, &mut graph);
        let record = graph.get_by_markup(id).expect("link reconstructed");
        assert_eq!(record.product_id, product);
        assert_eq!(record.kind, MeasurementKind::Length);
        // 300 px at 15 px/ft = 20 ft
        assert!((record.value - 20.0).abs() < 0.001);
        assert_eq!(record.unit, "ft");
    }

    #[test]
    fn test_batch_is_single_undo_unit_per_page() {
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let calibration = ctx_calibration();
        let ctx = link_ctx(&calibration, Uuid::new_v4());

        store.add_markup_batch(vec![
            count_marker(1, 1),
            count_marker(1, 2),
            count_marker(1, 3),
        ]);
        assert_eq!(store.markups_on(1).len(), 3);

        // One undo removes the whole batch for the page.
        store.undo(&ctx, &mut graph);
        assert!(store.markups_on(1).is_empty());
        assert!(!store.can_undo());
    }

    #[test]
    fn test_confirm_and_reject_ai() {
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();

        let mut proposal = count_marker(1, 1);
        proposal.ai = Some(crate::markup::AiProvenance {
            pending: true,
            note: Some("possible fixture".into()),
            source_item: None,
            group_id: None,
        });
        let id = store.add_markup(proposal);
        assert!(store.find(1, id).unwrap().is_pending());

        store.confirm_ai(1, id).unwrap();
        assert!(!store.find(1, id).unwrap().is_pending());

        store.reject_ai(1, id, &mut graph).unwrap();
        assert!(store.markups_on(1).is_empty());

        // Rejecting a user-drawn markup is a candidate error only when the
        // markup doesn't exist at all.
        assert!(matches!(
            store.reject_ai(1, id, &mut graph),
            Err(CoreError::MarkupNotFound(_))
        ));
    }

    #[test]
    fn test_renumber_count_patches_link_value() {
        let mut store = MarkupStore::new();
        let mut graph = MeasurementLinkGraph::new();
        let document_id = Uuid::new_v4();
        let product = ProductId::new_v4();

        let markup = count_marker(1, 4);
        let id = markup.id;
        link_count(&mut graph, product, &markup, document_id, 4.0);
        store.add_markup(markup);

        let link_id_before = graph.get_by_markup(id).unwrap().id;
        store.renumber_count(1, id, 9, &mut graph).unwrap();

        match &store.find(1, id).unwrap().shape {
            MarkupShape::CountMarker { number, .. } => assert_eq!(*number, 9),
            _ => panic!("shape changed kind"),
        }
        let record = graph.get_by_markup(id).unwrap();
        assert_eq!(record.value, 9.0);
        assert_eq!(record.id, link_id_before); // link identity unchanged
    }

    #[test]
    fn test_snap_revision_moves_on_mutation() {
        let mut store = MarkupStore::new();
        let rev0 = store.snap_revision();
        store.add_markup(count_marker(1, 1));
        assert!(store.snap_revision() > rev0);
    }

    #[test]
    fn test_load_markups_records_no_history() {
        let mut store = MarkupStore::new();
        store.load_markups(vec![count_marker(1, 1), count_marker(2, 2)]);

        assert_eq!(store.total_count(), 2);
        assert!(!store.can_undo());
        assert!(!store.is_modified());
    }

    #[test]
    fn test_history_bound_holds_through_store() {
        let mut store = MarkupStore::with_history_depth(4);
        let mut graph = MeasurementLinkGraph::new();
        let calibration = ctx_calibration();
        let ctx = link_ctx(&calibration, Uuid::new_v4());

        for i in 0..10 {
            store.add_markup(count_marker(1, i));
        }
        assert_eq!(store.history().undo_depth(), 4);

        // Only the four most recent adds unwind.
        let mut undone = 0;
        while store.undo(&ctx, &mut graph).is_some() {
            undone += 1;
        }
        assert_eq!(undone, 4);
        assert_eq!(store.markups_on(1).len(), 6);
    }
}
