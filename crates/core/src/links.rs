//! Measurement link graph and product catalog.
//!
//! Links associate one markup with exactly one product node, carrying the
//! quantity the markup contributes to that product's takeoff. The graph is
//! external to the markup store; deletions cascade into it and history
//! replay restores it.

use crate::markup::{now_unix, MarkupId, MarkupShape};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for a product catalog node.
pub type ProductId = Uuid;

/// Unique identifier for a measurement link.
pub type LinkId = Uuid;

/// What kind of quantity a linked measurement carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    Count,
    Length,
    Area,
}

impl MeasurementKind {
    /// Derive the measurement kind from a markup shape, for the takeoff
    /// variants that produce quantities.
    pub fn for_shape(shape: &MarkupShape) -> Option<MeasurementKind> {
        match shape {
            MarkupShape::CountMarker { .. } => Some(MeasurementKind::Count),
            MarkupShape::LengthMeasurement { .. } => Some(MeasurementKind::Length),
            MarkupShape::AreaMeasurement { .. } => Some(MeasurementKind::Area),
            _ => None,
        }
    }
}

/// An association from one markup to one product node.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinkedMeasurement {
    pub id: LinkId,
    pub product_id: ProductId,
    pub markup_id: MarkupId,
    pub document_id: Uuid,
    /// Page number, 1-indexed.
    pub page: u32,
    pub kind: MeasurementKind,
    pub value: f32,
    pub unit: String,
    /// Session batch this entry belongs to (e.g. one AI placement run).
    #[serde(default)]
    pub group_id: Option<Uuid>,
    #[serde(default)]
    pub group_label: Option<String>,
    pub created_at: i64,
}

/// Measurement link event published to estimation/reporting consumers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LinkEvent {
    pub product_id: ProductId,
    pub markup_id: MarkupId,
    pub document_id: Uuid,
    pub page: u32,
    pub kind: MeasurementKind,
    pub value: f32,
    pub unit: String,
    pub group_id: Option<Uuid>,
}

/// Quantity payload for creating a new link.
#[derive(Debug, Clone)]
pub struct MeasurementInput {
    pub markup_id: MarkupId,
    pub document_id: Uuid,
    pub page: u32,
    pub kind: MeasurementKind,
    pub value: f32,
    pub unit: String,
    pub group_id: Option<Uuid>,
    pub group_label: Option<String>,
}

/// Capability the markup store uses to cascade into the link graph.
///
/// Injected rather than imported so the store never owns link state and
/// tests can substitute a recording sink.
pub trait LinkSink {
    /// Remove and return the (at most one) link for a markup.
    fn unlink_markup(&mut self, markup_id: MarkupId) -> Option<LinkedMeasurement>;

    /// Re-insert a previously captured link record, keeping its identity.
    /// Returns `false` without inserting if the markup is already linked
    /// (idempotent relink).
    fn restore_link(&mut self, record: LinkedMeasurement) -> bool;

    /// Read-only lookup for the link of a markup.
    fn link_for_markup(&self, markup_id: MarkupId) -> Option<&LinkedMeasurement>;

    /// Patch a count link's stored value in place (see
    /// [`MeasurementLinkGraph::patch_count_value`]). Sinks without value
    /// storage may ignore the call.
    fn patch_count_value(&mut self, markup_id: MarkupId, value: f32) -> bool {
        let _ = (markup_id, value);
        false
    }
}

/// Many-markups-to-one-product association layer.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct MeasurementLinkGraph {
    links: HashMap<LinkId, LinkedMeasurement>,
    /// Invariant index: at most one active link per markup id.
    by_markup: HashMap<MarkupId, LinkId>,
}

impl MeasurementLinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new link with a generated id and timestamp.
    ///
    /// Returns `None` (no-op) if the markup already has an active link;
    /// safe retries of the same association are not errors.
    pub fn link(
        &mut self,
        product_id: ProductId,
        measurement: MeasurementInput,
    ) -> Option<LinkId> {
        if self.by_markup.contains_key(&measurement.markup_id) {
            debug!(markup = %measurement.markup_id, "markup already linked; ignoring");
            return None;
        }

        let record = LinkedMeasurement {
            id: LinkId::new_v4(),
            product_id,
            markup_id: measurement.markup_id,
            document_id: measurement.document_id,
            page: measurement.page,
            kind: measurement.kind,
            value: measurement.value,
            unit: measurement.unit,
            group_id: measurement.group_id,
            group_label: measurement.group_label,
            created_at: now_unix(),
        };

        let id = record.id;
        self.by_markup.insert(record.markup_id, id);
        self.links.insert(id, record);
        Some(id)
    }

    /// Find and remove the link for a markup, returning the removed record
    /// so cascade callers can capture it for history replay.
    pub fn unlink_by_markup(&mut self, markup_id: MarkupId) -> Option<LinkedMeasurement> {
        let link_id = self.by_markup.remove(&markup_id)?;
        self.links.remove(&link_id)
    }

    /// Read-only lookup by markup id.
    pub fn get_by_markup(&self, markup_id: MarkupId) -> Option<&LinkedMeasurement> {
        self.by_markup.get(&markup_id).and_then(|id| self.links.get(id))
    }

    pub fn get(&self, id: LinkId) -> Option<&LinkedMeasurement> {
        self.links.get(&id)
    }

    /// All links for one product.
    pub fn links_for_product(&self, product_id: ProductId) -> Vec<&LinkedMeasurement> {
        let mut links: Vec<&LinkedMeasurement> =
            self.links.values().filter(|l| l.product_id == product_id).collect();
        links.sort_by_key(|l| (l.created_at, l.id));
        links
    }

    /// Sum of linked values of one kind for a product.
    pub fn total_for_product(&self, product_id: ProductId, kind: MeasurementKind) -> f32 {
        self.links
            .values()
            .filter(|l| l.product_id == product_id && l.kind == kind)
            .map(|l| l.value)
            .sum()
    }

    /// Renumbering a count marker patches the stored value in place without
    /// touching link identity. The only sanctioned in-place value edit;
    /// every other correction is unlink-and-relink.
    pub fn patch_count_value(&mut self, markup_id: MarkupId, value: f32) -> bool {
        let Some(link_id) = self.by_markup.get(&markup_id) else {
            return false;
        };
        match self.links.get_mut(link_id) {
            Some(record) if record.kind == MeasurementKind::Count => {
                record.value = value;
                true
            }
            _ => false,
        }
    }

    /// All link events, ordered by creation for stable reporting output.
    pub fn events(&self) -> Vec<LinkEvent> {
        let mut records: Vec<&LinkedMeasurement> = self.links.values().collect();
        records.sort_by_key(|l| (l.created_at, l.id));
        records
            .into_iter()
            .map(|l| LinkEvent {
                product_id: l.product_id,
                markup_id: l.markup_id,
                document_id: l.document_id,
                page: l.page,
                kind: l.kind,
                value: l.value,
                unit: l.unit.clone(),
                group_id: l.group_id,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// All link records (serialization).
    pub fn records(&self) -> Vec<&LinkedMeasurement> {
        let mut records: Vec<&LinkedMeasurement> = self.links.values().collect();
        records.sort_by_key(|l| (l.created_at, l.id));
        records
    }

    /// Rebuild a graph from stored records, re-deriving fresh link ids.
    ///
    /// Returns the graph plus the id-remap table (old id -> new id) so
    /// callers can fix up references held elsewhere.
    pub fn from_records(
        records: Vec<LinkedMeasurement>,
    ) -> (MeasurementLinkGraph, HashMap<LinkId, LinkId>) {
        let mut graph = MeasurementLinkGraph::new();
        let mut remap = HashMap::new();

        for mut record in records {
            if graph.by_markup.contains_key(&record.markup_id) {
                debug!(markup = %record.markup_id, "duplicate link for markup dropped on load");
                continue;
            }
            let old_id = record.id;
            record.id = LinkId::new_v4();
            remap.insert(old_id, record.id);
            graph.by_markup.insert(record.markup_id, record.id);
            graph.links.insert(record.id, record);
        }

        (graph, remap)
    }
}

impl LinkSink for MeasurementLinkGraph {
    fn unlink_markup(&mut self, markup_id: MarkupId) -> Option<LinkedMeasurement> {
        self.unlink_by_markup(markup_id)
    }

    fn restore_link(&mut self, record: LinkedMeasurement) -> bool {
        if self.by_markup.contains_key(&record.markup_id) {
            return false;
        }
        self.by_markup.insert(record.markup_id, record.id);
        self.links.insert(record.id, record);
        true
    }

    fn link_for_markup(&self, markup_id: MarkupId) -> Option<&LinkedMeasurement> {
        self.get_by_markup(markup_id)
    }

    fn patch_count_value(&mut self, markup_id: MarkupId, value: f32) -> bool {
        MeasurementLinkGraph::patch_count_value(self, markup_id, value)
    }
}

/// One node of the hierarchical product catalog.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProductNode {
    pub id: ProductId,
    pub name: String,
    /// Unit quantities for this product are reported in.
    pub unit: String,
    #[serde(default)]
    pub children: Vec<ProductId>,
}

/// Hierarchical product catalog, persisted with the project.
///
/// Catalog synchronization with any remote source is a collaborator
/// concern; the engine only reads node identity and units.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProductCatalog {
    pub nodes: HashMap<ProductId, ProductNode>,
    pub root_ids: Vec<ProductId>,
}

impl ProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: impl Into<String>, unit: impl Into<String>) -> ProductId {
        let node = ProductNode {
            id: ProductId::new_v4(),
            name: name.into(),
            unit: unit.into(),
            children: Vec::new(),
        };
        let id = node.id;
        self.nodes.insert(id, node);
        self.root_ids.push(id);
        id
    }

    pub fn add_child(
        &mut self,
        parent: ProductId,
        name: impl Into<String>,
        unit: impl Into<String>,
    ) -> Option<ProductId> {
        if !self.nodes.contains_key(&parent) {
            return None;
        }
        let node = ProductNode {
            id: ProductId::new_v4(),
            name: name.into(),
            unit: unit.into(),
            children: Vec::new(),
        };
        let id = node.id;
        self.nodes.insert(id, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }
        Some(id)
    }

    pub fn get(&self, id: ProductId) -> Option<&ProductNode> {
        self.nodes.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(markup_id: MarkupId, value: f32) -> MeasurementInput {
        MeasurementInput {
            markup_id,
            document_id: Uuid::new_v4(),
            page: 1,
            kind: MeasurementKind::Count,
            value,
            unit: "ea".to_string(),
            group_id: None,
            group_label: None,
        }
    }

    #[test]
    fn test_link_and_lookup() {
        let mut graph = MeasurementLinkGraph::new();
        let product = ProductId::new_v4();
        let markup = MarkupId::new_v4();

        let link_id = graph.link(product, input(markup, 3.0)).expect("link created");
        let record = graph.get_by_markup(markup).expect("lookup by markup");
        assert_eq!(record.id, link_id);
        assert_eq!(record.product_id, product);
        assert_eq!(record.value, 3.0);
    }

    #[test]
    fn test_second_link_is_noop() {
        let mut graph = MeasurementLinkGraph::new();
        let markup = MarkupId::new_v4();

        graph.link(ProductId::new_v4(), input(markup, 1.0)).expect("first link");
        assert!(graph.link(ProductId::new_v4(), input(markup, 2.0)).is_none());
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get_by_markup(markup).unwrap().value, 1.0);
    }

    #[test]
    fn test_unlink_returns_record() {
        let mut graph = MeasurementLinkGraph::new();
        let product = ProductId::new_v4();
        let markup = MarkupId::new_v4();

        graph.link(product, input(markup, 5.0));
        let removed = graph.unlink_by_markup(markup).expect("removed record");
        assert_eq!(removed.value, 5.0);
        assert!(graph.get_by_markup(markup).is_none());
        assert!(graph.is_empty());

        // A cascade that finds nothing is not an error.
        assert!(graph.unlink_by_markup(markup).is_none());
    }

    #[test]
    fn test_restore_is_idempotent() {
        let mut graph = MeasurementLinkGraph::new();
        let product = ProductId::new_v4();
        let markup = MarkupId::new_v4();

        graph.link(product, input(markup, 5.0));
        let removed = graph.unlink_by_markup(markup).unwrap();

        assert!(graph.restore_link(removed.clone()));
        assert!(!graph.restore_link(removed)); // second restore is a no-op
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_totals() {
        let mut graph = MeasurementLinkGraph::new();
        let product = ProductId::new_v4();

        graph.link(product, input(MarkupId::new_v4(), 2.0));
        graph.link(product, input(MarkupId::new_v4(), 3.0));
        graph.link(ProductId::new_v4(), input(MarkupId::new_v4(), 10.0));

        assert!((graph.total_for_product(product, MeasurementKind::Count) - 5.0).abs() < 0.001);
        assert_eq!(graph.total_for_product(product, MeasurementKind::Length), 0.0);
    }

    #[test]
    fn test_patch_count_value() {
        let mut graph = MeasurementLinkGraph::new();
        let markup = MarkupId::new_v4();
        graph.link(ProductId::new_v4(), input(markup, 1.0));

        assert!(graph.patch_count_value(markup, 7.0));
        assert_eq!(graph.get_by_markup(markup).unwrap().value, 7.0);

        // Non-count links are not patchable in place.
        let length_markup = MarkupId::new_v4();
        let mut length_input = input(length_markup, 12.0);
        length_input.kind = MeasurementKind::Length;
        graph.link(ProductId::new_v4(), length_input);
        assert!(!graph.patch_count_value(length_markup, 99.0));
    }

    #[test]
    fn test_from_records_remaps_ids() {
        let mut graph = MeasurementLinkGraph::new();
        let markup = MarkupId::new_v4();
        let product = ProductId::new_v4();
        graph.link(product, input(markup, 4.0));

        let records: Vec<LinkedMeasurement> = graph.records().into_iter().cloned().collect();
        let old_id = records[0].id;

        let (restored, remap) = MeasurementLinkGraph::from_records(records);
        let new_id = remap.get(&old_id).copied().expect("old id remapped");
        assert_ne!(new_id, old_id);

        let record = restored.get_by_markup(markup).expect("link survives reload");
        assert_eq!(record.id, new_id);
        assert_eq!(record.product_id, product);
        assert_eq!(record.value, 4.0);
    }

    #[test]
    fn test_catalog_hierarchy() {
        let mut catalog = ProductCatalog::new();
        let concrete = catalog.add_root("Concrete", "m³");
        let footing = catalog.add_child(concrete, "Footings", "m³").expect("child added");

        assert_eq!(catalog.root_ids, vec![concrete]);
        assert_eq!(catalog.get(concrete).unwrap().children, vec![footing]);
        assert!(catalog.add_child(ProductId::new_v4(), "Orphan", "ea").is_none());
    }
}
