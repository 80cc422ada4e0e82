//! Planmark annotation and measurement engine.
//!
//! Per-document markup store, coordinate/scale model, snapping, undo/redo
//! history with measurement-link cascades, document sessions, and AI
//! candidate intake. Document decode, rasterization, and export baking live
//! in the PDF layer; this crate only consumes their results through the
//! interfaces in [`session`] and [`vector_index`].

pub mod ai;
pub mod error;
pub mod geometry;
pub mod history;
pub mod links;
pub mod markup;
pub mod scale;
pub mod session;
pub mod snapping;
pub mod store;
pub mod vector_index;

pub use ai::{place_candidates, AiPlacement, CandidateKind, CandidateMarkup, StyleHint};
pub use error::{CoreError, CoreResult};
pub use geometry::{PagePoint, PdfPoint, ScreenPoint};
pub use history::{HistoryEngine, HistoryEntry, LinkDelta, DEFAULT_HISTORY_DEPTH};
pub use links::{
    LinkEvent, LinkId, LinkSink, LinkedMeasurement, MeasurementInput, MeasurementKind,
    MeasurementLinkGraph, ProductCatalog, ProductId, ProductNode,
};
pub use markup::{AiProvenance, Color, Markup, MarkupId, MarkupPatch, MarkupShape, MarkupStyle};
pub use scale::{ScaleCalibration, ScaleSource};
pub use session::{
    DecodedDocument, DocumentId, DocumentSession, PageDimensions, SessionManager,
};
pub use snapping::{SnapConfig, SnapEngine, SnapResolution, SnapSource};
pub use store::{measured_value, LinkContext, MarkupStore};
pub use vector_index::{LineSegment, PageVectorIndex, VectorIndexCache, VectorSource};
