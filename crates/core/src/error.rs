//! Error types for the annotation and measurement engine.

use crate::markup::MarkupId;
use uuid::Uuid;

/// Errors produced by engine operations.
///
/// Collaborator failures (document decode, AI pipeline) are surfaced through
/// the `Decode` and `Candidate` variants with a message; the store is left
/// untouched when they occur.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("markup {0} not found")]
    MarkupNotFound(MarkupId),

    #[error("markup {0} is locked")]
    MarkupLocked(MarkupId),

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("invalid candidate markup: {0}")]
    Candidate(String),

    #[error("document decode failed: {0}")]
    Decode(String),

    #[error("unknown document {0}")]
    UnknownDocument(Uuid),

    #[error("no active document session")]
    NoActiveSession,
}

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;
