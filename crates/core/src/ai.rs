//! AI candidate markup intake.
//!
//! The AI analysis pipeline proposes markups in a normalized placement
//! format with coordinates in its own rendering space. Intake converts
//! them into native markups (scaling against the page's rendering scale
//! factor), attaches pending provenance, and inserts them through the same
//! batch path user mutations use. Every candidate is validated before any
//! is inserted, so a malformed batch leaves the store untouched.

use crate::error::{CoreError, CoreResult};
use crate::geometry::PagePoint;
use crate::markup::{AiProvenance, Markup, MarkupId, MarkupShape, MarkupStyle};
use crate::session::DocumentSession;
use tracing::debug;
use uuid::Uuid;

/// Markup kinds the pipeline may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Count,
    Length,
    Area,
    Rectangle,
    Polygon,
    Line,
    Text,
}

/// Optional style hints attached to a candidate.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StyleHint {
    pub stroke_rgb: Option<[u8; 3]>,
    pub label: Option<String>,
}

/// One proposed markup in the pipeline's normalized placement format.
///
/// `points` are in the pipeline's rendering space, at `render_scale`
/// pixels per point.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CandidateMarkup {
    pub kind: CandidateKind,
    /// Target page, 1-indexed.
    pub page: u32,
    pub points: Vec<[f32; 2]>,
    #[serde(default)]
    pub style: Option<StyleHint>,
    /// Id of the analysis item this markup was derived from.
    #[serde(default)]
    pub source_item: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl CandidateMarkup {
    fn required_points(&self) -> usize {
        match self.kind {
            CandidateKind::Count | CandidateKind::Text => 1,
            CandidateKind::Length | CandidateKind::Rectangle | CandidateKind::Line => 2,
            CandidateKind::Area | CandidateKind::Polygon => 3,
        }
    }

    /// Convert into a native markup.
    ///
    /// `factor` maps rendering-space pixels to native pixels
    /// (`base_scale / render_scale`).
    fn to_markup(&self, factor: f32, group_id: Uuid, next_count: u32) -> CoreResult<Markup> {
        if self.points.len() < self.required_points() {
            return Err(CoreError::Candidate(format!(
                "{:?} candidate needs at least {} points, got {}",
                self.kind,
                self.required_points(),
                self.points.len()
            )));
        }

        let points: Vec<PagePoint> = self
            .points
            .iter()
            .map(|[x, y]| PagePoint::new(x * factor, y * factor))
            .collect();

        let shape = match self.kind {
            CandidateKind::Count => {
                MarkupShape::CountMarker { position: points[0], number: next_count }
            }
            CandidateKind::Length => MarkupShape::LengthMeasurement { points },
            CandidateKind::Area => MarkupShape::AreaMeasurement { points },
            CandidateKind::Rectangle => MarkupShape::Rectangle {
                top_left: points[0],
                bottom_right: points[1],
            },
            CandidateKind::Polygon => MarkupShape::Polygon { points },
            CandidateKind::Line => MarkupShape::Line { start: points[0], end: points[1] },
            CandidateKind::Text => {
                MarkupShape::Text { position: points[0], max_width: None }
            }
        };

        let mut style = match self.kind {
            CandidateKind::Text => MarkupStyle::text(),
            _ => MarkupStyle::new(),
        };
        if let Some(hint) = &self.style {
            if let Some([r, g, b]) = hint.stroke_rgb {
                style.stroke_color = crate::markup::Color::rgb(r, g, b);
            }
        }

        let mut markup = Markup::new(self.page, shape, style);
        markup.label = self.style.as_ref().and_then(|hint| hint.label.clone());
        markup.ai = Some(AiProvenance {
            pending: true,
            note: self.note.clone(),
            source_item: self.source_item.clone(),
            group_id: Some(group_id),
        });
        Ok(markup)
    }
}

/// Result of placing one candidate batch.
#[derive(Debug, Clone)]
pub struct AiPlacement {
    /// Batch id shared by every placed markup and any links created for the
    /// batch later.
    pub group_id: Uuid,
    pub markup_ids: Vec<MarkupId>,
}

/// Convert and insert a batch of candidates into a session.
///
/// `render_scale` is the pixels-per-point scale the pipeline rendered
/// pages at. The batch is one undoable unit per affected page. A failure
/// while validating or converting any candidate leaves the store untouched.
pub fn place_candidates(
    session: &mut DocumentSession,
    candidates: Vec<CandidateMarkup>,
    render_scale: f32,
) -> CoreResult<AiPlacement> {
    if render_scale <= 0.0 {
        return Err(CoreError::Candidate("render scale must be positive".into()));
    }

    let factor = session.base_scale() / render_scale;
    let group_id = Uuid::new_v4();

    let mut markups = Vec::with_capacity(candidates.len());
    let mut count_number = 1u32;
    for candidate in &candidates {
        let markup = candidate.to_markup(factor, group_id, count_number)?;
        if matches!(candidate.kind, CandidateKind::Count) {
            count_number += 1;
        }
        markups.push(markup);
    }

    let markup_ids = session.add_markup_batch(markups)?;
    debug!(group = %group_id, placed = markup_ids.len(), "AI batch placed");
    Ok(AiPlacement { group_id, markup_ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DecodedDocument, PageDimensions};

    fn session() -> DocumentSession {
        DocumentSession::open(
            "plan.pdf",
            DecodedDocument {
                page_count: 2,
                page_dimensions: vec![PageDimensions { width_pt: 612.0, height_pt: 792.0 }; 2],
            },
            Vec::new(),
            2.0,
        )
        .unwrap()
    }

    fn count_candidate(page: u32, x: f32, y: f32) -> CandidateMarkup {
        CandidateMarkup {
            kind: CandidateKind::Count,
            page,
            points: vec![[x, y]],
            style: None,
            source_item: Some("fixture-7".into()),
            note: Some("possible light fixture".into()),
        }
    }

    #[test]
    fn test_candidates_scale_into_native_space() {
        let mut session = session();
        // Pipeline rendered at 4 px/pt; session base scale is 2 px/pt, so
        // candidate coordinates halve on the way in.
        let placement =
            place_candidates(&mut session, vec![count_candidate(1, 100.0, 60.0)], 4.0).unwrap();

        assert_eq!(placement.markup_ids.len(), 1);
        let markup = session.store().find(1, placement.markup_ids[0]).unwrap();
        match &markup.shape {
            MarkupShape::CountMarker { position, number } => {
                assert!((position.x - 50.0).abs() < 0.001);
                assert!((position.y - 30.0).abs() < 0.001);
                assert_eq!(*number, 1);
            }
            other => panic!("unexpected shape {other:?}"),
        }
        assert!(markup.is_pending());
        let ai = markup.ai.as_ref().unwrap();
        assert_eq!(ai.group_id, Some(placement.group_id));
        assert_eq!(ai.source_item.as_deref(), Some("fixture-7"));
    }

    #[test]
    fn test_count_markers_number_sequentially() {
        let mut session = session();
        let placement = place_candidates(
            &mut session,
            vec![
                count_candidate(1, 10.0, 10.0),
                count_candidate(1, 20.0, 10.0),
                count_candidate(1, 30.0, 10.0),
            ],
            2.0,
        )
        .unwrap();

        let numbers: Vec<u32> = placement
            .markup_ids
            .iter()
            .map(|id| match &session.store().find(1, *id).unwrap().shape {
                MarkupShape::CountMarker { number, .. } => *number,
                _ => panic!("not a count marker"),
            })
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_invalid_candidate_leaves_store_untouched() {
        let mut session = session();
        let bad = CandidateMarkup {
            kind: CandidateKind::Area,
            page: 1,
            points: vec![[0.0, 0.0], [10.0, 0.0]], // area needs 3+
            style: None,
            source_item: None,
            note: None,
        };

        let result =
            place_candidates(&mut session, vec![count_candidate(1, 5.0, 5.0), bad], 2.0);
        assert!(matches!(result, Err(CoreError::Candidate(_))));
        assert_eq!(session.store().total_count(), 0);
    }

    #[test]
    fn test_candidate_page_out_of_range() {
        let mut session = session();
        let result = place_candidates(&mut session, vec![count_candidate(7, 5.0, 5.0)], 2.0);
        assert!(matches!(result, Err(CoreError::PageOutOfRange { .. })));
        assert_eq!(session.store().total_count(), 0);
    }

    #[test]
    fn test_style_hint_applies() {
        let mut session = session();
        let candidate = CandidateMarkup {
            kind: CandidateKind::Line,
            page: 1,
            points: vec![[0.0, 0.0], [50.0, 50.0]],
            style: Some(StyleHint {
                stroke_rgb: Some([0, 128, 255]),
                label: Some("supply run".into()),
            }),
            source_item: None,
            note: None,
        };

        let placement = place_candidates(&mut session, vec![candidate], 2.0).unwrap();
        let markup = session.store().find(1, placement.markup_ids[0]).unwrap();
        assert_eq!(markup.style.stroke_color, crate::markup::Color::rgb(0, 128, 255));
        assert_eq!(markup.label.as_deref(), Some("supply run"));
    }

    #[test]
    fn test_candidate_serde_format() {
        let json = r#"{
            "kind": "length",
            "page": 2,
            "points": [[0.0, 0.0], [150.0, 0.0]],
            "note": "duct run"
        }"#;
        let candidate: CandidateMarkup = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.kind, CandidateKind::Length);
        assert_eq!(candidate.page, 2);
        assert_eq!(candidate.points.len(), 2);
        assert_eq!(candidate.note.as_deref(), Some("duct run"));
    }
}
