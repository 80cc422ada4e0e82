//! Linear undo/redo history for markup mutations.
//!
//! Entries are full before/after snapshots of one page's markup collection,
//! not patches. Differences are computed by identity at undo/redo time, so
//! replay can restore cross-entity measurement links symmetrically with
//! shape data.

use crate::links::LinkedMeasurement;
use crate::markup::Markup;
use std::collections::VecDeque;
use tracing::debug;

/// Default bound on the undo stack.
pub const DEFAULT_HISTORY_DEPTH: usize = 50;

/// A measurement link captured at the moment its markup was deleted,
/// replayed when the deletion is undone.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDelta {
    pub product_id: crate::links::ProductId,
    pub record: LinkedMeasurement,
}

/// One undoable unit: the complete markup collection of a page before and
/// after a mutation, plus any link deltas the mutation captured.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Page number, 1-indexed.
    pub page: u32,
    pub before: Vec<Markup>,
    pub after: Vec<Markup>,
    pub description: String,
    pub link_deltas: Vec<LinkDelta>,
}

impl HistoryEntry {
    pub fn new(
        page: u32,
        before: Vec<Markup>,
        after: Vec<Markup>,
        description: impl Into<String>,
    ) -> Self {
        Self { page, before, after, description: description.into(), link_deltas: Vec::new() }
    }
}

/// Bounded linear history: an append-only past stack and a future stack.
///
/// Branching is not supported; pushing a new entry clears the future. Once
/// the depth bound is exceeded the oldest past entries are evicted silently
/// (FIFO), so the most recent `max_depth` operations always stay undoable.
#[derive(Debug)]
pub struct HistoryEngine {
    past: VecDeque<HistoryEntry>,
    future: Vec<HistoryEntry>,
    max_depth: usize,
}

impl HistoryEngine {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_depth(max_depth: usize) -> Self {
        Self { past: VecDeque::new(), future: Vec::new(), max_depth: max_depth.max(1) }
    }

    /// Record a new entry, evicting the oldest if the bound is exceeded.
    pub fn push(&mut self, entry: HistoryEntry) {
        debug!(page = entry.page, description = %entry.description, "history push");
        if self.past.len() == self.max_depth {
            self.past.pop_front();
        }
        self.past.push_back(entry);
        self.future.clear();
    }

    /// Move the most recent entry onto the future stack and hand it to the
    /// caller for application. `None` means there is nothing to undo.
    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        let entry = self.past.pop_back()?;
        self.future.push(entry);
        self.future.last()
    }

    /// Mirror of [`undo`](Self::undo). `None` means nothing to redo.
    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        let entry = self.future.pop()?;
        self.past.push_back(entry);
        self.past.back()
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Description of the entry the next undo would apply.
    pub fn peek_undo(&self) -> Option<&str> {
        self.past.back().map(|e| e.description.as_str())
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

impl Default for HistoryEngine {
    fn default() -> Self {
        Self::new()
    }
}
