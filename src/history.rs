//! Reverse-chronological table of analysis records as a viewer displays it.

use std::collections::{HashSet, VecDeque};

use crate::protocol::AnalysisRecord;

/// Records in display order, top row first.
///
/// Ids are tracked so a record delivered twice is shown once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryTable {
    rows: VecDeque<AnalysisRecord>,
    ids: HashSet<u64>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `record` above every existing row.
    ///
    /// Returns `false` and leaves the table untouched if a row with the same
    /// id is already present.
    pub fn insert_at_top(&mut self, record: AnalysisRecord) -> bool {
        if !self.ids.insert(record.id) {
            return false;
        }
        self.rows.push_front(record);
        true
    }

    /// Replace the table with a connect-time snapshot.
    ///
    /// The snapshot is already newest first, so each record goes to the
    /// bottom of the view and the given order is kept as-is.
    pub fn bulk_load(&mut self, records: impl IntoIterator<Item = AnalysisRecord>) {
        self.clear();
        for record in records {
            if self.ids.insert(record.id) {
                self.rows.push_back(record);
            }
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows from top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = &AnalysisRecord> {
        self.rows.iter()
    }

    /// Row ids from top to bottom.
    pub fn ids(&self) -> Vec<u64> {
        self.rows.iter().map(|r| r.id).collect()
    }

    pub fn top(&self) -> Option<&AnalysisRecord> {
        self.rows.front()
    }
}
