//! The composite diff of one store-update operation.
//!
//! The update routine owns one [`CompositeDiff`] per subject update. For each
//! property table it touches it computes a [`TableDiff`] and appends it here.
//! Once the rows are persisted the same diff is read several times: for the
//! insert-side ids, the delete-side ids, and for the audit log. Reads never
//! mutate and nothing is cached; every read is a function of the appends so
//! far.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{FlatIdList, IdExtractor};
use crate::row::Row;
use crate::table_diff::{DiffSide, TableDiff};

/// One `(table_name, diff)` entry of a composite diff.
///
/// Serializes as a two-element sequence: `["wikipage_refs", {"insert": [...], "delete": [...]}]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, TableDiff)", into = "(String, TableDiff)")]
pub struct TableRecord {
    pub table: String,
    pub diff: TableDiff,
}

impl TableRecord {
    pub fn new(table: impl Into<String>, diff: TableDiff) -> Self {
        Self {
            table: table.into(),
            diff,
        }
    }
}

impl From<(String, TableDiff)> for TableRecord {
    fn from((table, diff): (String, TableDiff)) -> Self {
        Self { table, diff }
    }
}

impl From<TableRecord> for (String, TableDiff) {
    fn from(record: TableRecord) -> Self {
        (record.table, record.diff)
    }
}

/// Ordered ledger of per-table diffs.
///
/// Record order is kept for deterministic serialization only; no read
/// depends on it for correctness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeDiff {
    records: Vec<TableRecord>,
}

impl CompositeDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from existing records (a restored snapshot, a test fixture).
    pub fn from_records(records: impl IntoIterator<Item = TableRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Add one table's diff at the end. Row shape is the producer's business;
    /// nothing is validated here.
    pub fn append(&mut self, table: impl Into<String>, diff: TableDiff) {
        self.records.push(TableRecord::new(table, diff));
    }

    pub fn push(&mut self, record: TableRecord) {
        self.records.push(record);
    }

    /// Records in append order. Borrowing, so it can be restarted any number
    /// of times.
    pub fn iter(&self) -> std::slice::Iter<'_, TableRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[TableRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TableRecord> {
        self.records
    }

    /// Number of appended records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `true` when at least one record carries a row.
    pub fn has_changes(&self) -> bool {
        self.records.iter().any(|r| !r.diff.is_empty())
    }

    /// Distinct table names, in first-appended order.
    pub fn table_names(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.records
            .iter()
            .map(|r| r.table.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// First record appended for `table`.
    pub fn get(&self, table: &str) -> Option<&TableDiff> {
        self.records
            .iter()
            .find(|r| r.table == table)
            .map(|r| &r.diff)
    }

    pub fn row_count(&self, side: Option<DiffSide>) -> usize {
        IdExtractor::new(self, side).rows().count()
    }

    /// Rows of one side (or both) across every record.
    pub fn rows(&self, side: Option<DiffSide>) -> impl Iterator<Item = &Row> + '_ {
        IdExtractor::new(self, side).rows()
    }

    /// De-duplicated entity ids referenced on `side`, or on both sides for
    /// `None`.
    pub fn ids(&self, side: Option<DiffSide>) -> FlatIdList {
        IdExtractor::new(self, side).extract()
    }

    /// Key-based form of [`CompositeDiff::ids`].
    ///
    /// `None` matches every side. A key that names no side (anything other
    /// than `insert`/`delete` or their one-letter forms) matches nothing and
    /// yields an empty list.
    pub fn flat_id_list(&self, side: Option<&str>) -> FlatIdList {
        match side {
            None => self.ids(None),
            Some(key) => match DiffSide::from_key(key) {
                Some(side) => self.ids(Some(side)),
                None => {
                    tracing::trace!(key, "no diff side matches key");
                    FlatIdList::new()
                }
            },
        }
    }

    /// The composite edit that undoes this one: every record inverted, in
    /// reverse order.
    pub fn inverted(&self) -> Self {
        Self {
            records: self
                .records
                .iter()
                .rev()
                .map(|r| TableRecord::new(r.table.clone(), r.diff.inverted()))
                .collect(),
        }
    }

    /// Same table names and, per table, the same row set on each side.
    ///
    /// Records appended for the same table more than once are merged before
    /// comparing; order within a row set and record order are ignored.
    pub fn is_equivalent_to(&self, other: &CompositeDiff) -> bool {
        let ours = self.by_table();
        let theirs = other.by_table();
        ours.len() == theirs.len()
            && ours.iter().zip(theirs.iter()).all(|((ta, da), (tb, db))| {
                ta == tb && da.is_equivalent_to(db)
            })
    }

    fn by_table(&self) -> Vec<(&str, TableDiff)> {
        let mut merged: BTreeMap<&str, TableDiff> = BTreeMap::new();
        for record in &self.records {
            let slot = merged.entry(record.table.as_str()).or_default();
            slot.insert.extend(record.diff.insert.iter().cloned());
            slot.delete.extend(record.diff.delete.iter().cloned());
        }
        merged.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a CompositeDiff {
    type Item = &'a TableRecord;
    type IntoIter = std::slice::Iter<'a, TableRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for CompositeDiff {
    type Item = TableRecord;
    type IntoIter = std::vec::IntoIter<TableRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl Extend<TableRecord> for CompositeDiff {
    fn extend<I: IntoIterator<Item = TableRecord>>(&mut self, iter: I) {
        self.records.extend(iter);
    }
}

impl FromIterator<TableRecord> for CompositeDiff {
    fn from_iter<I: IntoIterator<Item = TableRecord>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}
