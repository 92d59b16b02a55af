//! Insert/delete row sets for one property table.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DiffError;
use crate::row::Row;

/// Which half of a table diff a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSide {
    Insert,
    Delete,
}

impl DiffSide {
    pub const ALL: [DiffSide; 2] = [DiffSide::Insert, DiffSide::Delete];

    /// Representation key of this side.
    pub fn key(self) -> &'static str {
        match self {
            DiffSide::Insert => "insert",
            DiffSide::Delete => "delete",
        }
    }

    /// Resolve a side key. The one-letter keys of the legacy layout are
    /// accepted; any other key names no side.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "insert" | "i" => Some(DiffSide::Insert),
            "delete" | "d" => Some(DiffSide::Delete),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            DiffSide::Insert => DiffSide::Delete,
            DiffSide::Delete => DiffSide::Insert,
        }
    }
}

impl fmt::Display for DiffSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DiffSide {
    type Err = DiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        DiffSide::from_key(&norm).ok_or_else(|| DiffError::UnknownSide(s.to_string()))
    }
}

/// The minimal edit that takes one table from its stored rows to the rows a
/// subject should have after re-annotation.
///
/// Invariant (upheld by [`TableDiff::compute`], checked by
/// [`TableDiff::is_minimal`]): no row appears identically on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDiff {
    #[serde(default)]
    pub insert: Vec<Row>,
    #[serde(default)]
    pub delete: Vec<Row>,
}

impl TableDiff {
    pub fn new(insert: Vec<Row>, delete: Vec<Row>) -> Self {
        Self { insert, delete }
    }

    /// `insert = desired \ current`, `delete = current \ desired`.
    ///
    /// Rows compare field-wise over every column, payload included, so a row
    /// whose payload changed shows up once on each side. Duplicates within an
    /// input collapse; first-appearance order is kept.
    pub fn compute(desired: &[Row], current: &[Row]) -> Self {
        let desired_set: BTreeSet<&Row> = desired.iter().collect();
        let current_set: BTreeSet<&Row> = current.iter().collect();

        Self {
            insert: ordered_difference(desired, &current_set),
            delete: ordered_difference(current, &desired_set),
        }
    }

    pub fn side(&self, side: DiffSide) -> &[Row] {
        match side {
            DiffSide::Insert => &self.insert,
            DiffSide::Delete => &self.delete,
        }
    }

    pub fn side_mut(&mut self, side: DiffSide) -> &mut Vec<Row> {
        match side {
            DiffSide::Insert => &mut self.insert,
            DiffSide::Delete => &mut self.delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.delete.is_empty()
    }

    /// Total rows across both sides.
    pub fn len(&self) -> usize {
        self.insert.len() + self.delete.len()
    }

    pub fn is_minimal(&self) -> bool {
        let inserted: BTreeSet<&Row> = self.insert.iter().collect();
        !self.delete.iter().any(|row| inserted.contains(row))
    }

    /// The edit that undoes this one.
    pub fn inverted(&self) -> Self {
        Self {
            insert: self.delete.clone(),
            delete: self.insert.clone(),
        }
    }

    /// Row-set equality per side, ignoring order within a side.
    pub fn is_equivalent_to(&self, other: &TableDiff) -> bool {
        DiffSide::ALL.into_iter().all(|side| {
            let ours: BTreeSet<&Row> = self.side(side).iter().collect();
            let theirs: BTreeSet<&Row> = other.side(side).iter().collect();
            ours == theirs
        })
    }
}

fn ordered_difference(rows: &[Row], exclude: &BTreeSet<&Row>) -> Vec<Row> {
    let mut seen: BTreeSet<&Row> = BTreeSet::new();
    rows.iter()
        .filter(|row| !exclude.contains(*row) && seen.insert(*row))
        .cloned()
        .collect()
}
