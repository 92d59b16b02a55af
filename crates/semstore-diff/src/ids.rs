//! Flat id views over a [`CompositeDiff`].
//!
//! Downstream consumers (cache invalidation, dependency re-queueing, search
//! re-indexing) do not care which table a change happened in; they want the
//! set of entity ids a change touched. [`IdExtractor`] walks the diff and
//! collects every present role id into a [`FlatIdList`].

use std::collections::{BTreeSet, HashSet};

use serde::{Serialize, Serializer};

use crate::composite::CompositeDiff;
use crate::row::{EntityId, Row};
use crate::table_diff::DiffSide;

/// De-duplicated ids in first-seen order.
///
/// Only membership is meaningful: two lists compare equal when they hold the
/// same ids, whatever order they were seen in.
#[derive(Debug, Clone, Default)]
pub struct FlatIdList {
    ids: Vec<EntityId>,
    seen: HashSet<EntityId>,
}

impl FlatIdList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the id was not present yet.
    pub fn insert(&mut self, id: EntityId) -> bool {
        if self.seen.insert(id) {
            self.ids.push(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.seen.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.ids.iter().copied()
    }

    pub fn as_slice(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn into_vec(self) -> Vec<EntityId> {
        self.ids
    }

    pub fn to_set(&self) -> BTreeSet<EntityId> {
        self.ids.iter().copied().collect()
    }

    pub fn union(&self, other: &FlatIdList) -> FlatIdList {
        let mut out = self.clone();
        out.extend(other.iter());
        out
    }
}

impl PartialEq for FlatIdList {
    fn eq(&self, other: &Self) -> bool {
        self.seen == other.seen
    }
}

impl Eq for FlatIdList {}

impl Extend<EntityId> for FlatIdList {
    fn extend<I: IntoIterator<Item = EntityId>>(&mut self, iter: I) {
        for id in iter {
            self.insert(id);
        }
    }
}

impl FromIterator<EntityId> for FlatIdList {
    fn from_iter<I: IntoIterator<Item = EntityId>>(iter: I) -> Self {
        let mut out = FlatIdList::new();
        out.extend(iter);
        out
    }
}

impl IntoIterator for FlatIdList {
    type Item = EntityId;
    type IntoIter = std::vec::IntoIter<EntityId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl Serialize for FlatIdList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ids.serialize(serializer)
    }
}

/// A read-only walk over the rows of a composite diff, restricted to one side
/// or covering both.
#[derive(Debug, Clone, Copy)]
pub struct IdExtractor<'a> {
    diff: &'a CompositeDiff,
    side: Option<DiffSide>,
}

impl<'a> IdExtractor<'a> {
    pub fn new(diff: &'a CompositeDiff, side: Option<DiffSide>) -> Self {
        Self { diff, side }
    }

    /// Every row on a matching side, record by record, insert rows before
    /// delete rows within a record.
    pub fn rows(&self) -> impl Iterator<Item = &'a Row> + 'a {
        let wanted = self.side;
        let diff = self.diff;
        diff.iter().flat_map(move |record| {
            DiffSide::ALL
                .into_iter()
                .filter(move |side| wanted.map_or(true, |w| w == *side))
                .flat_map(move |side| record.diff.side(side).iter())
        })
    }

    pub fn extract(&self) -> FlatIdList {
        let mut list = FlatIdList::new();
        for row in self.rows() {
            list.extend(row.entity_ids());
        }
        list
    }
}
