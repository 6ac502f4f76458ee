//! Predicate search over indexed objects and their current descriptors.

use serde_json::Value;
use std::sync::Arc;

use super::LocalityIndex;
use crate::geometry::MercatorPoint;
use crate::kv::KeyValueStorage;
use crate::models::ObjectId;

/// Joins the locality index with the key-value storage: candidates come from
/// the index, the predicate runs over their current descriptors. Candidates
/// without a descriptor yet are skipped.
pub struct ObjectInfoGetter<'a> {
    index: &'a LocalityIndex,
    kv: &'a KeyValueStorage,
}

impl<'a> ObjectInfoGetter<'a> {
    pub fn new(index: &'a LocalityIndex, kv: &'a KeyValueStorage) -> Self {
        Self { index, kv }
    }

    /// First candidate at `point` whose descriptor satisfies `predicate`.
    pub fn search(
        &self,
        point: MercatorPoint,
        predicate: impl Fn(&Value) -> bool,
    ) -> Option<ObjectId> {
        self.index
            .objects_at(point)
            .into_iter()
            .find(|id| self.kv.find(*id).is_some_and(|json| predicate(&json)))
    }

    /// Descriptor of the first candidate satisfying `predicate`.
    pub fn find(
        &self,
        point: MercatorPoint,
        predicate: impl Fn(&Value) -> bool,
    ) -> Option<Arc<Value>> {
        self.search(point, predicate).and_then(|id| self.kv.find(id))
    }

    pub fn index(&self) -> &LocalityIndex {
        self.index
    }

    pub fn storage(&self) -> &KeyValueStorage {
        self.kv
    }
}
