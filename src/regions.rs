//! Deepest-region lookup against the externally generated regions data.
//!
//! The regions collaborator emits two files: a locality index over region
//! geometries (the same format this crate builds for geo objects) and a
//! key-value file of region descriptors. Both are loaded once and never
//! mutated, so the handle is shareable across workers without locks.

use hashbrown::HashMap;
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::GeneratorError;
use crate::geometry::MercatorPoint;
use crate::kv::KeyValueStorage;
use crate::locality::LocalityIndex;
use crate::models::ObjectId;

/// Read-only handle over the regions hierarchy.
pub struct RegionsLookup {
    index: LocalityIndex,
    regions: HashMap<ObjectId, Arc<Value>>,
}

impl RegionsLookup {
    pub fn open(index_path: &Path, kv_path: &Path) -> Result<Self, GeneratorError> {
        let index = LocalityIndex::open(index_path)?;
        let entries = KeyValueStorage::read_lines(BufReader::new(File::open(kv_path)?))?;
        let regions: HashMap<ObjectId, Arc<Value>> = entries
            .into_iter()
            .map(|(id, value)| (id, Arc::new(value)))
            .collect();
        info!("regions lookup ready with {} regions", regions.len());
        Ok(Self { index, regions })
    }

    /// The deepest (most specific) region containing `point`: maximal
    /// administrative rank from the region descriptor, ties resolved to the
    /// first candidate in id order.
    pub fn find_deepest(&self, point: MercatorPoint) -> Option<(ObjectId, Arc<Value>)> {
        let mut deepest: Option<(u64, ObjectId, &Arc<Value>)> = None;
        for id in self.index.objects_at(point) {
            let Some(json) = self.regions.get(&id) else {
                continue;
            };
            let rank = region_rank(json).unwrap_or(0);
            if deepest.as_ref().is_none_or(|(best, _, _)| rank > *best) {
                deepest = Some((rank, id, json));
            }
        }
        deepest.map(|(_, id, json)| (id, Arc::clone(json)))
    }
}

fn region_rank(json: &Value) -> Option<u64> {
    json.get("properties")?.get("rank")?.as_u64()
}
