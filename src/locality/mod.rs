//! Geo-objects locality index.
//!
//! Built once from the intermediate feature file and reused across passes:
//! for a point, return the ids of objects whose geometry covers it
//! (point-in-polygon for areas, small-radius proximity for points). The
//! index file is memory-mapped on open and bulk-loaded into an R-tree;
//! object ids stay valid even after the feature file is rewritten.

mod build;
mod info;

pub use build::{build_locality_index, build_temp_index, write_index_data};
pub use info::ObjectInfoGetter;

use geo::Contains;
use geo_types::{LineString, MultiPolygon, Point, Polygon};
use memmap2::Mmap;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::error::GeneratorError;
use crate::geometry::MercatorPoint;
use crate::models::ObjectId;

pub(crate) const INDEX_MAGIC: &[u8; 8] = b"CDRLOCIX";
pub(crate) const INDEX_VERSION: u32 = 1;

/// Match radius for point-shaped entries, in mercator degrees (about one
/// meter near the equator).
const POINT_PROXIMITY_EPS: f64 = 1e-5;

/// One serialized index entry: an object id and its indexed shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub shape: EntryShape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryShape {
    Point { point: MercatorPoint },
    Area { bbox: [f64; 4], rings: Vec<Vec<MercatorPoint>> },
}

/// In-memory indexed object with a precomputed envelope.
struct IndexedObject {
    id: ObjectId,
    envelope: AABB<[f64; 2]>,
    shape: ObjectShape,
}

enum ObjectShape {
    Point(Point<f64>),
    Area(MultiPolygon<f64>),
}

impl RTreeObject for IndexedObject {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedObject {
    fn from_entry(entry: IndexEntry) -> Self {
        match entry.shape {
            EntryShape::Point { point } => Self {
                id: entry.id,
                envelope: AABB::from_corners(
                    [point.x - POINT_PROXIMITY_EPS, point.y - POINT_PROXIMITY_EPS],
                    [point.x + POINT_PROXIMITY_EPS, point.y + POINT_PROXIMITY_EPS],
                ),
                shape: ObjectShape::Point(point.into()),
            },
            EntryShape::Area { bbox, rings } => {
                let polygons = rings
                    .into_iter()
                    .map(|ring| {
                        let coords: Vec<geo_types::Coord<f64>> =
                            ring.into_iter().map(Into::into).collect();
                        Polygon::new(LineString::new(coords), vec![])
                    })
                    .collect();
                Self {
                    id: entry.id,
                    envelope: AABB::from_corners([bbox[0], bbox[1]], [bbox[2], bbox[3]]),
                    shape: ObjectShape::Area(MultiPolygon(polygons)),
                }
            }
        }
    }

    fn covers(&self, query: &Point<f64>) -> bool {
        match &self.shape {
            ObjectShape::Point(p) => {
                let dx = p.x() - query.x();
                let dy = p.y() - query.y();
                dx * dx + dy * dy <= POINT_PROXIMITY_EPS * POINT_PROXIMITY_EPS
            }
            ObjectShape::Area(multi) => multi.contains(query),
        }
    }
}

/// Read-only spatial index over geo objects.
pub struct LocalityIndex {
    tree: RTree<IndexedObject>,
}

impl LocalityIndex {
    /// Memory-map a built index file and load it.
    pub fn open(path: &Path) -> Result<Self, GeneratorError> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        let index = Self::parse(&map)?;
        info!("locality index loaded with {} entries", index.len());
        Ok(index)
    }

    fn parse(bytes: &[u8]) -> Result<Self, GeneratorError> {
        let header_len = INDEX_MAGIC.len() + 4 + 8;
        if bytes.len() < header_len || bytes[..INDEX_MAGIC.len()] != INDEX_MAGIC[..] {
            return Err(GeneratorError::IndexBuild(
                "not a locality index file".to_string(),
            ));
        }
        let mut at = INDEX_MAGIC.len();
        let version = u32::from_le_bytes(bytes[at..at + 4].try_into().expect("sized slice"));
        if version != INDEX_VERSION {
            return Err(GeneratorError::IndexBuild(format!(
                "unsupported locality index version {}",
                version
            )));
        }
        at += 4;
        let count = u64::from_le_bytes(bytes[at..at + 8].try_into().expect("sized slice"));
        at += 8;

        let mut objects = Vec::with_capacity(count as usize);
        while at < bytes.len() {
            if at + 4 > bytes.len() {
                return Err(GeneratorError::IndexBuild(
                    "truncated locality index entry".to_string(),
                ));
            }
            let len =
                u32::from_le_bytes(bytes[at..at + 4].try_into().expect("sized slice")) as usize;
            at += 4;
            if at + len > bytes.len() {
                return Err(GeneratorError::IndexBuild(
                    "truncated locality index entry".to_string(),
                ));
            }
            let entry: IndexEntry = serde_json::from_slice(&bytes[at..at + len])
                .map_err(|e| GeneratorError::IndexBuild(e.to_string()))?;
            objects.push(IndexedObject::from_entry(entry));
            at += len;
        }
        if objects.len() as u64 != count {
            return Err(GeneratorError::IndexBuild(format!(
                "entry count mismatch: header says {}, file has {}",
                count,
                objects.len()
            )));
        }

        Ok(Self {
            tree: RTree::bulk_load(objects),
        })
    }

    /// Ids of all objects whose geometry covers `point`, ascending.
    ///
    /// Sorting keeps "first match" searches deterministic per run regardless
    /// of tree iteration order.
    pub fn objects_at(&self, point: MercatorPoint) -> Vec<ObjectId> {
        let query: Point<f64> = point.into();
        let envelope = AABB::from_point([point.x, point.y]);
        let mut ids: Vec<ObjectId> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|object| object.covers(&query))
            .map(|object| object.id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
