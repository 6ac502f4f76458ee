//! The intermediate feature record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::geometry::MercatorPoint;
use crate::models::ObjectId;

/// Geometry classification of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeomType {
    Point,
    Line,
    Area,
}

/// One extracted physical object: geometry, names, and optional address
/// attributes. This is the record the extractor writes into the intermediate
/// stream and every pass of the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Stable object id, unique within a generation run.
    pub id: ObjectId,

    /// Geometry classification.
    pub geom_type: GeomType,

    /// Key point in spherical-mercator degrees. Authoritative for points;
    /// a representative interior point for areas.
    pub center: MercatorPoint,

    /// Polygon rings (outer rings, no holes). Present only for `Area`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub polygons: Vec<Vec<MercatorPoint>>,

    /// Street name, empty when absent.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub street: String,

    /// House number, empty when absent.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub house: String,

    /// Multilingual names: `{"default": "...", "de": "...", ...}`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub names: HashMap<String, String>,

    /// Categories from source tags, encoded as `"key:value"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl Feature {
    /// Create a feature with the minimal required fields.
    pub fn new(id: ObjectId, geom_type: GeomType, center: MercatorPoint) -> Self {
        Self {
            id,
            geom_type,
            center,
            polygons: Vec::new(),
            street: String::new(),
            house: String::new(),
            names: HashMap::new(),
            categories: Vec::new(),
        }
    }

    /// The point the pipeline keys region and index lookups on.
    pub fn key_point(&self) -> MercatorPoint {
        self.center
    }

    /// Add a name in a specific locale.
    pub fn add_name(&mut self, locale: &str, name: impl Into<String>) {
        self.names.insert(locale.to_string(), name.into());
    }

    /// Add a category from a source tag.
    pub fn add_category(&mut self, key: &str, value: &str) {
        self.categories.push(format!("{}:{}", key, value));
    }
}
