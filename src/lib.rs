//! Cedar - the geo-objects generation core.
//!
//! A multi-pass, parallel batch pipeline that joins an extracted feature
//! stream with a regions hierarchy and produces a key-value store of
//! addressed physical objects (buildings, houses, and POIs inheriting a
//! nearby address), plus a side stream of POI ids for the locality index.

pub mod address;
pub mod error;
pub mod geometry;
pub mod kv;
pub mod locality;
pub mod models;
pub mod pipeline;
pub mod regions;
pub mod stream;

pub use error::GeneratorError;
pub use models::{Feature, GeomType, ObjectId};
pub use pipeline::{generate_geo_objects, GenerateParams};
