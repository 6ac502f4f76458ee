//! Core data model: object ids, feature records, classification.

mod feature;
pub mod filter;
mod object_id;

pub use feature::{Feature, GeomType};
pub use object_id::ObjectId;
