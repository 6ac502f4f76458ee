//! Stable object identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// A 64-bit object id, unique within a generation run.
///
/// The textual encoding ("dref") is the decimal form. It is used as the
/// key-value storage key, as the `properties.dref` back-reference in
/// descriptors, and as the line format of the POI id side stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The textual back-reference encoding.
    pub fn dref(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(ObjectId)
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        ObjectId(raw)
    }
}
