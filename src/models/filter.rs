//! Feature classification policy.
//!
//! The pipeline only cares about three predicates; the exact tag vocabulary
//! behind them is a policy decision that lives here, away from the passes.

use crate::models::Feature;

/// Category keys that mark a point of interest.
const POI_KEYS: &[&str] = &[
    "amenity", "shop", "tourism", "leisure", "office", "historic", "craft",
];

/// A feature classified by type as a building. It may or may not carry a
/// house number.
pub fn is_building(feature: &Feature) -> bool {
    feature
        .categories
        .iter()
        .filter_map(|c| c.split_once(':'))
        .any(|(key, _)| key == "building")
}

/// A feature carrying a non-empty house number, irrespective of type.
pub fn has_house(feature: &Feature) -> bool {
    !feature.house.is_empty()
}

/// A point of interest (cafe, shop, etc.).
pub fn is_poi(feature: &Feature) -> bool {
    feature
        .categories
        .iter()
        .filter_map(|c| c.split_once(':'))
        .any(|(key, _)| POI_KEYS.contains(&key))
}
