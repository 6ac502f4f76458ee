//! JSON descriptor composition.
//!
//! Descriptors start as a deep copy of the containing region's descriptor,
//! then get the feature's coordinates, address attributes, localized names,
//! rank, and parent back-reference grafted in. A `null` `building` field is
//! a sentinel meaning "addressless house"; a missing field means the house
//! number was never specified, and the two must stay distinguishable.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::error::GeneratorError;
use crate::geometry::MercatorPoint;
use crate::models::{Feature, ObjectId};

/// Canonical rank of a house or POI descriptor.
pub const HOUSE_OR_POI_RANK: u64 = 30;

/// Overwrite `geometry.coordinates` with the reprojected point. The region
/// descriptor already carries a `[lon, lat]` pair; anything else is left
/// untouched.
fn update_coordinates(point: MercatorPoint, json: &mut Value) {
    let coordinates = json
        .get_mut("geometry")
        .and_then(|geometry| geometry.get_mut("coordinates"))
        .and_then(Value::as_array_mut);
    if let Some(coordinates) = coordinates {
        if coordinates.len() == 2 {
            let ll = point.to_lat_lon();
            coordinates[0] = json!(ll.lon);
            coordinates[1] = json!(ll.lat);
        }
    }
}

/// Set `locales.<locale>.name` for every locale the feature names.
fn set_localized_names(properties: &mut Map<String, Value>, names: &HashMap<String, String>) {
    let locales = properties
        .entry("locales")
        .or_insert_with(|| json!({}));
    let Some(locales) = locales.as_object_mut() else {
        return;
    };
    for (locale, name) in names {
        let slot = locales.entry(locale.clone()).or_insert_with(|| json!({}));
        if let Some(slot) = slot.as_object_mut() {
            slot.insert("name".to_string(), json!(name));
        }
    }
}

fn obligatory_object_mut<'a>(
    value: &'a mut Value,
    path: &[&str],
) -> Result<&'a mut Map<String, Value>, GeneratorError> {
    let mut at = value;
    for key in path {
        at = at.get_mut(*key).ok_or_else(|| {
            GeneratorError::Schema(format!("missing obligatory field \"{}\"", key))
        })?;
    }
    at.as_object_mut()
        .ok_or_else(|| GeneratorError::Schema(format!("\"{}\" is not an object", path.join("."))))
}

/// Compose the descriptor of an addressed feature from its region.
pub fn compose_address(
    feature: &Feature,
    region_id: ObjectId,
    region_json: &Value,
) -> Result<Value, GeneratorError> {
    let mut result = region_json.clone();
    update_coordinates(feature.key_point(), &mut result);

    {
        let address = obligatory_object_mut(
            &mut result,
            &["properties", "locales", "default", "address"],
        )?;
        if !feature.street.is_empty() {
            address.insert("street".to_string(), json!(feature.street));
        }
        if !feature.house.is_empty() {
            address.insert("building".to_string(), json!(feature.house));
        } else {
            // The null sentinel marks a house with no number.
            address.insert("building".to_string(), Value::Null);
        }
    }

    let properties = obligatory_object_mut(&mut result, &["properties"])?;
    set_localized_names(properties, &feature.names);
    properties.insert("rank".to_string(), json!(HOUSE_OR_POI_RANK));
    properties.insert("dref".to_string(), json!(region_id.dref()));
    Ok(result)
}

/// Compose a POI descriptor from an address donor: the address is inherited
/// verbatim, only the names and coordinates are the POI's own.
pub fn compose_poi(feature: &Feature, donor: &Value) -> Value {
    let mut result = donor.clone();
    if let Some(properties) = result.get_mut("properties").and_then(Value::as_object_mut) {
        set_localized_names(properties, &feature.names);
    }
    update_coordinates(feature.key_point(), &mut result);
    result
}

/// Whether the descriptor's default address has a real `building` value:
/// the field is present and is not the null sentinel.
pub fn has_building(json: &Value) -> bool {
    json.get("properties")
        .and_then(|p| p.get("locales"))
        .and_then(|l| l.get("default"))
        .and_then(|d| d.get("address"))
        .and_then(|a| a.get("building"))
        .is_some_and(|building| !building.is_null())
}
