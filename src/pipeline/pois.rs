//! Pass 4: give unaddressed POIs the address of the house they sit in.

use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::buildings::NullBuildingsInfo;
use super::note_progress;
use crate::address;
use crate::error::GeneratorError;
use crate::kv::KeyValueStorage;
use crate::locality::ObjectInfoGetter;
use crate::models::{filter, Feature};
use crate::stream;

/// Parallel scan of the (already rewritten) feature file: every POI that is
/// neither a building nor housed tries to inherit a nearby address. POIs
/// that found one are also appended to the side stream of ids to add to the
/// locality index.
pub fn add_poi_objects(
    kv: &KeyValueStorage,
    getter: &ObjectInfoGetter<'_>,
    pairing: &NullBuildingsInfo,
    features_path: &Path,
    out_poi_ids: &Path,
    verbose: bool,
    threads: usize,
) -> Result<(), GeneratorError> {
    let ids = Mutex::new(BufWriter::new(File::create(out_poi_ids)?));
    let progress = AtomicU64::new(0);

    stream::for_each_parallel(features_path, threads, |feature, _offset| {
        if !filter::is_poi(&feature) {
            return Ok(());
        }
        if filter::is_building(&feature) || filter::has_house(&feature) {
            return Ok(());
        }

        let Some(donor) = find_house_donor(&feature, getter, pairing) else {
            if verbose {
                debug!("no address donor for poi {}", feature.id);
            }
            return Ok(());
        };

        let value = address::compose_poi(&feature, &donor);
        if !kv.insert(feature.id, value)? {
            warn!("duplicate descriptor for poi {}", feature.id);
        }
        {
            let mut ids = ids.lock().expect("poi ids mutex poisoned");
            writeln!(ids, "{}", feature.id)?;
        }
        note_progress(&progress, "pois with inherited addresses added");
        Ok(())
    })?;

    ids.into_inner()
        .expect("poi ids mutex poisoned")
        .flush()?;
    Ok(())
}

/// A POI's address donor: first a covering housed object; failing that, the
/// address point paired with a covering addressless building (after pass 3
/// that point also carries the building's geometry).
fn find_house_donor(
    feature: &Feature,
    getter: &ObjectInfoGetter<'_>,
    pairing: &NullBuildingsInfo,
) -> Option<Arc<Value>> {
    if let Some(house) = getter.find(feature.key_point(), address::has_building) {
        return Some(house);
    }

    for id in getter.index().objects_at(feature.key_point()) {
        if let Some(point) = pairing.buildings_to_points.get(&id) {
            return getter.storage().find(*point);
        }
    }
    None
}
