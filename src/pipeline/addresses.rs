//! Pass 1: write a descriptor for every building and housed feature.

use std::path::Path;
use std::sync::atomic::AtomicU64;
use tracing::{debug, warn};

use super::note_progress;
use crate::address;
use crate::error::GeneratorError;
use crate::kv::KeyValueStorage;
use crate::models::filter;
use crate::regions::RegionsLookup;
use crate::stream;

/// Parallel scan of the feature file: every building or housed feature that
/// falls inside a region gets a composed descriptor. Features outside every
/// region are silently skipped.
pub fn add_addressed_objects(
    kv: &KeyValueStorage,
    regions: &RegionsLookup,
    features_path: &Path,
    verbose: bool,
    threads: usize,
) -> Result<(), GeneratorError> {
    let progress = AtomicU64::new(0);
    stream::for_each_parallel(features_path, threads, |feature, _offset| {
        if !filter::is_building(&feature) && !filter::has_house(&feature) {
            return Ok(());
        }

        let Some((region_id, region_json)) = regions.find_deepest(feature.key_point()) else {
            if verbose {
                debug!("no containing region for {}", feature.id);
            }
            return Ok(());
        };

        let value = address::compose_address(&feature, region_id, &region_json)?;
        if !kv.insert(feature.id, value)? {
            warn!("duplicate descriptor for {}", feature.id);
        }
        note_progress(&progress, "addressed geo objects added");
        Ok(())
    })
}
