//! Passes 2, 3, and 5: pair address points with addressless buildings,
//! graft the building geometry onto the points, and finally drop the
//! consumed buildings from the feature file.

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;
use tracing::{info, warn};

use super::note_progress;
use crate::address;
use crate::error::GeneratorError;
use crate::geometry::{rings_bbox, MercatorPoint};
use crate::locality::ObjectInfoGetter;
use crate::models::{filter, Feature, GeomType, ObjectId};
use crate::stream::{self, FeatureWriter};

/// The 1-to-1 pairing between address points and the addressless buildings
/// they sit inside.
///
/// Several address points may select the same building; the pairing keeps a
/// single point per building (last writer wins) and stays inverse-consistent.
#[derive(Debug, Default)]
pub struct NullBuildingsInfo {
    pub points_to_buildings: HashMap<ObjectId, ObjectId>,
    pub buildings_to_points: HashMap<ObjectId, ObjectId>,
}

type BuildingsGeometries = HashMap<ObjectId, Vec<Vec<MercatorPoint>>>;

/// Run passes 2 and 3: discover the pairing, collect building geometries,
/// rewrite the feature file with the geometry grafted onto the points.
pub fn enrich_points_with_building_geometry(
    getter: &ObjectInfoGetter<'_>,
    features_path: &Path,
    threads: usize,
) -> Result<NullBuildingsInfo, GeneratorError> {
    let pairing = find_null_buildings(getter, features_path, threads)?;
    info!(
        "found {} address points with outer building geometry",
        pairing.points_to_buildings.len()
    );
    info!(
        "found {} helpful addressless buildings",
        pairing.buildings_to_points.len()
    );

    let geometries = collect_building_geometries(features_path, &pairing, threads)?;
    info!("saved {} building geometries", geometries.len());

    let enriched = graft_building_geometries(features_path, &pairing, &geometries, threads)?;
    info!(
        "{} address points were enriched with outer building geometry",
        enriched
    );
    Ok(pairing)
}

/// Pass 2, first scan: for every housed point, find a covering object whose
/// descriptor carries the addressless-building sentinel and pair them.
fn find_null_buildings(
    getter: &ObjectInfoGetter<'_>,
    features_path: &Path,
    threads: usize,
) -> Result<NullBuildingsInfo, GeneratorError> {
    let pairing = Mutex::new(NullBuildingsInfo::default());
    let progress = AtomicU64::new(0);

    stream::for_each_parallel(features_path, threads, |feature, _offset| {
        if !filter::has_house(&feature) || feature.geom_type != GeomType::Point {
            return Ok(());
        }

        let Some(building) = getter.search(feature.key_point(), |json| !address::has_building(json))
        else {
            return Ok(());
        };

        let mut pairing = pairing.lock().expect("pairing mutex poisoned");
        if let Some(previous) = pairing.buildings_to_points.insert(building, feature.id) {
            // Another point already claimed this building; the pairing
            // stays 1-to-1, the newcomer wins.
            pairing.points_to_buildings.remove(&previous);
        }
        pairing.points_to_buildings.insert(feature.id, building);
        note_progress(&progress, "helpful buildings paired");
        Ok(())
    })?;

    Ok(pairing.into_inner().expect("pairing mutex poisoned"))
}

/// Pass 2, second scan: remember the polygon of every paired building.
fn collect_building_geometries(
    features_path: &Path,
    pairing: &NullBuildingsInfo,
    threads: usize,
) -> Result<BuildingsGeometries, GeneratorError> {
    let geometries = Mutex::new(BuildingsGeometries::new());
    let progress = AtomicU64::new(0);

    stream::for_each_parallel(features_path, threads, |feature, _offset| {
        if !pairing.buildings_to_points.contains_key(&feature.id)
            || feature.geom_type != GeomType::Area
        {
            return Ok(());
        }

        let mut geometries = geometries.lock().expect("geometries mutex poisoned");
        match geometries.entry(feature.id) {
            Entry::Occupied(_) => warn!("more than one geometry for {}", feature.id),
            Entry::Vacant(slot) => {
                slot.insert(feature.polygons);
                note_progress(&progress, "building geometries added");
            }
        }
        Ok(())
    })?;

    Ok(geometries.into_inner().expect("geometries mutex poisoned"))
}

/// Pass 3: rewrite the feature file, replacing each paired point's geometry
/// with its building's polygon. Returns the number of points enriched.
fn graft_building_geometries(
    features_path: &Path,
    pairing: &NullBuildingsInfo,
    geometries: &BuildingsGeometries,
    threads: usize,
) -> Result<usize, GeneratorError> {
    let enriched = AtomicU64::new(0);
    rewrite_features(features_path, threads, |feature| {
        let Some(building) = pairing.points_to_buildings.get(&feature.id) else {
            return true;
        };
        let Some(rings) = geometries.get(building) else {
            warn!("{} is a paired building with no saved geometry", building);
            return true;
        };

        feature.polygons = rings.clone();
        feature.geom_type = GeomType::Area;
        // The key point stays authoritative: recenter on the grafted rings.
        if let Some([min_x, min_y, max_x, max_y]) = rings_bbox(&feature.polygons) {
            feature.center = MercatorPoint::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);
        }
        note_progress(&enriched, "points enriched with geometry");
        true
    })?;
    Ok(enriched.into_inner() as usize)
}

/// Pass 5: drop every building that gave its geometry to a paired point;
/// keeping them would double-count the object.
pub fn filter_consumed_buildings(
    features_path: &Path,
    pairing: &NullBuildingsInfo,
    threads: usize,
) -> Result<(), GeneratorError> {
    rewrite_features(features_path, threads, |feature| {
        !pairing.buildings_to_points.contains_key(&feature.id)
    })
}

/// Rewrite the feature file in place via temp-and-rename. The editor mutates
/// each record and returns whether to keep it; record order in the rewritten
/// file is unspecified.
fn rewrite_features(
    features_path: &Path,
    threads: usize,
    edit: impl Fn(&mut Feature) -> bool + Sync,
) -> Result<(), GeneratorError> {
    let dir = features_path.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    let collector = Mutex::new(FeatureWriter::new(temp.reopen()?));

    stream::for_each_parallel(features_path, threads, |mut feature, _offset| {
        if !edit(&mut feature) {
            return Ok(());
        }
        let mut collector = collector.lock().expect("collector mutex poisoned");
        collector.write(&feature)
    })?;

    collector
        .into_inner()
        .expect("collector mutex poisoned")
        .finish()?;
    temp.persist(features_path)
        .map_err(|e| GeneratorError::Io(e.error))?;
    Ok(())
}
