//! The five-pass generation pipeline.
//!
//! Every pass is a fork-join scan of the intermediate feature file; the
//! passes are separated by barriers and share state only through the
//! key-value storage, the pairing maps, and the rewritten file itself. The
//! geo-objects locality index is built on a background thread concurrently
//! with pass 1 and joined before pass 2.

mod addresses;
mod buildings;
mod pois;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{error, info};

use crate::error::GeneratorError;
use crate::kv::KeyValueStorage;
use crate::locality::{self, ObjectInfoGetter};
use crate::regions::RegionsLookup;

const PROGRESS_STEP: u64 = 100_000;

/// Best-effort progress logging: every 100,000th item. Races between
/// workers only skew the reported count, never the data.
fn note_progress(counter: &AtomicU64, what: &str) {
    let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
    if count % PROGRESS_STEP == 0 {
        info!("{} {}", count, what);
    }
}

/// Inputs and outputs of one generation run.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    /// Locality index over region geometries, from the regions generator.
    pub regions_index: PathBuf,
    /// Region descriptors in the key-value line format.
    pub regions_kv: PathBuf,
    /// The intermediate feature file; rewritten in place by passes 3 and 5.
    pub features: PathBuf,
    /// Side stream of POI ids to add to the locality index, one per line.
    pub out_poi_ids: PathBuf,
    /// The output key-value storage.
    pub out_kv: PathBuf,
    /// Surface per-skip diagnostics.
    pub verbose: bool,
    /// Worker count for the parallel scans; 0 behaves as 1.
    pub threads: usize,
}

/// Run the whole pipeline. Returns `true` iff every pass completed; a fatal
/// condition is logged and leaves the output files in an unspecified
/// partial state.
pub fn generate_geo_objects(params: GenerateParams) -> bool {
    match run(&params) {
        Ok(()) => true,
        Err(e) => {
            error!("geo objects generation failed: {}", e);
            false
        }
    }
}

fn run(params: &GenerateParams) -> Result<(), GeneratorError> {
    let threads = params.threads.max(1);
    measure("generating geo objects", || {
        let kv = KeyValueStorage::create(&params.out_kv)?;
        let regions = RegionsLookup::open(&params.regions_index, &params.regions_kv)?;

        // The index is built from the original feature file while pass 1
        // runs; index construction reads only the file, pass 1 writes only
        // the storage, so the join is the only synchronization needed.
        let features = params.features.clone();
        let index_build = thread::spawn(move || locality::build_temp_index(&features));

        measure("adding addressed objects", || {
            addresses::add_addressed_objects(
                &kv,
                &regions,
                &params.features,
                params.verbose,
                threads,
            )
        })?;
        info!("added {} geo objects with addresses", kv.size());

        let index = index_build.join().expect("index build thread panicked")?;
        let getter = ObjectInfoGetter::new(&index, &kv);

        let pairing = measure("enriching address points with building geometry", || {
            buildings::enrich_points_with_building_geometry(&getter, &params.features, threads)
        })?;

        let addressed = kv.size();
        measure("adding pois with inherited addresses", || {
            pois::add_poi_objects(
                &kv,
                &getter,
                &pairing,
                &params.features,
                &params.out_poi_ids,
                params.verbose,
                threads,
            )
        })?;
        info!(
            "added {} geo objects without own addresses",
            kv.size() - addressed
        );

        measure("filtering consumed buildings", || {
            buildings::filter_consumed_buildings(&params.features, &pairing, threads)
        })?;

        kv.flush()?;
        info!(
            "geo objects key-value storage saved to {}",
            params.out_kv.display()
        );
        info!(
            "poi ids for the locality index saved to {}",
            params.out_poi_ids.display()
        );
        Ok(())
    })
}

fn measure<T>(
    activity: &str,
    run: impl FnOnce() -> Result<T, GeneratorError>,
) -> Result<T, GeneratorError> {
    info!("start {}", activity);
    let started = Instant::now();
    let result = run();
    info!(
        "finish {} in {:.1} seconds",
        activity,
        started.elapsed().as_secs_f64()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MercatorPoint;
    use crate::models::{Feature, GeomType, ObjectId};
    use crate::stream::{FeatureReader, FeatureWriter};
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::fs::File;
    use std::io::{BufReader, Write};

    fn square_ring(min: f64, max: f64) -> Vec<MercatorPoint> {
        vec![
            MercatorPoint::new(min, min),
            MercatorPoint::new(max, min),
            MercatorPoint::new(max, max),
            MercatorPoint::new(min, max),
        ]
    }

    fn building(id: u64, min: f64, max: f64, house: &str, street: &str) -> Feature {
        let mid = (min + max) / 2.0;
        let mut f = Feature::new(ObjectId(id), GeomType::Area, MercatorPoint::new(mid, mid));
        f.polygons = vec![square_ring(min, max)];
        f.add_category("building", "yes");
        f.house = house.to_string();
        f.street = street.to_string();
        f
    }

    fn address_point(id: u64, x: f64, y: f64, house: &str) -> Feature {
        let mut f = Feature::new(ObjectId(id), GeomType::Point, MercatorPoint::new(x, y));
        f.house = house.to_string();
        f
    }

    fn poi(id: u64, x: f64, y: f64, name: &str) -> Feature {
        let mut f = Feature::new(ObjectId(id), GeomType::Point, MercatorPoint::new(x, y));
        f.add_category("amenity", "cafe");
        f.add_name("default", name);
        f
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        params: GenerateParams,
    }

    /// Regions are `(id, min, max, rank)` squares, staged through the same
    /// locality builder the regions generator uses.
    fn fixture(features: &[Feature], regions: &[(u64, f64, f64, u64)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let features_path = dir.path().join("geo-objects.dat");
        let mut writer = FeatureWriter::create(&features_path).unwrap();
        for f in features {
            writer.write(f).unwrap();
        }
        writer.finish().unwrap();

        let shapes_path = dir.path().join("region-shapes.dat");
        let mut shapes = FeatureWriter::create(&shapes_path).unwrap();
        for (id, min, max, _) in regions {
            let mid = (min + max) / 2.0;
            let mut r = Feature::new(
                ObjectId(*id),
                GeomType::Area,
                MercatorPoint::new(mid, mid),
            );
            r.polygons = vec![square_ring(*min, *max)];
            shapes.write(&r).unwrap();
        }
        shapes.finish().unwrap();

        let data_path = dir.path().join("regions.data");
        let mut data = std::io::BufWriter::new(File::create(&data_path).unwrap());
        locality::write_index_data(&shapes_path, &mut data).unwrap();
        data.flush().unwrap();
        let regions_index = dir.path().join("regions.idx");
        locality::build_locality_index(&data_path, &regions_index).unwrap();

        let regions_kv = dir.path().join("regions.jsonl");
        let mut kv = File::create(&regions_kv).unwrap();
        for (id, _, _, rank) in regions {
            let descriptor = json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
                "properties": {
                    "locales": {"default": {
                        "name": format!("region-{}", id),
                        "address": {"locality": format!("region-{}", id)}
                    }},
                    "rank": rank
                }
            });
            writeln!(kv, "{}\t{}", id, serde_json::to_string(&descriptor).unwrap()).unwrap();
        }

        let params = GenerateParams {
            regions_index,
            regions_kv,
            features: features_path,
            out_poi_ids: dir.path().join("poi-ids.txt"),
            out_kv: dir.path().join("geo-objects.jsonl"),
            verbose: false,
            threads: 1,
        };
        Fixture { _dir: dir, params }
    }

    struct RunResult {
        kv: Vec<(ObjectId, Value)>,
        poi_ids: Vec<ObjectId>,
        remaining: Vec<Feature>,
    }

    fn run_fixture(fixture: &Fixture) -> RunResult {
        assert!(generate_geo_objects(fixture.params.clone()));
        let kv = crate::kv::KeyValueStorage::read_lines(BufReader::new(
            File::open(&fixture.params.out_kv).unwrap(),
        ))
        .unwrap();
        let poi_ids = std::fs::read_to_string(&fixture.params.out_poi_ids)
            .unwrap()
            .lines()
            .map(|line| line.parse().unwrap())
            .collect();
        let remaining = FeatureReader::open(&fixture.params.features)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        RunResult {
            kv,
            poi_ids,
            remaining,
        }
    }

    fn entry<'a>(run: &'a RunResult, id: u64) -> &'a Value {
        &run
            .kv
            .iter()
            .find(|(key, _)| *key == ObjectId(id))
            .expect("missing kv entry")
            .1
    }

    fn default_address(value: &Value) -> &Value {
        &value["properties"]["locales"]["default"]["address"]
    }

    fn coordinates(value: &Value) -> (f64, f64) {
        let c = value["geometry"]["coordinates"].as_array().unwrap();
        (c[0].as_f64().unwrap(), c[1].as_f64().unwrap())
    }

    fn remaining_ids(run: &RunResult) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = run.remaining.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        ids
    }

    fn assert_descriptor_invariants(run: &RunResult, features: &[Feature]) {
        let mut seen = HashSet::new();
        for (id, value) in &run.kv {
            assert!(seen.insert(*id), "duplicate kv key {}", id);
            assert_eq!(value["properties"]["rank"], json!(30));
            let dref = value["properties"]["dref"].as_str().unwrap();
            assert!(!dref.is_empty());

            let feature = features.iter().find(|f| f.id == *id).unwrap();
            let ll = feature.key_point().to_lat_lon();
            let (lon, lat) = coordinates(value);
            assert!((lon - ll.lon).abs() < 1e-7);
            assert!((lat - ll.lat).abs() < 1e-7);
        }
    }

    #[test]
    fn test_lone_building_with_address() {
        let b1 = building(1, 10.0, 20.0, "10", "Main");
        let fx = fixture(&[b1.clone()], &[(1000, 0.0, 100.0, 4)]);
        let run = run_fixture(&fx);

        assert_eq!(run.kv.len(), 1);
        let value = entry(&run, 1);
        assert_eq!(default_address(value)["street"], json!("Main"));
        assert_eq!(default_address(value)["building"], json!("10"));
        assert_eq!(value["properties"]["dref"], json!("1000"));
        assert!(run.poi_ids.is_empty());
        assert_eq!(remaining_ids(&run), [ObjectId(1)]);
        assert_descriptor_invariants(&run, &[b1]);
    }

    #[test]
    fn test_address_point_inherits_building_geometry() {
        let b2 = building(2, 10.0, 20.0, "", "");
        let p2 = address_point(3, 15.0, 15.0, "5");
        let fx = fixture(&[b2.clone(), p2.clone()], &[(1000, 0.0, 100.0, 4)]);
        let run = run_fixture(&fx);

        // The point carries the address; the building descriptor keeps the
        // addressless sentinel that made the pairing discoverable.
        assert_eq!(default_address(entry(&run, 3))["building"], json!("5"));
        assert!(default_address(entry(&run, 2))["building"].is_null());

        // The building gave its polygon to the point and left the file.
        assert_eq!(remaining_ids(&run), [ObjectId(3)]);
        let enriched = &run.remaining[0];
        assert_eq!(enriched.geom_type, GeomType::Area);
        assert_eq!(enriched.polygons, b2.polygons);
        assert!(run.poi_ids.is_empty());
        assert_descriptor_invariants(&run, &[b2, p2]);
    }

    #[test]
    fn test_poi_inherits_from_housed_neighbor() {
        let b3 = building(4, 10.0, 20.0, "7", "Elm");
        let q3 = poi(5, 12.0, 12.0, "Corner Cafe");
        let fx = fixture(&[b3.clone(), q3.clone()], &[(1000, 0.0, 100.0, 4)]);
        let run = run_fixture(&fx);

        assert_eq!(run.kv.len(), 2);
        let value = entry(&run, 5);
        assert_eq!(default_address(value)["building"], json!("7"));
        assert_eq!(default_address(value)["street"], json!("Elm"));
        assert_eq!(
            value["properties"]["locales"]["default"]["name"],
            json!("Corner Cafe")
        );
        assert_eq!(run.poi_ids, [ObjectId(5)]);
        assert_eq!(remaining_ids(&run), [ObjectId(4), ObjectId(5)]);
        assert_descriptor_invariants(&run, &[b3, q3]);
    }

    #[test]
    fn test_poi_inherits_from_paired_address_point() {
        let b2 = building(2, 10.0, 20.0, "", "");
        let p2 = address_point(3, 15.0, 15.0, "5");
        let q4 = poi(6, 16.0, 16.0, "Kiosk");
        let fx = fixture(&[b2.clone(), p2.clone(), q4.clone()], &[(1000, 0.0, 100.0, 4)]);
        let run = run_fixture(&fx);

        let value = entry(&run, 6);
        assert_eq!(default_address(value)["building"], json!("5"));
        assert_eq!(
            value["properties"]["locales"]["default"]["name"],
            json!("Kiosk")
        );
        let (lon, lat) = coordinates(value);
        let ll = q4.key_point().to_lat_lon();
        assert!((lon - ll.lon).abs() < 1e-7 && (lat - ll.lat).abs() < 1e-7);

        assert_eq!(run.poi_ids, [ObjectId(6)]);
        assert_eq!(remaining_ids(&run), [ObjectId(3), ObjectId(6)]);
        assert_descriptor_invariants(&run, &[b2, p2, q4]);
    }

    #[test]
    fn test_building_outside_every_region_is_skipped() {
        let b5 = building(7, 10.0, 20.0, "10", "Main");
        let fx = fixture(&[b5], &[(1000, 50.0, 60.0, 4)]);
        let run = run_fixture(&fx);

        assert!(run.kv.is_empty());
        assert!(run.poi_ids.is_empty());
        assert_eq!(remaining_ids(&run), [ObjectId(7)]);
    }

    #[test]
    fn test_unpaired_addressless_building_is_kept() {
        let b6 = building(8, 10.0, 20.0, "", "");
        let fx = fixture(&[b6], &[(1000, 0.0, 100.0, 4)]);
        let run = run_fixture(&fx);

        // No address point claimed it: the record survives pass 5 and its
        // descriptor stays the addressless sentinel.
        assert_eq!(remaining_ids(&run), [ObjectId(8)]);
        assert_eq!(run.kv.len(), 1);
        assert!(default_address(entry(&run, 8))["building"].is_null());
        assert!(run.poi_ids.is_empty());
    }

    #[test]
    fn test_deepest_region_is_chosen() {
        let b = building(9, 40.0, 42.0, "1", "");
        let fx = fixture(
            &[b],
            &[(1000, 0.0, 100.0, 2), (1001, 30.0, 50.0, 8), (1002, 60.0, 90.0, 10)],
        );
        let run = run_fixture(&fx);
        assert_eq!(entry(&run, 9)["properties"]["dref"], json!("1001"));
    }

    #[test]
    fn test_two_runs_produce_the_same_output() {
        let features = vec![
            building(2, 10.0, 20.0, "", ""),
            address_point(3, 15.0, 15.0, "5"),
            building(4, 30.0, 40.0, "7", "Elm"),
            poi(5, 32.0, 32.0, "Corner Cafe"),
        ];
        let regions = [(1000u64, 0.0, 100.0, 4u64)];

        let first = run_fixture(&fixture(&features, &regions));
        let second = run_fixture(&fixture(&features, &regions));

        let sort = |mut kv: Vec<(ObjectId, Value)>| {
            kv.sort_by_key(|(id, _)| *id);
            kv
        };
        assert_eq!(sort(first.kv), sort(second.kv));
        assert_eq!(first.poi_ids, second.poi_ids);
    }

    #[test]
    fn test_parallel_run_is_consistent() {
        let mut features = Vec::new();
        for i in 0..40u64 {
            let min = (i as f64) * 2.0;
            features.push(building(i + 1, min, min + 1.0, "1", "Long Street"));
        }
        let regions = [(1000u64, 0.0, 100.0, 4u64)];

        let mut fx = fixture(&features, &regions);
        fx.params.threads = 4;
        let run = run_fixture(&fx);

        assert_eq!(run.kv.len(), 40);
        assert_descriptor_invariants(&run, &features);
    }
}
