//! Locality index construction.
//!
//! Two-step build, matching the generator's staging: the feature file is
//! streamed once into a temp data file of index entries, then the data file
//! is compiled into the mmap-able index format. [`build_temp_index`] runs
//! both steps over `tempfile`-guarded paths and is what the pipeline calls
//! concurrently with pass 1.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::info;

use super::{EntryShape, IndexEntry, LocalityIndex, INDEX_MAGIC, INDEX_VERSION};
use crate::error::GeneratorError;
use crate::geometry::rings_bbox;
use crate::models::GeomType;
use crate::stream::{read_frame, write_frame, FeatureReader};

/// Stream `features_path` once and write one framed [`IndexEntry`] per
/// indexable feature (lines are skipped). Returns the entry count.
pub fn write_index_data(
    features_path: &Path,
    out: &mut impl Write,
) -> Result<usize, GeneratorError> {
    let mut written = 0usize;
    for record in FeatureReader::open(features_path)? {
        let (feature, _) = record?;
        let shape = match feature.geom_type {
            GeomType::Line => continue,
            GeomType::Point => EntryShape::Point {
                point: feature.center,
            },
            GeomType::Area => match rings_bbox(&feature.polygons) {
                Some(bbox) => EntryShape::Area {
                    bbox,
                    rings: feature.polygons,
                },
                // An area with no rings degrades to its key point.
                None => EntryShape::Point {
                    point: feature.center,
                },
            },
        };
        let entry = IndexEntry {
            id: feature.id,
            shape,
        };
        let payload =
            serde_json::to_vec(&entry).map_err(|e| GeneratorError::Codec(e.to_string()))?;
        write_frame(out, &payload)?;
        written += 1;
    }
    Ok(written)
}

/// Compile a data file of framed entries into the locality index format:
/// magic, version, entry count, then the validated entries.
pub fn build_locality_index(data_path: &Path, out_path: &Path) -> Result<(), GeneratorError> {
    let mut input = BufReader::new(File::open(data_path)?);
    let mut entries: Vec<Vec<u8>> = Vec::new();
    loop {
        let payload = match read_frame(&mut input) {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => return Err(GeneratorError::IndexBuild(e.to_string())),
        };
        // Validate now so a malformed entry fails the build, not a query.
        serde_json::from_slice::<IndexEntry>(&payload)
            .map_err(|e| GeneratorError::IndexBuild(e.to_string()))?;
        entries.push(payload);
    }

    let mut out = BufWriter::new(File::create(out_path)?);
    out.write_all(INDEX_MAGIC)?;
    out.write_all(&INDEX_VERSION.to_le_bytes())?;
    out.write_all(&(entries.len() as u64).to_le_bytes())?;
    for payload in &entries {
        write_frame(&mut out, payload)?;
    }
    out.flush()?;
    Ok(())
}

/// Build a throwaway locality index for `features_path`. The temp data and
/// index files are removed on scope exit, once the index is loaded.
pub fn build_temp_index(features_path: &Path) -> Result<LocalityIndex, GeneratorError> {
    let data = tempfile::NamedTempFile::new()?;
    let mut writer = BufWriter::new(data.reopen()?);
    let written = write_index_data(features_path, &mut writer)?;
    writer.flush()?;
    info!("locality index data written for {} objects", written);

    let index_file = tempfile::NamedTempFile::new()?;
    build_locality_index(data.path(), index_file.path())?;
    LocalityIndex::open(index_file.path())
}
