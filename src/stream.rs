//! Length-framed feature stream.
//!
//! A record is a `u32` little-endian payload length followed by that many
//! bytes of compact JSON. Offsets are byte positions of length prefixes, so
//! decoding at any record offset yields the same record as a sequential scan.
//!
//! [`for_each_parallel`] is the driver every pass runs on: the record offset
//! list is split into contiguous ranges and each range is scanned by its own
//! worker thread over its own file handle. Every record is delivered exactly
//! once; records within one worker arrive in file order; ordering across
//! workers is unspecified.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;

use crate::error::GeneratorError;
use crate::models::Feature;

/// Upper bound for a single framed payload; anything larger is a framing bug.
const MAX_RECORD_BYTES: u32 = 256 << 20;

const PREFIX_BYTES: u64 = 4;

/// Write one length-framed payload.
pub(crate) fn write_frame(out: &mut impl Write, payload: &[u8]) -> Result<(), GeneratorError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_BYTES)
        .ok_or_else(|| GeneratorError::Codec(format!("record of {} bytes", payload.len())))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(payload)?;
    Ok(())
}

/// Read one length-framed payload. `Ok(None)` on a clean end of stream.
pub(crate) fn read_frame(input: &mut impl Read) -> Result<Option<Vec<u8>>, GeneratorError> {
    let mut prefix = [0u8; 4];
    match input.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(prefix);
    if len > MAX_RECORD_BYTES {
        return Err(GeneratorError::Codec(format!(
            "record length {} out of range",
            len
        )));
    }
    let mut payload = vec![0u8; len as usize];
    input
        .read_exact(&mut payload)
        .map_err(|_| GeneratorError::Codec("truncated record payload".to_string()))?;
    Ok(Some(payload))
}

fn decode_feature(payload: &[u8]) -> Result<Feature, GeneratorError> {
    serde_json::from_slice(payload).map_err(|e| GeneratorError::Codec(e.to_string()))
}

/// Buffered writer for a feature stream.
pub struct FeatureWriter<W: Write> {
    out: BufWriter<W>,
}

impl FeatureWriter<File> {
    pub fn create(path: &Path) -> Result<Self, GeneratorError> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> FeatureWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
        }
    }

    pub fn write(&mut self, feature: &Feature) -> Result<(), GeneratorError> {
        let payload =
            serde_json::to_vec(feature).map_err(|e| GeneratorError::Codec(e.to_string()))?;
        write_frame(&mut self.out, &payload)
    }

    pub fn finish(mut self) -> Result<(), GeneratorError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Sequential reader over a feature stream, yielding `(feature, offset)`.
pub struct FeatureReader {
    input: BufReader<File>,
    offset: u64,
}

impl FeatureReader {
    pub fn open(path: &Path) -> Result<Self, GeneratorError> {
        Ok(Self {
            input: BufReader::new(File::open(path)?),
            offset: 0,
        })
    }
}

impl Iterator for FeatureReader {
    type Item = Result<(Feature, u64), GeneratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset;
        match read_frame(&mut self.input) {
            Ok(Some(payload)) => {
                self.offset += PREFIX_BYTES + payload.len() as u64;
                Some(decode_feature(&payload).map(|f| (f, offset)))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Byte offsets of every record in the stream, via a framing-only scan
/// (prefixes are read, payloads are seeked over).
pub fn record_offsets(path: &Path) -> Result<Vec<u64>, GeneratorError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut input = BufReader::new(file);

    let mut offsets = Vec::new();
    let mut pos = 0u64;
    while pos < file_len {
        if pos + PREFIX_BYTES > file_len {
            return Err(GeneratorError::Codec("truncated record prefix".to_string()));
        }
        let mut prefix = [0u8; 4];
        input.read_exact(&mut prefix)?;
        let len = u32::from_le_bytes(prefix) as u64;
        if len > MAX_RECORD_BYTES as u64 || pos + PREFIX_BYTES + len > file_len {
            return Err(GeneratorError::Codec(format!(
                "record at offset {} overruns the stream",
                pos
            )));
        }
        offsets.push(pos);
        input.seek_relative(len as i64)?;
        pos += PREFIX_BYTES + len;
    }
    Ok(offsets)
}

/// Visit every record of the stream from `threads` parallel workers.
///
/// The visitor runs concurrently on different workers without further
/// synchronization from the reader; the first visitor or decode error fails
/// the join and is returned.
pub fn for_each_parallel<F>(path: &Path, threads: usize, visitor: F) -> Result<(), GeneratorError>
where
    F: Fn(Feature, u64) -> Result<(), GeneratorError> + Sync,
{
    let offsets = record_offsets(path)?;
    if offsets.is_empty() {
        return Ok(());
    }
    let threads = threads.max(1).min(offsets.len());
    let per_worker = offsets.len().div_ceil(threads);

    thread::scope(|scope| {
        let mut workers = Vec::with_capacity(threads);
        for range in offsets.chunks(per_worker) {
            let visitor = &visitor;
            workers.push(scope.spawn(move || scan_range(path, range, visitor)));
        }

        let mut first_error = None;
        for worker in workers {
            if let Err(e) = worker.join().expect("feature stream worker panicked") {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    })
}

fn scan_range<F>(path: &Path, range: &[u64], visitor: &F) -> Result<(), GeneratorError>
where
    F: Fn(Feature, u64) -> Result<(), GeneratorError> + Sync,
{
    let mut input = BufReader::new(File::open(path)?);
    input.seek(SeekFrom::Start(range[0]))?;
    for &offset in range {
        let payload = read_frame(&mut input)?
            .ok_or_else(|| GeneratorError::Codec("unexpected end of stream".to_string()))?;
        visitor(decode_feature(&payload)?, offset)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MercatorPoint;
    use crate::models::{GeomType, ObjectId};
    use std::sync::Mutex;

    fn sample(n: u64) -> Vec<Feature> {
        (0..n)
            .map(|i| {
                let mut f = Feature::new(
                    ObjectId(i),
                    GeomType::Point,
                    MercatorPoint::new(i as f64, -(i as f64)),
                );
                f.house = format!("{}", i % 7);
                f
            })
            .collect()
    }

    fn write_stream(path: &Path, features: &[Feature]) {
        let mut writer = FeatureWriter::create(path).unwrap();
        for f in features {
            writer.write(f).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.dat");
        let features = sample(25);
        write_stream(&path, &features);

        let back: Vec<Feature> = FeatureReader::open(&path)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(back, features);
    }

    #[test]
    fn test_empty_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.dat");
        write_stream(&path, &[]);

        assert!(record_offsets(&path).unwrap().is_empty());
        assert!(for_each_parallel(&path, 4, |_, _| Ok(())).is_ok());
    }

    #[test]
    fn test_offsets_are_record_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.dat");
        let features = sample(10);
        write_stream(&path, &features);

        let offsets = record_offsets(&path).unwrap();
        assert_eq!(offsets.len(), features.len());

        // Decoding at an offset matches the sequential read of that record.
        let mut input = BufReader::new(File::open(&path).unwrap());
        for (offset, expected) in offsets.iter().zip(&features) {
            input.seek(SeekFrom::Start(*offset)).unwrap();
            let payload = read_frame(&mut input).unwrap().unwrap();
            assert_eq!(&decode_feature(&payload).unwrap(), expected);
        }
    }

    #[test]
    fn test_parallel_visits_each_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.dat");
        let features = sample(101);
        write_stream(&path, &features);

        let seen = Mutex::new(Vec::new());
        for_each_parallel(&path, 4, |f, offset| {
            seen.lock().unwrap().push((f.id, offset));
            Ok(())
        })
        .unwrap();

        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        let ids: Vec<ObjectId> = seen.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, (0..101u64).map(ObjectId).collect::<Vec<_>>());
    }

    #[test]
    fn test_visitor_error_fails_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.dat");
        write_stream(&path, &sample(8));

        let result = for_each_parallel(&path, 2, |f, _| {
            if f.id == ObjectId(5) {
                Err(GeneratorError::Schema("boom".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(GeneratorError::Schema(_))));
    }

    #[test]
    fn test_truncated_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.dat");
        write_stream(&path, &sample(3));

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 2).unwrap();

        assert!(matches!(
            record_offsets(&path),
            Err(GeneratorError::Codec(_))
        ));
    }
}
