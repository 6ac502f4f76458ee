//! Append-only key-value storage for geo-object descriptors.
//!
//! Every insert serializes one `"<dref>\t<compact json>\n"` line to the sink
//! file, so the file reflects insertion order. The in-memory view backs the
//! predicate searches of later passes.

use hashbrown::HashMap;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::GeneratorError;
use crate::models::ObjectId;

struct Inner {
    values: HashMap<ObjectId, Arc<Value>>,
    sink: BufWriter<File>,
}

/// Thread-safe insertion-ordered map from object id to JSON descriptor,
/// mirrored into a line-oriented sink file.
pub struct KeyValueStorage {
    inner: Mutex<Inner>,
}

impl KeyValueStorage {
    /// Create an empty storage writing to `path`.
    pub fn create(path: &Path) -> Result<Self, GeneratorError> {
        Ok(Self {
            inner: Mutex::new(Inner {
                values: HashMap::new(),
                sink: BufWriter::new(File::create(path)?),
            }),
        })
    }

    /// Record `id -> value` and append its line to the sink. Returns whether
    /// the id was new; a duplicate overwrites the in-memory value (last
    /// wins) and the pipeline treats it as a data bug worth a warning.
    pub fn insert(&self, id: ObjectId, value: Value) -> Result<bool, GeneratorError> {
        let line = serde_json::to_string(&value).map_err(|e| GeneratorError::Codec(e.to_string()))?;
        let mut inner = self.inner.lock().expect("kv mutex poisoned");
        writeln!(inner.sink, "{}\t{}", id.dref(), line)?;
        Ok(inner.values.insert(id, Arc::new(value)).is_none())
    }

    /// Current value for an id inserted in this run.
    pub fn find(&self, id: ObjectId) -> Option<Arc<Value>> {
        self.inner
            .lock()
            .expect("kv mutex poisoned")
            .values
            .get(&id)
            .cloned()
    }

    /// Count of distinct ids inserted.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("kv mutex poisoned").values.len()
    }

    /// Flush the sink file.
    pub fn flush(&self) -> Result<(), GeneratorError> {
        self.inner
            .lock()
            .expect("kv mutex poisoned")
            .sink
            .flush()?;
        Ok(())
    }

    /// Parse the sink line format back into `(id, descriptor)` pairs. Used
    /// for the regions key-value file and by tests inspecting output.
    pub fn read_lines(input: impl BufRead) -> Result<Vec<(ObjectId, Value)>, GeneratorError> {
        let mut entries = Vec::new();
        for (number, line) in input.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (dref, json) = line.split_once('\t').ok_or_else(|| {
                GeneratorError::Codec(format!("kv line {} lacks a tab separator", number + 1))
            })?;
            let id = dref.parse::<ObjectId>().map_err(|_| {
                GeneratorError::Codec(format!("kv line {} has a malformed dref", number + 1))
            })?;
            let value = serde_json::from_str(json)
                .map_err(|e| GeneratorError::Codec(format!("kv line {}: {}", number + 1, e)))?;
            entries.push((id, value));
        }
        Ok(entries)
    }
}
