//! Persistence of per-region envelope maxima, so auto-ranging survives a
//! restart. The store is a plain key-value interface keyed by region index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::Result;

pub trait EnvelopeStore {
    fn load(&self, region: usize) -> Option<f32>;
    fn save(&mut self, region: usize, envelope_max: f32) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEnvelopeStore {
    values: BTreeMap<usize, f32>,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnvelopeStore for MemoryEnvelopeStore {
    fn load(&self, region: usize) -> Option<f32> {
        self.values.get(&region).copied()
    }

    fn save(&mut self, region: usize, envelope_max: f32) -> Result<()> {
        self.values.insert(region, envelope_max);
        Ok(())
    }
}

/// A JSON file of `{"<region>": envelope_max}`. Every save rewrites the file.
#[derive(Debug, Clone)]
pub struct JsonEnvelopeStore {
    path: PathBuf,
    values: BTreeMap<usize, f32>,
}

impl JsonEnvelopeStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match File::open(&path) {
            Ok(mut file) => {
                let mut data = String::new();
                file.read_to_string(&mut data)?;
                serde_json::from_str(&data)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let json_string = serde_json::to_string_pretty(&self.values)?;
        let mut file = File::create(&self.path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}

impl EnvelopeStore for JsonEnvelopeStore {
    fn load(&self, region: usize) -> Option<f32> {
        self.values.get(&region).copied()
    }

    fn save(&mut self, region: usize, envelope_max: f32) -> Result<()> {
        self.values.insert(region, envelope_max);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envelopes.json");

        let mut store = JsonEnvelopeStore::open(&path).unwrap();
        assert_eq!(store.load(0), None);
        store.save(0, 0.75).unwrap();
        store.save(3, 1.5).unwrap();

        let reopened = JsonEnvelopeStore::open(&path).unwrap();
        assert_eq!(reopened.load(0), Some(0.75));
        assert_eq!(reopened.load(3), Some(1.5));
        assert_eq!(reopened.load(1), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envelopes.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonEnvelopeStore::open(&path), Err(crate::Error::Json(_))));
    }
}
