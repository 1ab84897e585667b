//! Small namespaced key -> hex records kept next to the blob. Holds IVs only,
//! never key material or plaintext.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;

pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn write_all(&self, records: &BTreeMap<String, String>) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec(records)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.read_all()?.get(name) {
            Some(encoded) => Ok(Some(hex::decode(encoded)?)),
            None => Ok(None),
        }
    }

    /// Writes several records in one atomic replace.
    pub fn put_many(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        let mut records = self.read_all()?;
        for (name, value) in entries {
            records.insert((*name).to_string(), hex::encode(value));
        }
        self.write_all(&records)
    }
}
