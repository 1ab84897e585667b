use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_NAMESPACE: &str = "tipline";
/// Padded plaintext length of the private store.
pub const DEFAULT_BLOB_LEN: usize = 4 * 1024;
pub const DEFAULT_PASSPHRASE_WORDS: usize = 3;
pub const DEFAULT_SYNC_INTERVAL_SECS: i64 = 60 * 60;
pub const SYNC_INTERVAL_OFF: i64 = -1;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// 256 MiB, 3 passes. Unlock stays around a second on current hardware.
    pub const fn moderate() -> Self {
        Self {
            memory_kib: 256 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }

    /// Cheap parameters for tests. Never use for real stores.
    pub const fn interactive() -> Self {
        Self {
            memory_kib: 8 * 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiplineConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_blob_len")]
    pub blob_len: usize,
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default = "default_passphrase_words")]
    pub passphrase_words: usize,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: i64,
}

impl Default for TiplineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            data_dir: None,
            blob_len: DEFAULT_BLOB_LEN,
            kdf: KdfParams::moderate(),
            passphrase_words: DEFAULT_PASSPHRASE_WORDS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl TiplineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Reads `path` if it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path.as_ref(), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Resolved data directory: explicit setting or the platform default.
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::paths::data_dir(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_blob_len() -> usize {
    DEFAULT_BLOB_LEN
}

fn default_passphrase_words() -> usize {
    DEFAULT_PASSPHRASE_WORDS
}

fn default_sync_interval() -> i64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: TiplineConfig = serde_json::from_str(r#"{"namespace":"qa"}"#).unwrap();
        assert_eq!(cfg.namespace, "qa");
        assert_eq!(cfg.blob_len, DEFAULT_BLOB_LEN);
        assert_eq!(cfg.kdf, KdfParams::moderate());
        assert_eq!(cfg.sync_interval_secs, DEFAULT_SYNC_INTERVAL_SECS);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cfg = TiplineConfig {
            namespace: "roundtrip".into(),
            kdf: KdfParams::interactive(),
            ..TiplineConfig::default()
        };
        cfg.save(&path).unwrap();
        let loaded = TiplineConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.namespace, "roundtrip");
        assert_eq!(loaded.kdf, KdfParams::interactive());
    }

    #[test]
    fn absent_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = TiplineConfig::load_or_default(dir.path().join("none.json")).unwrap();
        assert_eq!(cfg.namespace, DEFAULT_NAMESPACE);
    }
}
