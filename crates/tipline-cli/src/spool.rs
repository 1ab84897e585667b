//! Directory-backed relay transport.
//!
//! ```text
//! spool/contacts.json     contacts published by the service (optional)
//! spool/relay_keys.json   relay public and signing keys, hex (optional)
//! spool/outgoing/*.hex    packets handed to the relay, one per file
//! spool/deaddrop/*.hex    inbound packets, removed once acknowledged
//! ```
//!
//! An external sync job moves files between these directories and the relay.

use parking_lot::Mutex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tipline_core::{PublicData, RelayApplication, RelayKeys, RemoteContact, Result};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RelayKeysFile {
    #[serde(with = "hex")]
    public_key: Vec<u8>,
    #[serde(with = "hex")]
    signing_key: Vec<u8>,
}

pub struct SpoolRelay {
    root: PathBuf,
    public: Arc<dyn PublicData>,
    downloaded: Mutex<Vec<PathBuf>>,
}

impl SpoolRelay {
    pub fn new(root: PathBuf, public: Arc<dyn PublicData>) -> Self {
        Self {
            root,
            public,
            downloaded: Mutex::new(Vec::new()),
        }
    }

    fn outgoing_dir(&self) -> PathBuf {
        self.root.join("outgoing")
    }

    fn deaddrop_dir(&self) -> PathBuf {
        self.root.join("deaddrop")
    }
}

impl RelayApplication for SpoolRelay {
    fn download_remote_contacts(&self) -> Result<Vec<RemoteContact>> {
        let path = self.root.join("contacts.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Falls back to the keys already stored when the spool carries none.
    fn download_relay_keys(&self) -> Result<RelayKeys> {
        let path = self.root.join("relay_keys.json");
        if path.exists() {
            let file: RelayKeysFile = serde_json::from_slice(&fs::read(path)?)?;
            return Ok(RelayKeys {
                public_key: file.public_key,
                signing_key: file.signing_key,
            });
        }
        Ok(RelayKeys {
            public_key: self.public.relay_public_key()?,
            signing_key: self.public.relay_signing_key()?,
        })
    }

    fn download_deaddrop(&self) -> Result<Vec<Vec<u8>>> {
        let dir = self.deaddrop_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "hex"))
            .collect();
        files.sort();

        let mut packets = Vec::with_capacity(files.len());
        for path in &files {
            match read_hex(path) {
                Ok(bytes) => packets.push(bytes),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable packet"),
            }
        }
        *self.downloaded.lock() = files;
        debug!(count = packets.len(), "dead-drop downloaded");
        Ok(packets)
    }

    fn acknowledge_deaddrop(&self) -> Result<()> {
        let files = std::mem::take(&mut *self.downloaded.lock());
        for path in &files {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(count = files.len(), "dead-drop released");
        Ok(())
    }

    fn send_outgoing_message(&self, blob: Vec<u8>) -> Result<()> {
        let dir = self.outgoing_dir();
        fs::create_dir_all(&dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = dir.join(format!("{stamp:032}.hex"));
        fs::write(&path, hex::encode(blob))?;
        debug!(path = %path.display(), "packet spooled");
        Ok(())
    }
}

fn read_hex(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)?;
    Ok(hex::decode(text.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tipline_core::{LocalPublicData, TiplineError};

    fn relay(root: &Path) -> SpoolRelay {
        SpoolRelay::new(root.to_path_buf(), Arc::new(LocalPublicData::in_memory()))
    }

    #[test]
    fn empty_spool_yields_nothing() {
        let dir = tempdir().unwrap();
        let r = relay(dir.path());
        assert!(r.download_remote_contacts().unwrap().is_empty());
        assert!(r.download_deaddrop().unwrap().is_empty());
        assert!(matches!(r.download_relay_keys(), Err(TiplineError::NotFound(_))));
    }

    #[test]
    fn deaddrop_files_are_removed_on_acknowledge() {
        let dir = tempdir().unwrap();
        let drop_dir = dir.path().join("deaddrop");
        fs::create_dir_all(&drop_dir).unwrap();
        fs::write(drop_dir.join("a.hex"), "0102").unwrap();
        fs::write(drop_dir.join("b.hex"), "not hex").unwrap();
        fs::write(drop_dir.join("notes.txt"), "ignored").unwrap();

        let r = relay(dir.path());
        assert_eq!(r.download_deaddrop().unwrap(), vec![vec![1, 2]]);
        assert!(drop_dir.join("a.hex").exists());

        r.acknowledge_deaddrop().unwrap();
        assert!(!drop_dir.join("a.hex").exists());
        assert!(!drop_dir.join("b.hex").exists());
        assert!(drop_dir.join("notes.txt").exists());
    }

    #[test]
    fn unacknowledged_packets_are_downloaded_again() {
        let dir = tempdir().unwrap();
        let drop_dir = dir.path().join("deaddrop");
        fs::create_dir_all(&drop_dir).unwrap();
        fs::write(drop_dir.join("a.hex"), "ff").unwrap();

        let r = relay(dir.path());
        assert_eq!(r.download_deaddrop().unwrap(), vec![vec![0xff]]);
        assert_eq!(r.download_deaddrop().unwrap(), vec![vec![0xff]]);
    }

    #[test]
    fn sent_packets_land_in_outgoing() {
        let dir = tempdir().unwrap();
        let r = relay(dir.path());
        r.send_outgoing_message(vec![0xab, 0xcd]).unwrap();
        let files: Vec<_> = fs::read_dir(dir.path().join("outgoing")).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        assert_eq!(fs::read_to_string(path).unwrap(), "abcd");
    }

    #[test]
    fn relay_keys_file_is_read() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("relay_keys.json"),
            format!(
                r#"{{"public_key":"{}","signing_key":"{}"}}"#,
                "11".repeat(32),
                "22".repeat(32)
            ),
        )
        .unwrap();
        let keys = relay(dir.path()).download_relay_keys().unwrap();
        assert_eq!(keys.public_key, vec![0x11; 32]);
        assert_eq!(keys.signing_key, vec![0x22; 32]);
    }
}

