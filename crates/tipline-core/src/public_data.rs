//! Non-sensitive metadata: contacts, relay keys, message queues and sync
//! timers. Nothing in here may reveal whether the private store is in use.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::DEFAULT_SYNC_INTERVAL_SECS;
use crate::error::{Result, TiplineError};
use crate::model::{ContactId, RemoteContact};

/// Narrow interface the session and background cycle depend on.
pub trait PublicData: Send + Sync {
    fn get_contact(&self, id: ContactId) -> Result<RemoteContact>;
    fn list_contacts(&self) -> Result<Vec<RemoteContact>>;
    fn add_or_update_contact(&self, contact: RemoteContact) -> Result<()>;

    fn relay_public_key(&self) -> Result<Vec<u8>>;
    fn relay_signing_key(&self) -> Result<Vec<u8>>;
    fn set_relay_keys(&self, public_key: &[u8], signing_key: &[u8]) -> Result<()>;

    fn enqueue_outgoing(&self, blob: Vec<u8>) -> Result<()>;
    /// Removes and returns the oldest queued message, `None` when empty.
    fn dequeue_oldest_outgoing(&self) -> Result<Option<Vec<u8>>>;
    fn pending_outgoing(&self) -> Result<Vec<Vec<u8>>>;
    fn clear_outgoing(&self) -> Result<()>;

    fn add_incoming(&self, blobs: Vec<Vec<u8>>) -> Result<()>;
    /// All queued inbound blobs. They stay queued until [`clear_incoming`](Self::clear_incoming).
    fn drain_incoming(&self) -> Result<Vec<Vec<u8>>>;
    fn clear_incoming(&self) -> Result<()>;

    /// Seconds between background cycles, `-1` when disabled.
    fn sync_interval_secs(&self) -> Result<i64>;
    fn set_sync_interval_secs(&self, secs: i64) -> Result<()>;
    fn next_sync_time(&self) -> Result<Option<DateTime<Utc>>>;
    fn set_next_sync_time(&self, at: DateTime<Utc>) -> Result<()>;

    fn sync_remote_contacts(&self, contacts: Vec<RemoteContact>) -> Result<usize> {
        let count = contacts.len();
        for contact in contacts {
            self.add_or_update_contact(contact)?;
        }
        debug!(count, "remote contacts synced");
        Ok(count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Blob(#[serde(with = "hex")] Vec<u8>);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PublicDocument {
    #[serde(default)]
    contacts: BTreeMap<ContactId, RemoteContact>,
    #[serde(default)]
    relay_public_key: Option<Blob>,
    #[serde(default)]
    relay_signing_key: Option<Blob>,
    #[serde(default)]
    outgoing: VecDeque<Blob>,
    #[serde(default)]
    incoming: Vec<Blob>,
    #[serde(default)]
    sync_interval_secs: Option<i64>,
    #[serde(default)]
    next_sync: Option<DateTime<Utc>>,
}

/// Local metadata store, in memory or backed by a JSON file.
pub struct LocalPublicData {
    path: Option<PathBuf>,
    doc: Mutex<PublicDocument>,
}

impl LocalPublicData {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(PublicDocument::default()),
        }
    }

    /// Opens or creates the JSON file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            PublicDocument::default()
        };
        Ok(Self {
            path: Some(path),
            doc: Mutex::new(doc),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&PublicDocument) -> T) -> T {
        let doc = self.doc.lock();
        f(&*doc)
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut PublicDocument) -> T) -> Result<T> {
        let mut doc = self.doc.lock();
        let out = f(&mut *doc);
        if let Some(path) = &self.path {
            persist(path, &*doc)?;
        }
        Ok(out)
    }
}

fn persist(path: &Path, doc: &PublicDocument) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(doc)?)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl PublicData for LocalPublicData {
    fn get_contact(&self, id: ContactId) -> Result<RemoteContact> {
        self.read(|d| d.contacts.get(&id).cloned())
            .ok_or_else(|| TiplineError::NotFound(format!("contact {id}")))
    }

    fn list_contacts(&self) -> Result<Vec<RemoteContact>> {
        Ok(self.read(|d| d.contacts.values().cloned().collect()))
    }

    fn add_or_update_contact(&self, contact: RemoteContact) -> Result<()> {
        self.mutate(|d| {
            d.contacts.insert(contact.id, contact);
        })
    }

    fn relay_public_key(&self) -> Result<Vec<u8>> {
        self.read(|d| d.relay_public_key.clone())
            .map(|b| b.0)
            .ok_or_else(|| TiplineError::NotFound("relay public key".into()))
    }

    fn relay_signing_key(&self) -> Result<Vec<u8>> {
        self.read(|d| d.relay_signing_key.clone())
            .map(|b| b.0)
            .ok_or_else(|| TiplineError::NotFound("relay signing key".into()))
    }

    fn set_relay_keys(&self, public_key: &[u8], signing_key: &[u8]) -> Result<()> {
        self.mutate(|d| {
            d.relay_public_key = Some(Blob(public_key.to_vec()));
            d.relay_signing_key = Some(Blob(signing_key.to_vec()));
        })
    }

    fn enqueue_outgoing(&self, blob: Vec<u8>) -> Result<()> {
        self.mutate(|d| d.outgoing.push_back(Blob(blob)))
    }

    fn dequeue_oldest_outgoing(&self) -> Result<Option<Vec<u8>>> {
        self.mutate(|d| d.outgoing.pop_front().map(|b| b.0))
    }

    fn pending_outgoing(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.read(|d| d.outgoing.iter().map(|b| b.0.clone()).collect()))
    }

    fn clear_outgoing(&self) -> Result<()> {
        self.mutate(|d| d.outgoing.clear())
    }

    fn add_incoming(&self, blobs: Vec<Vec<u8>>) -> Result<()> {
        self.mutate(|d| d.incoming.extend(blobs.into_iter().map(Blob)))
    }

    fn drain_incoming(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.read(|d| d.incoming.iter().map(|b| b.0.clone()).collect()))
    }

    fn clear_incoming(&self) -> Result<()> {
        self.mutate(|d| d.incoming.clear())
    }

    fn sync_interval_secs(&self) -> Result<i64> {
        Ok(self.read(|d| d.sync_interval_secs.unwrap_or(DEFAULT_SYNC_INTERVAL_SECS)))
    }

    fn set_sync_interval_secs(&self, secs: i64) -> Result<()> {
        self.mutate(|d| d.sync_interval_secs = Some(secs))
    }

    fn next_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read(|d| d.next_sync))
    }

    fn set_next_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|d| d.next_sync = Some(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn contact(id: ContactId, name: &str) -> RemoteContact {
        RemoteContact {
            id,
            name: name.into(),
            public_key: vec![id as u8; 32],
        }
    }

    #[test]
    fn contacts_are_upserted_by_id() {
        let data = LocalPublicData::in_memory();
        data.add_or_update_contact(contact(1, "Desk")).unwrap();
        data.add_or_update_contact(contact(1, "Desk (new)")).unwrap();
        data.add_or_update_contact(contact(2, "Editor")).unwrap();
        assert_eq!(data.list_contacts().unwrap().len(), 2);
        assert_eq!(data.get_contact(1).unwrap().name, "Desk (new)");
        assert!(matches!(data.get_contact(9), Err(TiplineError::NotFound(_))));
    }

    #[test]
    fn outgoing_queue_is_fifo() {
        let data = LocalPublicData::in_memory();
        data.enqueue_outgoing(vec![1]).unwrap();
        data.enqueue_outgoing(vec![2]).unwrap();
        assert_eq!(data.pending_outgoing().unwrap(), vec![vec![1], vec![2]]);
        assert_eq!(data.dequeue_oldest_outgoing().unwrap(), Some(vec![1]));
        assert_eq!(data.dequeue_oldest_outgoing().unwrap(), Some(vec![2]));
        assert_eq!(data.dequeue_oldest_outgoing().unwrap(), None);
    }

    #[test]
    fn incoming_stays_until_cleared() {
        let data = LocalPublicData::in_memory();
        data.add_incoming(vec![vec![9], vec![8]]).unwrap();
        assert_eq!(data.drain_incoming().unwrap().len(), 2);
        assert_eq!(data.drain_incoming().unwrap().len(), 2);
        data.clear_incoming().unwrap();
        assert!(data.drain_incoming().unwrap().is_empty());
    }

    #[test]
    fn missing_relay_keys_are_not_found() {
        let data = LocalPublicData::in_memory();
        assert!(matches!(data.relay_public_key(), Err(TiplineError::NotFound(_))));
        data.set_relay_keys(&[1; 32], &[2; 32]).unwrap();
        assert_eq!(data.relay_signing_key().unwrap(), vec![2; 32]);
    }

    #[test]
    fn sync_interval_defaults_to_an_hour() {
        let data = LocalPublicData::in_memory();
        assert_eq!(data.sync_interval_secs().unwrap(), DEFAULT_SYNC_INTERVAL_SECS);
        data.set_sync_interval_secs(-1).unwrap();
        assert_eq!(data.sync_interval_secs().unwrap(), -1);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("public.json");
        {
            let data = LocalPublicData::open(&path).unwrap();
            data.add_or_update_contact(contact(3, "Tips")).unwrap();
            data.enqueue_outgoing(vec![0xab; 4]).unwrap();
            data.set_relay_keys(&[5; 32], &[6; 32]).unwrap();
        }
        let reopened = LocalPublicData::open(&path).unwrap();
        assert_eq!(reopened.get_contact(3).unwrap().name, "Tips");
        assert_eq!(reopened.pending_outgoing().unwrap(), vec![vec![0xab; 4]]);
        assert_eq!(reopened.relay_public_key().unwrap(), vec![5; 32]);
    }

    #[test]
    fn sync_remote_contacts_upserts_all() {
        let data = LocalPublicData::in_memory();
        let n = data
            .sync_remote_contacts(vec![contact(1, "a"), contact(2, "b")])
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(data.list_contacts().unwrap().len(), 2);
    }
}
