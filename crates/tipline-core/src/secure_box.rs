//! The on-disk private store: one fixed-size blob plus two IV records.
//!
//! `store`: derive key -> secure element seal -> stream seal -> write.
//! `load` runs the layers in reverse. Only the secure element layer can
//! reject, so a wrong passphrase, a reset key and a corrupted blob all end
//! in the same [`TiplineError::AuthenticationFailed`].

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::KdfParams;
use crate::error::{Result, TiplineError};
use crate::kdf::derive_key_with;
use crate::padding::Padded;
use crate::passphrase::Passphrase;
use crate::paths;
use crate::record_store::RecordStore;
use crate::secure_element::{KeySlot, SecureElement, SecureElementSealed};
use crate::stream_cipher::{StreamCipher, StreamSealed, STREAM_KEY_LEN};

pub const STREAM_IV_RECORD: &str = "tipline_stream_iv";
pub const SE_IV_RECORD: &str = "tipline_se_iv";

pub struct SecureBox {
    blob_path: PathBuf,
    records: RecordStore,
    element: SecureElement,
    kdf: KdfParams,
    blob_len: usize,
}

impl SecureBox {
    pub fn new(
        data_dir: &Path,
        namespace: &str,
        slot: Box<dyn KeySlot>,
        kdf: KdfParams,
        blob_len: usize,
    ) -> Result<Self> {
        Ok(Self {
            blob_path: paths::blob_path(data_dir, namespace),
            records: RecordStore::new(paths::records_path(data_dir, namespace)),
            element: SecureElement::new(slot)?,
            kdf,
            blob_len,
        })
    }

    pub fn blob_path(&self) -> &Path {
        &self.blob_path
    }

    pub fn blob_len(&self) -> usize {
        self.blob_len
    }

    pub fn store(&self, padded: &Padded, passphrase: &Passphrase) -> Result<()> {
        if padded.len() != self.blob_len {
            return Err(TiplineError::InvalidInput(format!(
                "padded length {} does not match blob length {}",
                padded.len(),
                self.blob_len
            )));
        }
        let key = derive_key_with(&self.kdf, passphrase.as_str(), STREAM_KEY_LEN)?;
        let inner = self.element.seal(padded.as_bytes())?;
        let outer = StreamCipher::new(&key)?.seal(&inner.ciphertext)?;

        self.write_blob(&outer.ciphertext)?;
        self.records.put_many(&[
            (STREAM_IV_RECORD, outer.iv.as_slice()),
            (SE_IV_RECORD, inner.iv.as_slice()),
        ])?;
        debug!(path = %self.blob_path.display(), "secure box stored");
        Ok(())
    }

    pub fn load(&self, passphrase: &Passphrase) -> Result<Padded> {
        let ciphertext = fs::read(&self.blob_path)?;
        let stream_iv = self
            .records
            .get(STREAM_IV_RECORD)?
            .ok_or(TiplineError::AuthenticationFailed)?;
        let se_iv = self
            .records
            .get(SE_IV_RECORD)?
            .ok_or(TiplineError::AuthenticationFailed)?;

        let key = derive_key_with(&self.kdf, passphrase.as_str(), STREAM_KEY_LEN)?;
        // unseal of a CTR stream cannot fail on content, only on iv shape
        let inner = StreamCipher::new(&key)?
            .unseal(&StreamSealed {
                ciphertext,
                iv: stream_iv,
            })
            .map_err(|_| TiplineError::AuthenticationFailed)?;
        let plaintext = self.element.unseal(&SecureElementSealed {
            ciphertext: inner,
            iv: se_iv,
        })?;
        Padded::from_bytes(plaintext, self.blob_len)
            .map_err(|e| TiplineError::CorruptData(e.to_string()))
    }

    /// Resets the hardware key. The blob stays on disk but can never be
    /// opened again.
    pub fn wipe(&self) -> Result<()> {
        self.element.reset_key()?;
        debug!(path = %self.blob_path.display(), "secure box key reset");
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.blob_path.exists()
    }

    /// Bumps the blob mtime so its age says nothing about last use.
    pub fn touch(&self) -> Result<()> {
        let file = File::options().write(true).open(&self.blob_path)?;
        file.set_modified(SystemTime::now())?;
        Ok(())
    }

    fn write_blob(&self, bytes: &[u8]) -> Result<()> {
        let dir = self.blob_path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.blob_path).map_err(|e| e.error)?;
        Ok(())
    }
}
