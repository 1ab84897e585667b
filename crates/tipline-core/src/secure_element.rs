//! Authenticated encryption under a key held outside the blob directory.
//!
//! The key lives in a [`KeySlot`]: the platform keyring in production, process
//! memory in tests. [`SecureElement::reset_key`] replaces it, after which every
//! previously sealed ciphertext fails to open. That replacement is the wipe
//! primitive of the whole store.

use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use keyring::Entry;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Result, TiplineError};

pub const SE_KEY_LEN: usize = 32;
pub const SE_IV_LEN: usize = 12;
pub const SE_TAG_LEN: usize = 16;

const SERVICE_NAME: &str = "tipline";
const SE_KEY_ALIAS: &str = "tipline_se_key";

/// Storage for the secure element key.
pub trait KeySlot: Send + Sync {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>>;
    fn store(&self, key: &[u8]) -> Result<()>;
}

/// Platform keyring (Secret Service, Keychain, Credential Manager).
pub struct KeyringSlot {
    user: String,
}

impl KeyringSlot {
    pub fn new(namespace: &str) -> Self {
        Self {
            user: format!("{}_{}", namespace, SE_KEY_ALIAS),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.user)
            .map_err(|e| TiplineError::KeyStore(format!("keyring init: {e}")))
    }
}

impl KeySlot for KeyringSlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.entry()?.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                Ok(Some(Zeroizing::new(hex::decode(encoded.as_str())?)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TiplineError::KeyStore(format!("load key: {e}"))),
        }
    }

    fn store(&self, key: &[u8]) -> Result<()> {
        let encoded = Zeroizing::new(hex::encode(key));
        self.entry()?
            .set_password(&encoded)
            .map_err(|e| TiplineError::KeyStore(format!("store key: {e}")))
    }
}

/// In-process slot. Clones share the same key.
#[derive(Clone, Default)]
pub struct MemorySlot {
    key: Arc<Mutex<Option<Zeroizing<Vec<u8>>>>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeySlot for MemorySlot {
    fn load(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.key.lock().clone())
    }

    fn store(&self, key: &[u8]) -> Result<()> {
        *self.key.lock() = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureElementSealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

pub struct SecureElement {
    slot: Box<dyn KeySlot>,
}

impl SecureElement {
    /// Wraps `slot`, generating a key if it holds none yet.
    pub fn new(slot: Box<dyn KeySlot>) -> Result<Self> {
        let se = Self { slot };
        se.ensure_key()?;
        Ok(se)
    }

    fn ensure_key(&self) -> Result<()> {
        if self.slot.load()?.is_none() {
            debug!("no secure element key present, generating one");
            self.reset_key()?;
        }
        Ok(())
    }

    /// Replace the key. Everything sealed before becomes unrecoverable.
    pub fn reset_key(&self) -> Result<()> {
        let mut key = Zeroizing::new([0u8; SE_KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        self.slot.store(&key[..])?;
        debug!("secure element key reset");
        Ok(())
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.slot.load()?.ok_or(TiplineError::AuthenticationFailed)?;
        Aes256Gcm::new_from_slice(&key).map_err(|_| TiplineError::AuthenticationFailed)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<SecureElementSealed> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| TiplineError::KeyStore(format!("seal: {e}")))?;
        Ok(SecureElementSealed {
            ciphertext,
            iv: nonce.to_vec(),
        })
    }

    pub fn unseal(&self, sealed: &SecureElementSealed) -> Result<Vec<u8>> {
        if sealed.iv.len() != SE_IV_LEN {
            return Err(TiplineError::AuthenticationFailed);
        }
        let cipher = self.cipher()?;
        cipher
            .decrypt(Nonce::from_slice(&sealed.iv), sealed.ciphertext.as_slice())
            .map_err(|_| TiplineError::AuthenticationFailed)
    }
}
