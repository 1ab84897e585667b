//! AES-256-CTR under a passphrase-derived key. No integrity: a wrong key
//! produces garbage, and detection is left to the secure element layer.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher as _};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Result, TiplineError};

pub const STREAM_KEY_LEN: usize = 32;
pub const STREAM_IV_LEN: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

pub struct StreamCipher {
    key: Zeroizing<Vec<u8>>,
}

impl StreamCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != STREAM_KEY_LEN {
            return Err(TiplineError::InvalidInput(format!(
                "invalid key length: {}",
                key.len()
            )));
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<StreamSealed> {
        let mut iv = [0u8; STREAM_IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let mut ciphertext = plaintext.to_vec();
        self.apply(&iv, &mut ciphertext)?;
        Ok(StreamSealed {
            ciphertext,
            iv: iv.to_vec(),
        })
    }

    pub fn unseal(&self, sealed: &StreamSealed) -> Result<Vec<u8>> {
        let mut plaintext = sealed.ciphertext.clone();
        self.apply(&sealed.iv, &mut plaintext)?;
        Ok(plaintext)
    }

    fn apply(&self, iv: &[u8], buf: &mut [u8]) -> Result<()> {
        let mut cipher = Aes256Ctr::new_from_slices(&self.key, iv)
            .map_err(|_| TiplineError::InvalidInput(format!("invalid iv length: {}", iv.len())))?;
        cipher.apply_keystream(buf);
        Ok(())
    }
}
