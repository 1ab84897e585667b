//! Compress-then-pad codec producing blobs of one fixed length.
//!
//! Layout: `u32 BE compressed length | zstd frame | 0x00 ...`

use bytes::{Buf, BufMut};
use tracing::debug;

use crate::error::{Result, TiplineError};

pub const PADDED_HEADER_LEN: usize = 4;
const ZSTD_LEVEL: i32 = 3;

/// A blob of exactly `expected_len` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Padded {
    bytes: Vec<u8>,
}

impl Padded {
    pub fn from_bytes(bytes: Vec<u8>, expected_len: usize) -> Result<Self> {
        if bytes.len() != expected_len {
            return Err(TiplineError::InvalidInput(format!(
                "bad padded length: got {} but expected {}",
                bytes.len(),
                expected_len
            )));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl std::fmt::Debug for Padded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Padded").field("len", &self.bytes.len()).finish()
    }
}

pub fn pad(content: &[u8], output_len: usize) -> Result<Padded> {
    let compressed = zstd::encode_all(content, ZSTD_LEVEL)?;
    debug!(
        original = content.len(),
        compressed = compressed.len(),
        "compressed content for padding"
    );
    if compressed.len() + PADDED_HEADER_LEN > output_len {
        return Err(TiplineError::TooLarge {
            size: compressed.len() + PADDED_HEADER_LEN,
            limit: output_len,
        });
    }
    let mut out = Vec::with_capacity(output_len);
    out.put_u32(compressed.len() as u32);
    out.put_slice(&compressed);
    out.resize(output_len, 0);
    Padded::from_bytes(out, output_len)
}

pub fn unpad(padded: &Padded) -> Result<Vec<u8>> {
    let mut buf = padded.as_bytes();
    if buf.remaining() < PADDED_HEADER_LEN {
        return Err(TiplineError::CorruptData("padded blob shorter than header".into()));
    }
    let compressed_len = buf.get_u32() as usize;
    if compressed_len > buf.remaining() {
        return Err(TiplineError::CorruptData(format!(
            "compressed length {compressed_len} exceeds blob"
        )));
    }
    zstd::decode_all(&buf[..compressed_len])
        .map_err(|e| TiplineError::CorruptData(format!("decompress: {e}")))
}
