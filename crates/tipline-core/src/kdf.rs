//! Passphrase to symmetric key derivation (Argon2id).
//!
//! The salt is fixed for the whole application. Security rests on the
//! passphrase entropy, and a fixed salt keeps derivation deterministic
//! without storing anything next to the blob.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use crate::config::KdfParams;
use crate::error::{Result, TiplineError};

pub const KDF_SALT: &[u8; 16] = b"TIPLINE_KDF_SALT";

/// Derive `output_len` bytes from `passphrase` at the moderate cost tier.
pub fn derive_key(passphrase: &str, output_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    derive_key_with(&KdfParams::moderate(), passphrase, output_len)
}

pub fn derive_key_with(
    params: &KdfParams,
    passphrase: &str,
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    if passphrase.is_empty() {
        return Err(TiplineError::InvalidInput("passphrase must not be empty".into()));
    }
    if output_len == 0 {
        return Err(TiplineError::InvalidInput("output length must be positive".into()));
    }
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(output_len),
    )
    .map_err(|e| TiplineError::InvalidInput(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new(vec![0u8; output_len]);
    argon
        .hash_password_into(passphrase.as_bytes(), KDF_SALT, &mut key)
        .map_err(|e| TiplineError::InvalidInput(format!("argon2 derive: {e}")))?;
    Ok(key)
}
