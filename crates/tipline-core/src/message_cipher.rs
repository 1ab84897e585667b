//! Wire formats between the device, the relay and a contact.
//!
//! Outgoing (device -> relay -> contact), all lengths fixed:
//!
//! ```text
//! inner  = sender_pk(32) | len(1) | message, zero padded to 255    288 bytes
//! sealed to contact                                                336 bytes
//! outer  = flag(1: 1 real, 0 cover) | sealed inner                 337 bytes
//! sealed to relay                                                  385 bytes
//! ```
//!
//! Incoming (contact -> relay -> device):
//!
//! ```text
//! ed25519 signature(64) | nonce(24) | crypto_box(len(1) | message | padding)
//! ```
//!
//! The two directions are intentionally different constructions: outgoing
//! uses anonymous sealed boxes, incoming is an authenticated box that the
//! relay signs after attributing it.

use crypto_box::aead::{Aead, AeadCore};
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{Result, TiplineError};
use crate::model::KeyPair;

pub const KEY_LEN: usize = 32;
pub const MAX_MESSAGE_LEN: usize = 255;
/// Ephemeral public key plus Poly1305 tag.
pub const SEAL_OVERHEAD: usize = 48;
pub const INNER_PLAINTEXT_LEN: usize = KEY_LEN + 1 + MAX_MESSAGE_LEN;
pub const INNER_CIPHERTEXT_LEN: usize = INNER_PLAINTEXT_LEN + SEAL_OVERHEAD;
pub const OUTGOING_LEN: usize = 1 + INNER_CIPHERTEXT_LEN + SEAL_OVERHEAD;

pub const SIGNATURE_LEN: usize = 64;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const INCOMING_PLAINTEXT_LEN: usize = 1 + MAX_MESSAGE_LEN;
pub const INCOMING_LEN: usize = SIGNATURE_LEN + NONCE_LEN + TAG_LEN + INCOMING_PLAINTEXT_LEN;

const FLAG_REAL: u8 = 0x01;
const FLAG_COVER: u8 = 0x00;

pub fn generate_key_pair() -> KeyPair {
    let secret = SecretKey::generate(&mut OsRng);
    KeyPair {
        public: secret.public_key().as_bytes().to_vec(),
        secret: secret.to_bytes().to_vec(),
    }
}

fn public_key(bytes: &[u8], what: &str) -> Result<PublicKey> {
    PublicKey::from_slice(bytes)
        .map_err(|_| TiplineError::InvalidInput(format!("{what}: expected {KEY_LEN} bytes")))
}

fn secret_key(bytes: &[u8], what: &str) -> Result<SecretKey> {
    SecretKey::from_slice(bytes)
        .map_err(|_| TiplineError::InvalidInput(format!("{what}: expected {KEY_LEN} bytes")))
}

/// `len(1) | message | zeros` up to `1 + MAX_MESSAGE_LEN` bytes.
fn length_prefixed(message: &[u8]) -> Result<Vec<u8>> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(TiplineError::InvalidInput(format!(
            "message is {} bytes, maximum is {MAX_MESSAGE_LEN}",
            message.len()
        )));
    }
    let mut out = Vec::with_capacity(1 + MAX_MESSAGE_LEN);
    out.push(message.len() as u8);
    out.extend_from_slice(message);
    out.resize(1 + MAX_MESSAGE_LEN, 0);
    Ok(out)
}

fn strip_length_prefix(plaintext: &[u8]) -> Result<Vec<u8>> {
    let (len, rest) = plaintext
        .split_first()
        .ok_or_else(|| TiplineError::CorruptData("empty plaintext".into()))?;
    let len = *len as usize;
    if len > rest.len() {
        return Err(TiplineError::CorruptData(format!(
            "length {len} exceeds plaintext of {} bytes",
            rest.len()
        )));
    }
    Ok(rest[..len].to_vec())
}

/// Encrypts a message for `recipient_pk`, wrapped for the relay.
pub fn encrypt(
    sender_pk: &[u8],
    relay_pk: &[u8],
    recipient_pk: &[u8],
    message: &[u8],
    real: bool,
) -> Result<Vec<u8>> {
    if sender_pk.len() != KEY_LEN {
        return Err(TiplineError::InvalidInput(format!(
            "sender key: expected {KEY_LEN} bytes"
        )));
    }
    let relay = public_key(relay_pk, "relay key")?;
    let recipient = public_key(recipient_pk, "recipient key")?;

    let mut inner = Vec::with_capacity(INNER_PLAINTEXT_LEN);
    inner.extend_from_slice(sender_pk);
    inner.extend_from_slice(&length_prefixed(message)?);
    let inner_sealed = recipient
        .seal(&mut OsRng, &inner)
        .map_err(|e| TiplineError::InvalidInput(format!("seal inner: {e}")))?;

    let mut outer = Vec::with_capacity(1 + inner_sealed.len());
    outer.push(if real { FLAG_REAL } else { FLAG_COVER });
    outer.extend_from_slice(&inner_sealed);
    let sealed = relay
        .seal(&mut OsRng, &outer)
        .map_err(|e| TiplineError::InvalidInput(format!("seal outer: {e}")))?;
    debug_assert_eq!(sealed.len(), OUTGOING_LEN);
    Ok(sealed)
}

/// Cover traffic: same length as a real message, from a throwaway key pair.
pub fn create_dummy(relay_pk: &[u8]) -> Result<Vec<u8>> {
    let throwaway = generate_key_pair();
    encrypt(&throwaway.public, relay_pk, &throwaway.public, &[], false)
}

/// Verifies the relay signature and opens the box from `sender_pk`.
pub fn decrypt(
    relay_sign_pk: &[u8],
    sender_pk: &[u8],
    recipient_sk: &[u8],
    packet: &[u8],
) -> Result<Vec<u8>> {
    let relay_bytes: [u8; KEY_LEN] = relay_sign_pk
        .try_into()
        .map_err(|_| TiplineError::InvalidInput("relay signing key: expected 32 bytes".into()))?;
    let relay = VerifyingKey::from_bytes(&relay_bytes)
        .map_err(|_| TiplineError::VerificationFailed)?;
    let sender = public_key(sender_pk, "sender key")?;
    let recipient = secret_key(recipient_sk, "recipient key")?;

    if packet.len() < SIGNATURE_LEN {
        return Err(TiplineError::VerificationFailed);
    }
    let (sig_bytes, payload) = packet.split_at(SIGNATURE_LEN);
    let sig_bytes: [u8; SIGNATURE_LEN] = sig_bytes
        .try_into()
        .map_err(|_| TiplineError::VerificationFailed)?;
    relay
        .verify_strict(payload, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| TiplineError::VerificationFailed)?;

    if payload.len() < NONCE_LEN + TAG_LEN {
        return Err(TiplineError::AuthenticationFailed);
    }
    let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
    let plaintext = SalsaBox::new(&sender, &recipient)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| TiplineError::AuthenticationFailed)?;
    strip_length_prefix(&plaintext)
}

// ── Counterpart operations (relay and contact side) ────────────────────────

/// What the relay sees after removing its layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOpened {
    pub real: bool,
    pub inner: Vec<u8>,
}

pub fn relay_open(relay_sk: &[u8], packet: &[u8]) -> Result<RelayOpened> {
    let relay = secret_key(relay_sk, "relay key")?;
    let outer = relay
        .unseal(packet)
        .map_err(|_| TiplineError::AuthenticationFailed)?;
    let (flag, inner) = outer
        .split_first()
        .ok_or_else(|| TiplineError::CorruptData("empty outer payload".into()))?;
    Ok(RelayOpened {
        real: *flag == FLAG_REAL,
        inner: inner.to_vec(),
    })
}

/// Contact side: returns the self-declared sender key and the message.
pub fn recipient_open(recipient_sk: &[u8], inner: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let recipient = secret_key(recipient_sk, "recipient key")?;
    let plaintext = recipient
        .unseal(inner)
        .map_err(|_| TiplineError::AuthenticationFailed)?;
    if plaintext.len() < KEY_LEN + 1 {
        return Err(TiplineError::CorruptData("inner payload too short".into()));
    }
    let (sender_pk, rest) = plaintext.split_at(KEY_LEN);
    Ok((sender_pk.to_vec(), strip_length_prefix(rest)?))
}

/// Contact side reply, signed by the relay signing key.
pub fn encrypt_reply(
    relay_signing_key: &SigningKey,
    sender_sk: &[u8],
    recipient_pk: &[u8],
    message: &[u8],
) -> Result<Vec<u8>> {
    let sender = secret_key(sender_sk, "sender key")?;
    let recipient = public_key(recipient_pk, "recipient key")?;
    let salsa = SalsaBox::new(&recipient, &sender);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = salsa
        .encrypt(&nonce, length_prefixed(message)?.as_slice())
        .map_err(|e| TiplineError::InvalidInput(format!("box: {e}")))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    let signature = relay_signing_key.sign(&payload);

    let mut packet = Vec::with_capacity(SIGNATURE_LEN + payload.len());
    packet.extend_from_slice(&signature.to_bytes());
    packet.extend_from_slice(&payload);
    Ok(packet)
}
