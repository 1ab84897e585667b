//! Binary layout of [`PrivateState`]. All integers big-endian.
//!
//! ```text
//! u32 version
//! u32 len | secret key
//! u32 len | public key
//! u32 chat log count
//!   i64 contact id | i64 last opened (unix secs) | u32 message count
//!     i64 sender (contact id, -1 = me) | i64 unix secs | u32 len | utf-8 text
//! ```
//!
//! Contacts are referenced by id only; names and keys are looked up in the
//! metadata store when needed.

use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};

use crate::error::{Result, TiplineError};
use crate::model::{ChatLog, ChatMessage, KeyPair, PrivateState, Sender};

pub const VERSION: u32 = 2;
pub const SENDER_ME: i64 = -1;

pub fn save(state: &PrivateState) -> Result<Vec<u8>> {
    state.assert_invariants()?;
    let mut out = Vec::new();
    out.put_u32(VERSION);
    put_bytes(&mut out, &state.key_pair.secret)?;
    put_bytes(&mut out, &state.key_pair.public)?;
    out.put_u32(len_u32(state.chat_logs.len())?);
    for log in &state.chat_logs {
        out.put_i64(log.contact_id);
        out.put_i64(log.last_opened.timestamp());
        out.put_u32(len_u32(log.messages.len())?);
        for message in &log.messages {
            let sender = match message.sender {
                Sender::Me => SENDER_ME,
                Sender::Contact(id) => id,
            };
            out.put_i64(sender);
            out.put_i64(message.timestamp.timestamp());
            put_bytes(&mut out, message.text.as_bytes())?;
        }
    }
    Ok(out)
}

pub fn load(bytes: &[u8]) -> Result<PrivateState> {
    let mut buf = bytes;
    let version = get_u32(&mut buf)?;
    if version != VERSION {
        return Err(TiplineError::CorruptData(format!(
            "unsupported version {version}, expected {VERSION}"
        )));
    }
    let secret = get_bytes(&mut buf)?;
    let public = get_bytes(&mut buf)?;
    let log_count = get_u32(&mut buf)?;

    let mut chat_logs = Vec::new();
    for _ in 0..log_count {
        let contact_id = get_i64(&mut buf)?;
        let last_opened = timestamp(get_i64(&mut buf)?)?;
        let message_count = get_u32(&mut buf)?;
        let mut messages = Vec::new();
        for _ in 0..message_count {
            let sender = match get_i64(&mut buf)? {
                SENDER_ME => Sender::Me,
                id => Sender::Contact(id),
            };
            let ts = timestamp(get_i64(&mut buf)?)?;
            let text = String::from_utf8(get_bytes(&mut buf)?)
                .map_err(|e| TiplineError::CorruptData(format!("message text: {e}")))?;
            messages.push(ChatMessage::new(sender, text, ts));
        }
        chat_logs.push(ChatLog {
            contact_id,
            messages,
            last_opened,
        });
    }

    let state = PrivateState {
        chat_logs,
        key_pair: KeyPair { secret, public },
    };
    state.assert_invariants()?;
    Ok(state)
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| TiplineError::InvalidInput(format!("length {len} too large")))
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    out.put_u32(len_u32(bytes.len())?);
    out.put_slice(bytes);
    Ok(())
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(TiplineError::CorruptData(format!(
            "need {needed} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| TiplineError::CorruptData(format!("timestamp {secs} out of range")))
}
