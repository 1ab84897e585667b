use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, TiplineError};

pub type ContactId = i64;

/// A contact record owned by the metadata store. Re-adding an id replaces
/// name and key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteContact {
    pub id: ContactId,
    pub name: String,
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    Me,
    Contact(ContactId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Timestamps are kept at whole seconds, the precision of the store.
    pub fn new(sender: Sender, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: timestamp.trunc_subsecs(0),
        }
    }

    pub fn from_me(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(Sender::Me, text, timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLog {
    pub contact_id: ContactId,
    pub messages: Vec<ChatMessage>,
    pub last_opened: DateTime<Utc>,
}

impl ChatLog {
    /// Empty log that has never been opened.
    pub fn new(contact_id: ContactId) -> Self {
        Self {
            contact_id,
            messages: Vec::new(),
            last_opened: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn has_unread_message(&self) -> bool {
        self.messages.iter().any(|m| m.timestamp > self.last_opened)
    }

    pub fn with_added_message(&self, message: ChatMessage) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        Self {
            contact_id: self.contact_id,
            messages,
            last_opened: self.last_opened,
        }
    }

    pub fn with_marked_opened(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            contact_id: self.contact_id,
            messages: self.messages.clone(),
            last_opened: timestamp.trunc_subsecs(0),
        }
    }
}

/// A chat log joined with its contact record at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLogView {
    pub contact: RemoteContact,
    pub messages: Vec<ChatMessage>,
    pub last_opened: DateTime<Utc>,
}

impl ChatLogView {
    pub fn has_unread_message(&self) -> bool {
        self.messages.iter().any(|m| m.timestamp > self.last_opened)
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    pub secret: Vec<u8>,
    pub public: Vec<u8>,
}

impl KeyPair {
    pub fn empty() -> Self {
        Self {
            secret: Vec::new(),
            public: Vec::new(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(&self.public))
            .finish_non_exhaustive()
    }
}

/// Decrypted state. Replaced wholesale on every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateState {
    pub chat_logs: Vec<ChatLog>,
    pub key_pair: KeyPair,
}

impl PrivateState {
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            chat_logs: Vec::new(),
            key_pair,
        }
    }

    pub fn empty() -> Self {
        Self::new(KeyPair::empty())
    }

    /// At most one chat log per contact.
    pub fn assert_invariants(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for log in &self.chat_logs {
            if !seen.insert(log.contact_id) {
                return Err(TiplineError::CorruptData(format!(
                    "duplicate chat log for contact {}",
                    log.contact_id
                )));
            }
        }
        Ok(())
    }

    pub fn chat_log(&self, contact_id: ContactId) -> Option<&ChatLog> {
        self.chat_logs.iter().find(|l| l.contact_id == contact_id)
    }

    /// Copy with `message` appended to the contact's log, creating the log
    /// if needed.
    pub fn with_added_message(&self, contact_id: ContactId, message: ChatMessage) -> Self {
        let mut next = self.with_chat_log(contact_id);
        if let Some(log) = next.chat_logs.iter_mut().find(|l| l.contact_id == contact_id) {
            *log = log.with_added_message(message);
        }
        next
    }

    /// Copy guaranteed to hold a log for `contact_id`.
    pub fn with_chat_log(&self, contact_id: ContactId) -> Self {
        let mut next = self.clone();
        if next.chat_log(contact_id).is_none() {
            next.chat_logs.push(ChatLog::new(contact_id));
        }
        next
    }

    pub fn with_marked_opened(&self, contact_id: ContactId, timestamp: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if let Some(log) = next.chat_logs.iter_mut().find(|l| l.contact_id == contact_id) {
            *log = log.with_marked_opened(timestamp);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn added_messages_keep_order_and_create_logs() {
        let state = PrivateState::empty()
            .with_added_message(1, ChatMessage::from_me("a1", at(100)))
            .with_added_message(2, ChatMessage::from_me("b1", at(101)))
            .with_added_message(1, ChatMessage::from_me("a2", at(102)));
        assert_eq!(state.chat_logs.len(), 2);
        let texts: Vec<_> = state.chat_log(1).unwrap().messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["a1", "a2"]);
        state.assert_invariants().unwrap();
    }

    #[test]
    fn copy_on_write_leaves_original_untouched() {
        let before = PrivateState::empty().with_chat_log(5);
        let after = before.with_added_message(5, ChatMessage::from_me("x", at(1)));
        assert!(before.chat_log(5).unwrap().messages.is_empty());
        assert_eq!(after.chat_log(5).unwrap().messages.len(), 1);
    }

    #[test]
    fn duplicate_logs_violate_invariants() {
        let mut state = PrivateState::empty();
        state.chat_logs.push(ChatLog::new(3));
        state.chat_logs.push(ChatLog::new(3));
        assert!(matches!(state.assert_invariants(), Err(TiplineError::CorruptData(_))));
    }

    #[test]
    fn unread_tracking() {
        let log = ChatLog::new(1).with_added_message(ChatMessage::new(Sender::Contact(1), "hi", at(50)));
        assert!(log.has_unread_message());
        assert!(!log.with_marked_opened(at(60)).has_unread_message());
        assert!(log.with_marked_opened(at(40)).has_unread_message());
    }

    #[test]
    fn timestamps_are_truncated_to_seconds() {
        let ts = Utc.timestamp_opt(10, 999_000_000).unwrap();
        assert_eq!(ChatMessage::from_me("t", ts).timestamp, at(10));
    }

    #[test]
    fn key_pair_debug_hides_secret() {
        let kp = KeyPair {
            secret: vec![0xaa; 4],
            public: vec![0xbb; 4],
        };
        let dbg = format!("{kp:?}");
        assert!(dbg.contains("bbbbbbbb"));
        assert!(!dbg.contains("aaaaaaaa"));
    }
}
