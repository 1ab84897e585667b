//! The private data session: Absent -> Locked -> Unlocked.
//!
//! One mutex covers every operation. Each mutation builds a new
//! [`PrivateState`], writes the whole thing through the secure box and only
//! then replaces the in-memory copy.
//!
//! A passphrase that does not open the store is not an error. The store is
//! wiped and a fresh, empty one is created under that passphrase, so an
//! observer cannot tell a decoy passphrase from a real one with no history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::TiplineConfig;
use crate::error::{Result, TiplineError};
use crate::message_cipher;
use crate::model::{ChatLog, ChatLogView, ChatMessage, ContactId, PrivateState, RemoteContact, Sender};
use crate::padding::{self, Padded};
use crate::passphrase::{Passphrase, PassphraseGenerator};
use crate::public_data::PublicData;
use crate::secure_box::SecureBox;
use crate::secure_element::KeySlot;
use crate::serializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Absent,
    Locked,
    Unlocked,
}

struct Unlocked {
    state: PrivateState,
    passphrase: Passphrase,
}

pub struct Session {
    sbox: SecureBox,
    public: Arc<dyn PublicData>,
    generator: PassphraseGenerator,
    hidden_passphrase_words: usize,
    unlocked: Mutex<Option<Unlocked>>,
}

impl Session {
    pub fn new(sbox: SecureBox, public: Arc<dyn PublicData>) -> Self {
        Self {
            sbox,
            public,
            generator: PassphraseGenerator::new(),
            hidden_passphrase_words: crate::passphrase::DEFAULT_WORDS,
            unlocked: Mutex::new(None),
        }
    }

    /// Builds the secure box described by `config` and wraps it.
    pub fn open(
        config: &TiplineConfig,
        slot: Box<dyn KeySlot>,
        public: Arc<dyn PublicData>,
    ) -> Result<Self> {
        let data_dir = config.resolved_data_dir()?;
        let sbox = SecureBox::new(&data_dir, &config.namespace, slot, config.kdf, config.blob_len)?;
        let mut session = Self::new(sbox, public);
        session.hidden_passphrase_words = config.passphrase_words.max(1);
        Ok(session)
    }

    pub fn public_data(&self) -> &Arc<dyn PublicData> {
        &self.public
    }

    pub fn status(&self) -> SessionStatus {
        let guard = self.unlocked.lock();
        if guard.is_some() {
            SessionStatus::Unlocked
        } else if self.sbox.exists() {
            SessionStatus::Locked
        } else {
            SessionStatus::Absent
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.lock().is_some()
    }

    pub fn exists(&self) -> bool {
        self.sbox.exists()
    }

    /// Guarantees a store exists, creating one under a random passphrase
    /// nobody is told, and refreshes its mtime.
    pub fn ensure_and_touch(&self) -> Result<()> {
        let _guard = self.unlocked.lock();
        if !self.sbox.exists() {
            let hidden = self.generator.generate(self.hidden_passphrase_words)?;
            self.create_new(&hidden)?;
            debug!("created initial store");
        }
        self.sbox.touch()
    }

    /// Idempotent. Never reports a wrong passphrase; see module docs.
    pub fn unlock(&self, passphrase: &Passphrase) -> Result<()> {
        let mut guard = self.unlocked.lock();
        if guard.is_some() {
            return Ok(());
        }
        if !self.sbox.exists() {
            self.create_new(passphrase)?;
        }
        let state = match self.load(passphrase) {
            Ok(state) => state,
            Err(TiplineError::AuthenticationFailed) => {
                self.sbox.wipe()?;
                self.create_new(passphrase)?;
                self.load(passphrase)?
            }
            Err(e) => return Err(e),
        };
        let mut unlocked = Unlocked {
            state,
            passphrase: passphrase.clone(),
        };
        self.merge_pending(&mut unlocked)?;
        *guard = Some(unlocked);
        info!("session unlocked");
        Ok(())
    }

    /// Drops the in-memory state and resets the hardware key. The next
    /// unlock starts from an empty store whatever the passphrase.
    pub fn wipe(&self) -> Result<()> {
        let mut guard = self.unlocked.lock();
        *guard = None;
        self.sbox.wipe()
    }

    pub fn lock(&self) {
        if self.unlocked.lock().take().is_some() {
            info!("session locked");
        }
    }

    pub fn send_message(&self, contact_id: ContactId, message: ChatMessage) -> Result<()> {
        if message.sender != Sender::Me {
            return Err(TiplineError::InvalidInput(
                "outgoing messages must be sent by me".into(),
            ));
        }
        let mut guard = self.unlocked.lock();
        let unlocked = guard.as_mut().ok_or(TiplineError::NotUnlocked)?;

        let contact = self.public.get_contact(contact_id)?;
        let relay_pk = self.public.relay_public_key()?;
        let ciphertext = message_cipher::encrypt(
            &unlocked.state.key_pair.public,
            &relay_pk,
            &contact.public_key,
            message.text.as_bytes(),
            true,
        )?;
        let next = unlocked.state.with_added_message(contact_id, message);

        // persisted before queueing, so the outbox never holds a message
        // the chat log lacks
        self.save(&next, &unlocked.passphrase)?;
        if let Err(e) = self.public.enqueue_outgoing(ciphertext) {
            self.save(&unlocked.state, &unlocked.passphrase)?;
            return Err(e);
        }
        unlocked.state = next;
        debug!(contact_id, "message queued");
        Ok(())
    }

    /// Trial-decrypts every queued inbound message against every contact
    /// with a chat log. Returns how many were merged.
    pub fn process_pending_sync(&self) -> Result<usize> {
        let mut guard = self.unlocked.lock();
        let unlocked = guard.as_mut().ok_or(TiplineError::NotUnlocked)?;
        self.merge_pending(unlocked)
    }

    /// Same as [`process_pending_sync`](Self::process_pending_sync), for
    /// manual triggering.
    pub fn force_sync(&self) -> Result<usize> {
        self.process_pending_sync()
    }

    pub fn create_or_get_chat_log(&self, contact_id: ContactId) -> Result<ChatLog> {
        let mut guard = self.unlocked.lock();
        let unlocked = guard.as_mut().ok_or(TiplineError::NotUnlocked)?;
        if let Some(log) = unlocked.state.chat_log(contact_id) {
            return Ok(log.clone());
        }
        self.public.get_contact(contact_id)?;
        let next = unlocked.state.with_chat_log(contact_id);
        self.save(&next, &unlocked.passphrase)?;
        unlocked.state = next;
        Ok(ChatLog::new(contact_id))
    }

    pub fn mark_chat_log_opened(&self, contact_id: ContactId, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.unlocked.lock();
        let unlocked = guard.as_mut().ok_or(TiplineError::NotUnlocked)?;
        if unlocked.state.chat_log(contact_id).is_none() {
            return Err(TiplineError::NotFound(format!("chat log for contact {contact_id}")));
        }
        let next = unlocked.state.with_marked_opened(contact_id, at);
        self.save(&next, &unlocked.passphrase)?;
        unlocked.state = next;
        Ok(())
    }

    /// Chat logs in storage order, without contact resolution.
    pub fn raw_chat_logs(&self) -> Result<Vec<ChatLog>> {
        let guard = self.unlocked.lock();
        let unlocked = guard.as_ref().ok_or(TiplineError::NotUnlocked)?;
        Ok(unlocked.state.chat_logs.clone())
    }

    /// Chat logs joined with their contact records. Logs whose contact is no
    /// longer known are skipped.
    pub fn chat_logs(&self) -> Result<Vec<ChatLogView>> {
        let logs = self.raw_chat_logs()?;
        let mut views = Vec::with_capacity(logs.len());
        for log in logs {
            match self.public.get_contact(log.contact_id) {
                Ok(contact) => views.push(ChatLogView {
                    contact,
                    messages: log.messages,
                    last_opened: log.last_opened,
                }),
                Err(TiplineError::NotFound(_)) => {
                    warn!(contact_id = log.contact_id, "chat log without contact record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(views)
    }

    /// The session's own public key, which contacts encrypt replies to.
    pub fn public_key(&self) -> Result<Vec<u8>> {
        let guard = self.unlocked.lock();
        let unlocked = guard.as_ref().ok_or(TiplineError::NotUnlocked)?;
        Ok(unlocked.state.key_pair.public.clone())
    }

    // ── internals, called with the lock held ────────────────────────────────

    fn create_new(&self, passphrase: &Passphrase) -> Result<()> {
        let state = PrivateState::new(message_cipher::generate_key_pair());
        self.save(&state, passphrase)
    }

    fn load(&self, passphrase: &Passphrase) -> Result<PrivateState> {
        let padded = self.sbox.load(passphrase)?;
        let content = padding::unpad(&padded)?;
        serializer::load(&content)
    }

    fn encode(&self, state: &PrivateState) -> Result<Padded> {
        let content = serializer::save(state)?;
        padding::pad(&content, self.sbox.blob_len())
    }

    fn save(&self, state: &PrivateState, passphrase: &Passphrase) -> Result<()> {
        let padded = self.encode(state)?;
        self.sbox.store(&padded, passphrase)
    }

    fn merge_pending(&self, unlocked: &mut Unlocked) -> Result<usize> {
        let incoming = self.public.drain_incoming()?;
        let mut next = unlocked.state.clone();
        let mut padded = None;
        let mut merged = 0;
        let mut dropped = 0;
        let mut overflow = 0;

        if !incoming.is_empty() {
            let relay_sign_pk = match self.public.relay_signing_key() {
                Ok(key) => Some(key),
                Err(TiplineError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            let contacts = self.known_contacts(&unlocked.state)?;
            let now = Utc::now();

            for blob in &incoming {
                let decoded = relay_sign_pk.as_deref().and_then(|relay| {
                    contacts.iter().find_map(|contact| {
                        message_cipher::decrypt(
                            relay,
                            &contact.public_key,
                            &unlocked.state.key_pair.secret,
                            blob,
                        )
                        .ok()
                        .map(|bytes| (contact.id, bytes))
                    })
                });
                let Some((contact_id, bytes)) = decoded else {
                    dropped += 1;
                    continue;
                };
                // once the store is full the rest of the batch is dropped
                if overflow > 0 {
                    overflow += 1;
                    continue;
                }
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let message = ChatMessage::new(Sender::Contact(contact_id), text, now);
                let candidate = next.with_added_message(contact_id, message);
                match self.encode(&candidate) {
                    Ok(encoded) => {
                        next = candidate;
                        padded = Some(encoded);
                        merged += 1;
                    }
                    Err(TiplineError::TooLarge { .. }) => overflow += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        let padded = match padded {
            Some(padded) => padded,
            None => self.encode(&next)?,
        };
        self.sbox.store(&padded, &unlocked.passphrase)?;
        self.public.clear_incoming()?;
        unlocked.state = next;
        debug!(merged, dropped, overflow, "pending sync processed");
        Ok(merged)
    }

    fn known_contacts(&self, state: &PrivateState) -> Result<Vec<RemoteContact>> {
        let mut contacts = Vec::with_capacity(state.chat_logs.len());
        for log in &state.chat_logs {
            match self.public.get_contact(log.contact_id) {
                Ok(contact) => contacts.push(contact),
                Err(TiplineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KdfParams;
    use crate::public_data::LocalPublicData;
    use crate::secure_element::MemorySlot;
    use tempfile::tempdir;

    fn session(dir: &std::path::Path) -> Session {
        let sbox = SecureBox::new(dir, "session", Box::new(MemorySlot::new()), KdfParams::interactive(), 4096).unwrap();
        Session::new(sbox, Arc::new(LocalPublicData::in_memory()))
    }

    #[test]
    fn ensure_and_touch_creates_locked_store() {
        let dir = tempdir().unwrap();
        let s = session(dir.path());
        assert_eq!(s.status(), SessionStatus::Absent);
        s.ensure_and_touch().unwrap();
        assert_eq!(s.status(), SessionStatus::Locked);
        assert!(!s.is_unlocked());
    }

    #[test]
    fn operations_require_unlock() {
        let dir = tempdir().unwrap();
        let s = session(dir.path());
        s.ensure_and_touch().unwrap();
        assert!(matches!(s.raw_chat_logs(), Err(TiplineError::NotUnlocked)));
        assert!(matches!(s.process_pending_sync(), Err(TiplineError::NotUnlocked)));
        assert!(matches!(
            s.send_message(1, ChatMessage::from_me("x", Utc::now())),
            Err(TiplineError::NotUnlocked)
        ));
    }

    #[test]
    fn unlock_is_idempotent_and_lock_clears() {
        let dir = tempdir().unwrap();
        let s = session(dir.path());
        s.ensure_and_touch().unwrap();
        let p = Passphrase::new("one two three");
        s.unlock(&p).unwrap();
        let key = s.public_key().unwrap();
        s.unlock(&Passphrase::new("something else")).unwrap();
        assert_eq!(s.public_key().unwrap(), key);
        s.lock();
        assert_eq!(s.status(), SessionStatus::Locked);
    }

    #[test]
    fn unlock_on_absent_store_creates_it() {
        let dir = tempdir().unwrap();
        let s = session(dir.path());
        s.unlock(&Passphrase::new("fresh start here")).unwrap();
        assert!(s.exists());
        assert!(s.raw_chat_logs().unwrap().is_empty());
    }

    #[test]
    fn send_rejects_messages_not_from_me() {
        let dir = tempdir().unwrap();
        let s = session(dir.path());
        s.unlock(&Passphrase::new("a b c")).unwrap();
        let msg = ChatMessage::new(Sender::Contact(1), "spoof", Utc::now());
        assert!(matches!(s.send_message(1, msg), Err(TiplineError::InvalidInput(_))));
    }
}
