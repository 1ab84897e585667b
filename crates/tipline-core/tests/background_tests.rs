//! Integration tests for the background cycle and the application facade.
//!
//! Tests cover:
//!  1. An idle cycle sends one dummy the relay marks as cover traffic
//!  2. A queued real message goes out before any dummy
//!  3. The dead-drop lands in the inbound queue and merges on unlock
//!  4. Failed sends keep the message queued
//!  5. create_or_unlock switches stores
//!  6. The dead-drop is acknowledged only after it is queued
//!  7. Tipline::wipe makes the next unlock start empty

use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use tempfile::{tempdir, TempDir};
use tipline_core::config::KdfParams;
use tipline_core::message_cipher::{self, OUTGOING_LEN};
use tipline_core::model::KeyPair;
use tipline_core::secure_box::SecureBox;
use tipline_core::secure_element::MemorySlot;
use tipline_core::{
    ChatMessage, LocalPublicData, Passphrase, RelayApplication, RelayKeys, RemoteContact, Result,
    Session, Tipline, TiplineError,
};

struct FakeRelay {
    keys: KeyPair,
    signing: SigningKey,
    contact: KeyPair,
    deaddrop: Mutex<Vec<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    fail_sends: Mutex<bool>,
    acks: Mutex<usize>,
}

impl FakeRelay {
    fn new() -> Self {
        Self {
            keys: message_cipher::generate_key_pair(),
            signing: SigningKey::generate(&mut rand::rngs::OsRng),
            contact: message_cipher::generate_key_pair(),
            deaddrop: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(false),
            acks: Mutex::new(0),
        }
    }
}

impl RelayApplication for FakeRelay {
    fn download_remote_contacts(&self) -> Result<Vec<RemoteContact>> {
        Ok(vec![RemoteContact {
            id: 10,
            name: "Desk".into(),
            public_key: self.contact.public.clone(),
        }])
    }

    fn download_relay_keys(&self) -> Result<RelayKeys> {
        Ok(RelayKeys {
            public_key: self.keys.public.clone(),
            signing_key: self.signing.verifying_key().to_bytes().to_vec(),
        })
    }

    fn download_deaddrop(&self) -> Result<Vec<Vec<u8>>> {
        Ok(std::mem::take(&mut *self.deaddrop.lock()))
    }

    fn acknowledge_deaddrop(&self) -> Result<()> {
        *self.acks.lock() += 1;
        Ok(())
    }

    fn send_outgoing_message(&self, blob: Vec<u8>) -> Result<()> {
        if *self.fail_sends.lock() {
            return Err(TiplineError::Io(std::io::Error::other("offline")));
        }
        self.sent.lock().push(blob);
        Ok(())
    }
}

fn setup() -> (TempDir, Arc<FakeRelay>, Tipline) {
    let dir = tempdir().unwrap();
    let relay = Arc::new(FakeRelay::new());
    let sbox = SecureBox::new(
        dir.path(),
        "bg",
        Box::new(MemorySlot::new()),
        KdfParams::interactive(),
        4096,
    )
    .unwrap();
    let session = Session::new(sbox, Arc::new(LocalPublicData::in_memory()));
    let tipline = Tipline::new(session, relay.clone());
    tipline.init().unwrap();
    (dir, relay, tipline)
}

#[test]
fn idle_cycle_sends_a_dummy() {
    let (_dir, relay, tipline) = setup();
    tipline.run_background_cycle().unwrap();

    let sent = relay.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), OUTGOING_LEN);
    let opened = message_cipher::relay_open(&relay.keys.secret, &sent[0]).unwrap();
    assert!(!opened.real);
    assert!(tipline.public_data().pending_outgoing().unwrap().is_empty());
    assert!(tipline.next_sync_time().unwrap().unwrap() > Utc::now());
}

#[test]
fn real_message_goes_out_first() {
    let (_dir, relay, tipline) = setup();
    let session = tipline.create_or_unlock(&Passphrase::new("one real message")).unwrap();
    session.send_message(10, ChatMessage::from_me("the tip", Utc::now())).unwrap();

    tipline.run_background_cycle().unwrap();
    tipline.run_background_cycle().unwrap();

    let sent = relay.sent.lock();
    let flags: Vec<bool> = sent
        .iter()
        .map(|p| message_cipher::relay_open(&relay.keys.secret, p).unwrap().real)
        .collect();
    assert_eq!(flags, [true, false]);
}

#[test]
fn deaddrop_merges_on_unlock() {
    let (_dir, relay, tipline) = setup();
    let p = Passphrase::new("wait for reply");
    let session = tipline.create_or_unlock(&p).unwrap();
    session.create_or_get_chat_log(10).unwrap();
    let me = session.public_key().unwrap();
    tipline.lock();
    assert!(matches!(tipline.unlocked_session(), Err(TiplineError::NotUnlocked)));

    let reply = message_cipher::encrypt_reply(&relay.signing, &relay.contact.secret, &me, b"thanks")
        .unwrap();
    relay.deaddrop.lock().push(reply);
    tipline.run_background_cycle().unwrap();
    assert_eq!(tipline.public_data().drain_incoming().unwrap().len(), 1);

    let session = tipline.create_or_unlock(&p).unwrap();
    let logs = session.chat_logs().unwrap();
    assert_eq!(logs[0].messages[0].text, "thanks");
    assert!(tipline.public_data().drain_incoming().unwrap().is_empty());
}

#[test]
fn failed_send_keeps_message_queued() {
    let (_dir, relay, tipline) = setup();
    *relay.fail_sends.lock() = true;
    assert!(tipline.run_background_cycle().is_err());
    assert_eq!(tipline.public_data().pending_outgoing().unwrap().len(), 1);

    *relay.fail_sends.lock() = false;
    tipline.run_background_cycle().unwrap();
    assert_eq!(relay.sent.lock().len(), 1);
    assert!(tipline.public_data().pending_outgoing().unwrap().is_empty());
}

#[test]
fn create_or_unlock_switches_stores() {
    let (_dir, _relay, tipline) = setup();
    let session = tipline.create_or_unlock(&Passphrase::new("first store here")).unwrap();
    session.send_message(10, ChatMessage::from_me("kept", Utc::now())).unwrap();

    let session = tipline.create_or_unlock(&Passphrase::new("second store here")).unwrap();
    assert!(session.raw_chat_logs().unwrap().is_empty());
    assert!(tipline.unlocked_session().is_ok());
}

#[test]
fn deaddrop_is_acknowledged_after_queueing() {
    let (_dir, relay, tipline) = setup();
    relay.deaddrop.lock().push(vec![9; 360]);
    tipline.run_background_cycle().unwrap();
    assert_eq!(*relay.acks.lock(), 1);
    assert_eq!(tipline.public_data().drain_incoming().unwrap(), vec![vec![9; 360]]);

    *relay.fail_sends.lock() = true;
    assert!(tipline.run_background_cycle().is_err());
    assert_eq!(*relay.acks.lock(), 1);
}

#[test]
fn tipline_wipe_starts_over() {
    let (_dir, _relay, tipline) = setup();
    let p = Passphrase::new("wipe via facade");
    let session = tipline.create_or_unlock(&p).unwrap();
    session.send_message(10, ChatMessage::from_me("gone soon", Utc::now())).unwrap();
    let before = session.public_key().unwrap();

    tipline.wipe().unwrap();
    assert!(matches!(tipline.unlocked_session(), Err(TiplineError::NotUnlocked)));

    let session = tipline.create_or_unlock(&p).unwrap();
    assert!(session.raw_chat_logs().unwrap().is_empty());
    assert_ne!(session.public_key().unwrap(), before);
}
