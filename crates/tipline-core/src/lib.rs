//! tipline-core: deniable tip-line storage and message encryption
//!
//! # Design principles
//! - The private store is one fixed-size blob that always exists; its
//!   presence and size say nothing about whether it holds real data.
//! - A wrong passphrase is indistinguishable from a fresh store.
//! - Outgoing messages are fixed-length and mixed with dummies.
//!
//! # Module layout
//! - `passphrase`      wordlist passphrases, generation and normalisation
//! - `kdf`             Argon2id key derivation
//! - `stream_cipher`   AES-256-CTR layer keyed from the passphrase
//! - `secure_element`  AES-256-GCM layer keyed from a platform key slot
//! - `record_store`    small named records (IVs) beside the blob
//! - `padding`         compress and pad to the blob size
//! - `secure_box`      the two-layer encrypted blob on disk
//! - `model`           chat logs, messages, key pair, private state
//! - `serializer`      binary encoding of the private state
//! - `message_cipher`  relay-wrapped outgoing and signed incoming messages
//! - `public_data`     contacts, relay keys, queues and sync timers
//! - `session`         Absent / Locked / Unlocked state machine
//! - `background`      application facade and send/receive cycle
//! - `config`, `paths` settings file and on-disk locations
//! - `error`           unified error type

pub mod background;
pub mod config;
pub mod error;
pub mod kdf;
pub mod message_cipher;
pub mod model;
pub mod padding;
pub mod passphrase;
pub mod paths;
pub mod public_data;
pub mod record_store;
pub mod secure_box;
pub mod secure_element;
pub mod serializer;
pub mod session;
pub mod stream_cipher;

pub use background::{RelayApplication, RelayKeys, Tipline};
pub use config::{KdfParams, TiplineConfig};
pub use error::{Result, TiplineError};
pub use model::{ChatLog, ChatLogView, ChatMessage, ContactId, RemoteContact, Sender};
pub use passphrase::{Passphrase, PassphraseGenerator};
pub use public_data::{LocalPublicData, PublicData};
pub use session::{Session, SessionStatus};
