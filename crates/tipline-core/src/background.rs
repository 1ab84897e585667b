//! Application facade and the periodic send/receive cycle.
//!
//! Every cycle sends exactly one message, real or dummy, so the relay sees
//! the same traffic pattern whether or not the store is in use.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::{DEFAULT_SYNC_INTERVAL_SECS, SYNC_INTERVAL_OFF};
use crate::error::{Result, TiplineError};
use crate::message_cipher;
use crate::model::RemoteContact;
use crate::passphrase::Passphrase;
use crate::public_data::PublicData;
use crate::session::{Session, SessionStatus};

/// Relay keys as published by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayKeys {
    pub public_key: Vec<u8>,
    pub signing_key: Vec<u8>,
}

/// Transport hooks supplied by the embedding application.
pub trait RelayApplication: Send + Sync {
    fn download_remote_contacts(&self) -> Result<Vec<RemoteContact>>;
    fn download_relay_keys(&self) -> Result<RelayKeys>;
    /// Signed inbound packets addressed to anyone; recipients trial-decrypt.
    fn download_deaddrop(&self) -> Result<Vec<Vec<u8>>>;
    /// Called once the last dead-drop batch is stored in the inbound queue.
    /// Transports release downloaded packets here, not before.
    fn acknowledge_deaddrop(&self) -> Result<()> {
        Ok(())
    }
    fn send_outgoing_message(&self, blob: Vec<u8>) -> Result<()>;
}

pub struct Tipline {
    session: Session,
    public: Arc<dyn PublicData>,
    app: Arc<dyn RelayApplication>,
    default_interval_secs: i64,
}

impl Tipline {
    pub fn new(session: Session, app: Arc<dyn RelayApplication>) -> Self {
        let public = Arc::clone(session.public_data());
        Self {
            session,
            public,
            app,
            default_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }

    /// Interval applied when background sync is switched on from off.
    pub fn with_default_interval(mut self, secs: i64) -> Self {
        if secs > 0 {
            self.default_interval_secs = secs;
        }
        self
    }

    pub fn public_data(&self) -> &Arc<dyn PublicData> {
        &self.public
    }

    /// Makes sure a store exists, refreshes contacts and relay keys, and
    /// switches background sync on.
    pub fn init(&self) -> Result<()> {
        self.session.ensure_and_touch()?;
        let contacts = self.app.download_remote_contacts()?;
        self.public.sync_remote_contacts(contacts)?;
        let keys = self.app.download_relay_keys()?;
        self.public.set_relay_keys(&keys.public_key, &keys.signing_key)?;
        self.set_background_enabled(true)?;
        info!("tipline initialised");
        Ok(())
    }

    /// Locks any open session, then unlocks with `passphrase`. A passphrase
    /// that opens nothing yields a fresh, empty session.
    pub fn create_or_unlock(&self, passphrase: &Passphrase) -> Result<&Session> {
        self.session.lock();
        self.session.unlock(passphrase)?;
        Ok(&self.session)
    }

    pub fn unlocked_session(&self) -> Result<&Session> {
        if self.session.is_unlocked() {
            Ok(&self.session)
        } else {
            Err(TiplineError::NotUnlocked)
        }
    }

    pub fn lock(&self) {
        self.session.lock();
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn wipe(&self) -> Result<()> {
        self.session.wipe()
    }

    pub fn set_background_enabled(&self, enabled: bool) -> Result<()> {
        let current = self.public.sync_interval_secs()?;
        let next = match (enabled, current > 0) {
            (true, true) => current,
            (true, false) => self.default_interval_secs,
            (false, _) => SYNC_INTERVAL_OFF,
        };
        if next != current {
            self.public.set_sync_interval_secs(next)?;
        }
        debug!(enabled, interval_secs = next, "background sync updated");
        Ok(())
    }

    /// `None` when background sync is off.
    pub fn sync_interval(&self) -> Result<Option<Duration>> {
        let secs = self.public.sync_interval_secs()?;
        Ok((secs > 0).then(|| Duration::seconds(secs)))
    }

    pub fn next_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.public.next_sync_time()
    }

    /// One send/receive round.
    ///
    /// 1. An empty outbox gets a dummy message.
    /// 2. The oldest queued message is handed to the application and removed
    ///    once the application accepts it.
    /// 3. The dead-drop is appended to the inbound queue, then acknowledged.
    /// 4. The next sync time is scheduled when background sync is on.
    pub fn run_background_cycle(&self) -> Result<()> {
        if self.public.pending_outgoing()?.is_empty() {
            let relay_pk = self.public.relay_public_key()?;
            self.public.enqueue_outgoing(message_cipher::create_dummy(&relay_pk)?)?;
        }

        if let Some(oldest) = self.public.pending_outgoing()?.into_iter().next() {
            self.app.send_outgoing_message(oldest)?;
            self.public.dequeue_oldest_outgoing()?;
        }

        let deaddrop = self.app.download_deaddrop()?;
        let received = deaddrop.len();
        self.public.add_incoming(deaddrop)?;
        self.app.acknowledge_deaddrop()?;

        if let Some(interval) = self.sync_interval()? {
            self.public.set_next_sync_time(Utc::now() + interval)?;
        }
        debug!(received, "background cycle complete");
        Ok(())
    }
}
