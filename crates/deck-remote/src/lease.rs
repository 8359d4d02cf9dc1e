//! Lease — distributed mutual exclusion over a stored record.
//!
//! ```text
//! Free ──acquire──▶ Held(A) ──renew──▶ Held(A)
//!   ▲                  │
//!   └──release / TTL───┘
//! Held(A) ──acquire by B (only once A expired)──▶ Held(B)
//! ```
//!
//! Every transition is a conditional write against the token the lease
//! was read or written at, so two processes can never both observe a
//! successful acquire of the same live record.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deck_core::Clock;
use deck_store::{ConfigStore, StoreError, VersionToken};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RemoteConfigError, RemoteConfigResult};

/// Store key prefix for lease records.
pub const LEASE_KEY_PREFIX: &str = "leases";

/// Who is holding (or asking for) a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHolder {
    pub username: String,
    pub hostname: String,
    pub pid: u32,
}

impl LeaseHolder {
    pub fn new(username: &str, hostname: &str, pid: u32) -> Self {
        Self {
            username: username.to_string(),
            hostname: hostname.to_string(),
            pid,
        }
    }

    /// Identity of the running process.
    pub fn current() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            username,
            hostname,
            pid: std::process::id(),
        }
    }

    /// `user@host:pid`, the string stored as `holderIdentity`.
    pub fn identity(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LeaseHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.pid)
    }
}

/// The stored lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub namespace: String,
    pub name: String,
    /// `None` once released.
    pub holder_identity: Option<String>,
    pub duration_seconds: u64,
    pub acquire_time: u64,
    pub renew_time: u64,
    /// Filled from the store's version token on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl LeaseRecord {
    pub fn expires_at(&self) -> u64 {
        self.renew_time.saturating_add(self.duration_seconds)
    }

    /// Held and not yet past its TTL.
    pub fn is_live(&self, now: u64) -> bool {
        self.holder_identity.is_some() && self.expires_at() > now
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity.as_deref() == Some(identity)
    }
}

/// Handle on one lease for one holder.
pub struct Lease<S> {
    store: S,
    clock: Arc<dyn Clock>,
    namespace: String,
    name: String,
    holder: LeaseHolder,
    duration: Duration,
    /// Token of this handle's last successful write while holding.
    token: Option<VersionToken>,
}

impl<S: ConfigStore> Lease<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        namespace: &str,
        name: &str,
        holder: LeaseHolder,
        duration: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            namespace: namespace.to_string(),
            name: name.to_string(),
            holder,
            duration,
            token: None,
        }
    }

    pub fn key(&self) -> String {
        format!("{LEASE_KEY_PREFIX}/{}/{}", self.namespace, self.name)
    }

    pub fn holder(&self) -> &LeaseHolder {
        &self.holder
    }

    /// Whether this handle believes it holds the lease.
    pub fn is_acquired(&self) -> bool {
        self.token.is_some()
    }

    /// Current record, if one was ever written.
    pub fn status(&self) -> RemoteConfigResult<Option<LeaseRecord>> {
        Ok(self.read_record()?.map(|(record, _)| record))
    }

    /// Take the lease, or confirm this holder already has it.
    ///
    /// Fails with `LeaseHeldByOther` while a different holder's record is live.
    pub fn acquire(&mut self) -> RemoteConfigResult<()> {
        let identity = self.holder.identity();
        let now = self.clock.now();

        let (acquire_time, expected) = match self.read_record()? {
            None => (now, None),
            Some((record, token)) => {
                let live = record.is_live(now);
                let ours = record.is_held_by(&identity);
                if live && !ours {
                    return Err(self.held_by_other(&record));
                }
                let acquire_time = if live { record.acquire_time } else { now };
                (acquire_time, Some(token))
            }
        };

        let record = LeaseRecord {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            holder_identity: Some(identity.clone()),
            duration_seconds: self.duration.as_secs(),
            acquire_time,
            renew_time: now,
            resource_version: None,
        };

        match self.write_record(&record, expected.as_ref()) {
            Ok(token) => {
                info!(lease = %self.key(), holder = %identity, "lease acquired");
                self.token = Some(token);
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                // Someone wrote between our read and write; report the winner.
                self.token = None;
                let winner = self.read_record()?.map(|(record, _)| record);
                match winner {
                    Some(record) if record.holder_identity.is_some() => Err(self.held_by_other(&record)),
                    _ => Err(RemoteConfigError::LeaseHeldByOther {
                        lease: self.key(),
                        holder: "unknown".to_string(),
                        expires_at: now,
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`Lease::acquire`], but a live foreign lease yields `false`.
    pub fn try_acquire(&mut self) -> RemoteConfigResult<bool> {
        match self.acquire() {
            Ok(()) => Ok(true),
            Err(RemoteConfigError::LeaseHeldByOther { holder, .. }) => {
                debug!(lease = %self.key(), %holder, "lease busy");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Extend the lease. Fails with `LeaseLost` if anyone else wrote the
    /// record since this handle last did, or if its TTL already ran out.
    pub fn renew(&mut self) -> RemoteConfigResult<()> {
        let Some(token) = self.token.clone() else {
            return Err(self.lost("lease is not held by this handle"));
        };
        let identity = self.holder.identity();

        let record = match self.read_record()? {
            Some((record, current)) if current == token && record.is_held_by(&identity) => record,
            Some((record, _)) => {
                self.token = None;
                let by = record.holder_identity.as_deref().unwrap_or("nobody");
                return Err(self.lost(&format!("record rewritten, now held by {by}")));
            }
            None => {
                self.token = None;
                return Err(self.lost("record disappeared"));
            }
        };

        let now = self.clock.now();
        if !record.is_live(now) {
            self.token = None;
            return Err(self.lost(&format!("expired at {}", record.expires_at())));
        }

        let renewed = LeaseRecord {
            renew_time: now,
            resource_version: None,
            ..record
        };
        match self.write_record(&renewed, Some(&token)) {
            Ok(next) => {
                debug!(lease = %self.key(), expires_at = renewed.expires_at(), "lease renewed");
                self.token = Some(next);
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                self.token = None;
                Err(self.lost("record rewritten during renewal"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Give the lease up. A no-op unless this holder still holds it.
    pub fn release(&mut self) -> RemoteConfigResult<()> {
        self.token = None;
        let identity = self.holder.identity();

        let Some((record, token)) = self.read_record()? else {
            return Ok(());
        };
        if !record.is_held_by(&identity) {
            debug!(lease = %self.key(), "release skipped, not the holder");
            return Ok(());
        }

        let released = LeaseRecord {
            holder_identity: None,
            resource_version: None,
            ..record
        };
        match self.write_record(&released, Some(&token)) {
            Ok(_) => {
                info!(lease = %self.key(), holder = %identity, "lease released");
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                warn!(lease = %self.key(), "lease changed hands before release");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_record(&self) -> RemoteConfigResult<Option<(LeaseRecord, VersionToken)>> {
        let Some(stored) = self.store.read(&self.key())? else {
            return Ok(None);
        };
        let mut record: LeaseRecord = serde_json::from_slice(&stored.bytes)?;
        record.resource_version = Some(stored.token.to_string());
        Ok(Some((record, stored.token)))
    }

    fn write_record(
        &self,
        record: &LeaseRecord,
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, StoreError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| StoreError::Write(format!("encode lease record: {e}")))?;
        self.store.write(&self.key(), &bytes, expected)
    }

    fn held_by_other(&self, record: &LeaseRecord) -> RemoteConfigError {
        RemoteConfigError::LeaseHeldByOther {
            lease: self.key(),
            holder: record.holder_identity.clone().unwrap_or_default(),
            expires_at: record.expires_at(),
        }
    }

    fn lost(&self, reason: &str) -> RemoteConfigError {
        warn!(lease = %self.key(), %reason, "lease lost");
        RemoteConfigError::LeaseLost {
            lease: self.key(),
            reason: reason.to_string(),
        }
    }
}

/// Holds a lease for a scope and releases it when dropped.
pub struct LeaseGuard<S: ConfigStore> {
    lease: Lease<S>,
}

impl<S: ConfigStore> LeaseGuard<S> {
    pub fn acquire(mut lease: Lease<S>) -> RemoteConfigResult<Self> {
        lease.acquire()?;
        Ok(Self { lease })
    }

    pub fn renew(&mut self) -> RemoteConfigResult<()> {
        self.lease.renew()
    }

    pub fn lease(&self) -> &Lease<S> {
        &self.lease
    }

    /// Release now and report the outcome instead of logging it.
    pub fn release(mut self) -> RemoteConfigResult<()> {
        self.lease.release()
    }
}

impl<S: ConfigStore> Drop for LeaseGuard<S> {
    fn drop(&mut self) {
        if !self.lease.is_acquired() {
            return;
        }
        if let Err(e) = self.lease.release() {
            warn!(lease = %self.lease.key(), error = %e, "failed to release lease");
        }
    }
}
