//! Cross-process lock manager.
//!
//! The lock is a single row in the target database with a TTL judged by the
//! database clock. There is no heartbeat: a crashed holder stops renewing and
//! the row expires on its own. Re-acquiring as the same holder extends the
//! expiry and keeps the original token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MigrateError, MigrateResult};
use crate::events::{Event, EventSink};
use crate::history::{HistoryStore, LockAttempt, LockRelease};

/// How often an insert is retried when the row vanishes mid-acquire.
const VANISHED_RETRIES: usize = 3;

/// The singleton lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Actor holding the lock.
    pub holder: String,
    /// Opaque value identifying this acquisition; required to release.
    pub token: String,
    /// When the current holder first acquired it.
    pub acquired_at: DateTime<Utc>,
    /// When it stops protecting anything.
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    /// Expired relative to `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Expired according to the local clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Read-only view of the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LockStatus {
    /// No unexpired lock exists.
    Free,
    /// Someone holds the lock.
    Held {
        holder: String,
        acquired_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl LockStatus {
    /// Whether nobody holds the lock.
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

/// A successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// The lock as stored after acquisition.
    pub lock: Lock,
    /// The caller already held the lock; only the expiry moved.
    pub renewed: bool,
}

/// Generate a fresh acquisition token.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Acquire, release, and inspect the lock through a [`HistoryStore`].
pub struct LockManager<'a> {
    store: &'a dyn HistoryStore,
    events: &'a dyn EventSink,
}

impl<'a> LockManager<'a> {
    /// Create a manager over `store`, reporting to `events`.
    pub fn new(store: &'a dyn HistoryStore, events: &'a dyn EventSink) -> Self {
        Self { store, events }
    }

    /// Acquire the lock for `actor`.
    ///
    /// Succeeds when no unexpired lock exists or when `actor` already holds
    /// it. Contention is reported as [`MigrateError::LockAcquire`] and never
    /// retried here.
    pub async fn acquire(&self, actor: &str, ttl: Duration) -> MigrateResult<Lock> {
        Ok(self.acquire_grant(actor, ttl).await?.lock)
    }

    /// Like [`LockManager::acquire`], also reporting whether this was a renewal.
    pub async fn acquire_grant(&self, actor: &str, ttl: Duration) -> MigrateResult<LockGrant> {
        let token = new_token();

        for attempt in 1..=VANISHED_RETRIES {
            match self.store.try_acquire_lock(actor, &token, ttl).await? {
                LockAttempt::Acquired(lock) => {
                    let renewed = lock.token != token;
                    self.events.emit(&Event::LockAcquired {
                        holder: lock.holder.clone(),
                        expires_at: lock.expires_at,
                        renewed,
                    });
                    return Ok(LockGrant { lock, renewed });
                }
                LockAttempt::Held(lock) => {
                    self.events.emit(&Event::LockBlocked {
                        actor: actor.to_string(),
                        holder: lock.holder.clone(),
                        held_since: lock.acquired_at,
                    });
                    return Err(MigrateError::LockAcquire {
                        holder: lock.holder,
                        held_since: lock.acquired_at,
                    });
                }
                LockAttempt::Vanished => {
                    debug!(attempt, "Lock row vanished during acquire, retrying");
                }
            }
        }

        Err(MigrateError::database("lock row kept vanishing during acquisition"))
    }

    /// Release the lock owned by `token`.
    pub async fn release(&self, token: &str) -> MigrateResult<()> {
        let holder = self
            .store
            .read_lock()
            .await?
            .filter(|lock| lock.token == token)
            .map(|lock| lock.holder);

        match self.store.delete_lock(token).await? {
            LockRelease::Released => {
                self.events.emit(&Event::LockReleased { holder });
                Ok(())
            }
            LockRelease::NotFound => Err(MigrateError::LockNotFound),
            LockRelease::NotOwner(lock) => Err(MigrateError::LockOwnership {
                holder: lock.holder,
            }),
        }
    }

    /// Current lock state. Expired locks are reported as free.
    pub async fn status(&self) -> MigrateResult<LockStatus> {
        Ok(match self.store.read_lock().await? {
            Some(lock) => LockStatus::Held {
                holder: lock.holder,
                acquired_at: lock.acquired_at,
                expires_at: lock.expires_at,
            },
            None => LockStatus::Free,
        })
    }

    /// Delete the lock regardless of holder or expiry.
    pub async fn force_release(&self, actor: &str) -> MigrateResult<Option<Lock>> {
        let previous = self.store.force_delete_lock().await?;
        self.events.emit(&Event::LockForceReleased {
            actor: actor.to_string(),
            previous_holder: previous.as_ref().map(|lock| lock.holder.clone()),
        });
        Ok(previous)
    }
}
