// ============================
// crates/backend-lib/src/location.rs
// ============================
//! Realtime last-known-position store keyed by user id.
use crate::error::AppError;
use crate::store::StoreResult;
use async_trait::async_trait;
use campus_safety_common::{LiveLocation, LocationStatus, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const CHANGE_CAPACITY: usize = 512;

/// Emitted whenever a user's record is written or cleared
#[derive(Debug, Clone, PartialEq)]
pub struct LocationChange {
    pub user_id: UserId,
    pub location: Option<LiveLocation>,
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Overwrite the user's record
    async fn set(&self, user_id: &str, location: LiveLocation) -> StoreResult<()>;

    /// Move the user's point, keeping every other field. Creates the record when absent.
    async fn update(&self, user_id: &str, latitude: f64, longitude: f64) -> StoreResult<()>;

    async fn get(&self, user_id: &str) -> StoreResult<Option<LiveLocation>>;

    async fn remove(&self, user_id: &str) -> StoreResult<()>;

    /// Watch a single user's record
    fn subscribe(&self, user_id: &str) -> watch::Receiver<Option<LiveLocation>>;

    /// Every change across all users
    fn subscribe_all(&self) -> broadcast::Receiver<LocationChange>;

    /// Clear `user_id` when `connection_id` goes away
    fn remove_on_disconnect(&self, user_id: &str, connection_id: &str);

    /// Run the removals registered for `connection_id`
    async fn disconnect(&self, connection_id: &str) -> StoreResult<()>;

    /// Release bookkeeping for users with no record and no watchers
    fn prune(&self) {}
}

/// Recency windows used to classify a record
#[derive(Debug, Clone, Copy)]
pub struct LocationWindows {
    pub active: Duration,
    pub stale: Duration,
}

impl Default for LocationWindows {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(30),
            stale: Duration::from_secs(5 * 60),
        }
    }
}

impl LocationWindows {
    pub fn status_at(&self, location: &LiveLocation, now: DateTime<Utc>) -> LocationStatus {
        // clock skew can put lastUpdated in the future; treat that as fresh
        let age = (now - location.last_updated).to_std().unwrap_or(Duration::ZERO);
        if age < self.active {
            LocationStatus::Active
        } else if age < self.stale {
            LocationStatus::Stale
        } else {
            LocationStatus::Offline
        }
    }

    pub fn status(&self, location: &LiveLocation) -> LocationStatus {
        self.status_at(location, Utc::now())
    }
}

/// In-memory [`LocationStore`] built on watch channels
pub struct MemoryLocationStore {
    records: DashMap<UserId, watch::Sender<Option<LiveLocation>>>,
    changes: broadcast::Sender<LocationChange>,
    disconnect_hooks: DashMap<String, Vec<UserId>>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            records: DashMap::new(),
            changes,
            disconnect_hooks: DashMap::new(),
        }
    }

    fn write(&self, user_id: &str, location: Option<LiveLocation>) {
        let sender = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        sender.send_replace(location.clone());
        drop(sender);

        let _ = self.changes.send(LocationChange {
            user_id: user_id.to_string(),
            location,
        });
    }
}

impl Default for MemoryLocationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn set(&self, user_id: &str, location: LiveLocation) -> StoreResult<()> {
        if !(location.latitude.is_finite() && location.longitude.is_finite()) {
            return Err(AppError::InvalidInput("coordinates must be finite".to_string()));
        }
        self.write(user_id, Some(location));
        Ok(())
    }

    async fn update(&self, user_id: &str, latitude: f64, longitude: f64) -> StoreResult<()> {
        if !(latitude.is_finite() && longitude.is_finite()) {
            return Err(AppError::InvalidInput("coordinates must be finite".to_string()));
        }
        let now = Utc::now();
        let next = match self.get(user_id).await? {
            Some(existing) => LiveLocation {
                latitude,
                longitude,
                last_updated: now,
                ..existing
            },
            None => LiveLocation {
                latitude,
                longitude,
                last_updated: now,
                speed: None,
                heading: None,
                accuracy: None,
                sos_id: None,
            },
        };
        self.write(user_id, Some(next));
        Ok(())
    }

    async fn get(&self, user_id: &str) -> StoreResult<Option<LiveLocation>> {
        Ok(self
            .records
            .get(user_id)
            .and_then(|sender| sender.borrow().clone()))
    }

    async fn remove(&self, user_id: &str) -> StoreResult<()> {
        if self.records.contains_key(user_id) {
            self.write(user_id, None);
            self.records
                .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
        }
        Ok(())
    }

    fn subscribe(&self, user_id: &str) -> watch::Receiver<Option<LiveLocation>> {
        self.records
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    fn subscribe_all(&self) -> broadcast::Receiver<LocationChange> {
        self.changes.subscribe()
    }

    fn remove_on_disconnect(&self, user_id: &str, connection_id: &str) {
        let mut users = self
            .disconnect_hooks
            .entry(connection_id.to_string())
            .or_default();
        if !users.iter().any(|existing| existing == user_id) {
            users.push(user_id.to_string());
        }
    }

    async fn disconnect(&self, connection_id: &str) -> StoreResult<()> {
        let Some((_, users)) = self.disconnect_hooks.remove(connection_id) else {
            return Ok(());
        };
        for user_id in users {
            tracing::debug!(%user_id, connection_id, "clearing location on disconnect");
            self.remove(&user_id).await?;
        }
        Ok(())
    }

    fn prune(&self) {
        self.records
            .retain(|_, sender| sender.receiver_count() > 0 || sender.borrow().is_some());
    }
}

impl MemoryLocationStore {
    pub fn tracked_users(&self) -> usize {
        self.records.len()
    }
}
