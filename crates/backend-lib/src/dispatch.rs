// ============================
// crates/backend-lib/src/dispatch.rs
// ============================
//! Push notification fan-out for newly created SOS events.
use crate::error::AppError;
use crate::events::{EventBus, SafetyEvent};
use crate::metrics::NOTIFY_SENT;
use crate::store::{
    get_as, query_as, DocumentStore, FieldUpdate, Filter, StoreResult, SOS_EVENTS, USERS,
};
use async_trait::async_trait;
use campus_safety_common::{ActorRole, SosEvent, UserProfile};
use metrics::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const ALERT_TITLE: &str = "SOS ALERT";
pub const ALERT_TYPE: &str = "SOS_ALERT";

/// Notification body plus the data map the client app routes on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// Push provider port
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, device_tokens: &[String], message: &PushMessage) -> Result<(), AppError>;
}

/// Writes alerts to the log instead of a push provider
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send(&self, device_tokens: &[String], message: &PushMessage) -> Result<(), AppError> {
        tracing::info!(
            recipients = device_tokens.len(),
            title = %message.title,
            body = %message.body,
            "push notification"
        );
        Ok(())
    }
}

/// Device tokens grouped by who they reach
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    pub security: Vec<String>,
    pub wardens: Vec<String>,
}

impl Recipients {
    pub fn len(&self) -> usize {
        self.security.len() + self.wardens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn alert_for(event: &SosEvent) -> PushMessage {
    let place = event
        .location
        .address
        .as_deref()
        .filter(|address| !address.is_empty())
        .unwrap_or("Unknown Location");

    let mut data = BTreeMap::new();
    data.insert("type".to_string(), ALERT_TYPE.to_string());
    data.insert("eventId".to_string(), event.id.clone());
    data.insert("lat".to_string(), event.location.lat.to_string());
    data.insert("lng".to_string(), event.location.lng.to_string());
    data.insert("studentName".to_string(), event.user_name.clone());

    PushMessage {
        title: ALERT_TITLE.to_string(),
        body: format!("Emergency at {place}! Student: {}", event.user_name),
        data,
    }
}

/// Consumer of [`SafetyEvent::SosCreated`]
pub struct NotificationDispatcher {
    store: Arc<dyn DocumentStore>,
    push: Arc<dyn PushSender>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn DocumentStore>, push: Arc<dyn PushSender>) -> Self {
        Self { store, push }
    }

    /// Every security user plus the wardens of the event's hostel, when it has one
    pub async fn recipients(&self, event: &SosEvent) -> StoreResult<Recipients> {
        let security = self
            .device_tokens(&[Filter::eq("role", ActorRole::Security.as_str())])
            .await?;

        let wardens = match &event.hostel_id {
            Some(hostel_id) => {
                self.device_tokens(&[
                    Filter::eq("role", ActorRole::Warden.as_str()),
                    Filter::eq("hostelId", hostel_id.as_str()),
                ])
                .await?
            },
            None => Vec::new(),
        };

        Ok(Recipients { security, wardens })
    }

    async fn device_tokens(&self, filters: &[Filter]) -> StoreResult<Vec<String>> {
        let profiles: Vec<UserProfile> = query_as(self.store.as_ref(), USERS, filters).await?;
        Ok(profiles
            .into_iter()
            .filter_map(|profile| profile.fcm_token)
            .filter(|token| !token.is_empty())
            .collect())
    }

    /// Send the alert and stamp the event. Push failures are logged, store failures returned.
    pub async fn dispatch(&self, event: &SosEvent) -> Result<usize, AppError> {
        let recipients = self.recipients(event).await?;
        let message = alert_for(event);
        let mut delivered = 0;

        for (group, tokens) in [
            ("security", &recipients.security),
            ("warden", &recipients.wardens),
        ] {
            if tokens.is_empty() {
                continue;
            }
            match self.push.send(tokens, &message).await {
                Ok(()) => {
                    delivered += tokens.len();
                    tracing::info!(sos_id = %event.id, group, count = tokens.len(), "alert sent");
                },
                Err(e) => {
                    tracing::warn!(sos_id = %event.id, group, error = %e, "alert push failed");
                },
            }
        }

        counter!(NOTIFY_SENT).increment(delivered as u64);

        self.store
            .update(
                SOS_EVENTS,
                &event.id,
                vec![
                    FieldUpdate::set("notificationSent", true),
                    FieldUpdate::server_timestamp("notificationTimestamp"),
                ],
            )
            .await?;

        Ok(delivered)
    }

    /// Dispatch unless the stored event was already notified
    pub async fn dispatch_pending(&self, sos_id: &str) -> Result<bool, AppError> {
        let event: Option<SosEvent> = get_as(self.store.as_ref(), SOS_EVENTS, sos_id).await?;
        match event {
            Some(event) if !event.notification_sent => {
                self.dispatch(&event).await?;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    /// Alert every open event nobody was notified about yet
    pub async fn catch_up(&self) -> Result<usize, AppError> {
        let pending: Vec<SosEvent> = query_as(
            self.store.as_ref(),
            SOS_EVENTS,
            &[
                Filter::eq("notificationSent", false),
                Filter::eq("status.resolved", false),
            ],
        )
        .await?;

        let mut dispatched = 0;
        for event in &pending {
            match self.dispatch(event).await {
                Ok(_) => dispatched += 1,
                Err(e) => {
                    tracing::error!(sos_id = %event.id, error = %e, "catch-up dispatch failed");
                },
            }
        }
        if dispatched > 0 {
            tracing::info!(dispatched, "dispatched pending SOS alerts");
        }
        Ok(dispatched)
    }

    async fn catch_up_logged(&self) {
        if let Err(e) = self.catch_up().await {
            tracing::error!(error = %e, "pending alert scan failed");
        }
    }

    /// Scan for pending events, then consume `SosCreated` until the bus closes.
    /// A lagged receiver rescans so dropped events still get alerted.
    pub fn spawn(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            self.catch_up_logged().await;
            loop {
                match rx.recv().await {
                    Ok(SafetyEvent::SosCreated { event }) => {
                        if let Err(e) = self.dispatch_pending(&event.id).await {
                            tracing::error!(sos_id = %event.id, error = %e, "notification dispatch failed");
                        }
                    },
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "notification dispatcher lagged behind, rescanning");
                        self.catch_up_logged().await;
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
