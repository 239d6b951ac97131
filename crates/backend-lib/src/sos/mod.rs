// ============================
// crates/backend-lib/src/sos/mod.rs
// ============================
//! SOS lifecycle: trigger, enrich, recognise, resolve and cancel.
//!
//! The event, its session and the per-user `active_sos` claim are written in
//! one commit, so at most one unresolved event exists per user and there is
//! never an event without its session. Status flags only ever flip to `true`
//! and the timeline is only ever appended to.
pub mod manager;

pub use manager::{RecoveryOutcome, SosManager};

use crate::auth::{require, require_owner, require_owner_or, Permission, SessionTokens};
use crate::error::AppError;
use crate::events::{EventBus, SafetyEvent};
use crate::location::LocationStore;
use crate::metrics::{SOS_CANCELLED, SOS_DUPLICATE, SOS_RECOGNISED, SOS_RESOLVED, SOS_TRIGGERED};
use crate::store::{
    decode, get_as, query_as, DocumentStore, FieldUpdate, Filter, Precondition, QuerySubscription,
    WriteOp, ACTIVE_SOS, SOS_EVENTS, SOS_SESSIONS, USERS,
};
use crate::validation::{validate_coordinates, validate_optional_text, validate_point, validate_summary};
use campus_safety_common::{
    Actor, ActorRole, ActorSnapshot, GeoPoint, LiveLocation, LocationFix, SosDetails, SosEvent,
    SosSession, SosStatus, TimelineEntry, TokenCancelRequest, TokenLocationUpdate, TriggerRequest,
    TriggerResponse, UserProfile,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const ACTION_TRIGGERED: &str = "SOS Triggered";
pub const ACTION_DETAILS: &str = "Details Added";
pub const ACTION_RECOGNISED: &str = "SOS Recognised by Security";
pub const ACTION_ACKNOWLEDGED: &str = "Warden Acknowledged";
pub const ACTION_RESOLVED: &str = "Resolved";
pub const ACTION_CANCELLED: &str = "Cancelled by Student";
pub const ACTION_CANCELLED_TOKEN: &str = "Cancelled by Student (Token)";
pub const CANCEL_SUMMARY: &str = "Cancelled by student";

const UNKNOWN_STUDENT: &str = "Unknown Student";
const NO_ROOM: &str = "N/A";

/// Outcome of resolve and cancel. Closing an already closed event changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    AlreadyResolved,
}

/// `active_sos/{userId}`: points at the user's unresolved event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveClaim {
    sos_id: String,
    user_id: String,
    claimed_at: DateTime<Utc>,
}

/// Server-side owner of every SOS document write
pub struct SosService {
    store: Arc<dyn DocumentStore>,
    locations: Arc<dyn LocationStore>,
    tokens: SessionTokens,
    events: EventBus,
}

impl SosService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locations: Arc<dyn LocationStore>,
        tokens: SessionTokens,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            locations,
            tokens,
            events,
        }
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Trigger
    // -----------------------------------------------------------------------

    /// Create the event, its session and the user's claim in one commit
    pub async fn open(
        &self,
        actor: &Actor,
        request: TriggerRequest,
    ) -> Result<TriggerResponse, AppError> {
        validate_point(&request.location)?;

        if let Some(existing) = self.find_active(&actor.id).await? {
            return Err(duplicate(&actor.id, existing.id));
        }

        let profile: UserProfile = get_as(self.store.as_ref(), USERS, &actor.id)
            .await?
            .unwrap_or_else(|| {
                tracing::warn!(user_id = %actor.id, "no profile for SOS subject, using placeholders");
                UserProfile::default()
            });

        let now = Utc::now();
        let sos_id = Uuid::new_v4().to_string();
        let session = self.tokens.issue(&sos_id, &actor.id, now)?;
        let event = new_event(&sos_id, actor, &profile, &request, now);
        let claim = ActiveClaim {
            sos_id: sos_id.clone(),
            user_id: actor.id.clone(),
            claimed_at: now,
        };

        let records = vec![
            WriteOp::create(SOS_EVENTS, &sos_id, &event)?,
            WriteOp::create(SOS_SESSIONS, &sos_id, &session)?,
        ];
        let mut ops = records.clone();
        ops.push(WriteOp::create(ACTIVE_SOS, &actor.id, &claim)?);

        match self.store.commit(ops).await {
            Ok(()) => {},
            Err(AppError::Conflict(_)) => self.take_over_claim(actor, records, &claim).await?,
            Err(e) => {
                tracing::error!(user_id = %actor.id, error = %e, "failed to create SOS");
                return Err(e);
            },
        }

        let live = LiveLocation {
            latitude: request.location.lat,
            longitude: request.location.lng,
            last_updated: now,
            speed: None,
            heading: None,
            accuracy: None,
            sos_id: Some(sos_id.clone()),
        };
        if let Err(e) = self.locations.set(&actor.id, live).await {
            tracing::warn!(%sos_id, error = %e, "initial live location write failed");
        }

        counter!(SOS_TRIGGERED).increment(1);
        tracing::info!(
            %sos_id,
            user_id = %actor.id,
            emergency_type = %request.emergency_type,
            trigger_method = %request.trigger_method,
            "SOS triggered"
        );
        self.events.publish(SafetyEvent::SosCreated { event });

        Ok(TriggerResponse {
            sos_id,
            sos_token: session.token,
        })
    }

    /// The claim exists. Either it is live (duplicate) or it points at a closed event.
    async fn take_over_claim(
        &self,
        actor: &Actor,
        mut records: Vec<WriteOp>,
        claim: &ActiveClaim,
    ) -> Result<(), AppError> {
        let Some(existing) = self.claim(&actor.id).await? else {
            // claim vanished between the two reads; the caller can retry
            return Err(AppError::Conflict("active SOS claim changed".to_string()));
        };

        let held = get_as::<SosEvent>(self.store.as_ref(), SOS_EVENTS, &existing.sos_id).await?;
        if held.as_ref().is_some_and(SosEvent::is_active) {
            return Err(duplicate(&actor.id, existing.sos_id));
        }

        tracing::debug!(user_id = %actor.id, stale = %existing.sos_id, "replacing stale SOS claim");
        records.push(
            WriteOp::update(
                ACTIVE_SOS,
                &actor.id,
                vec![
                    FieldUpdate::set("sosId", claim.sos_id.as_str()),
                    FieldUpdate::set_serialized("claimedAt", &claim.claimed_at)?,
                ],
            )
            .when(Precondition::field_equals("sosId", existing.sos_id.as_str())),
        );

        match self.store.commit(records).await {
            Err(AppError::Conflict(_)) => {
                // lost to a concurrent trigger
                let winner = self.claim(&actor.id).await?.map(|c| c.sos_id);
                Err(match winner {
                    Some(sos_id) => duplicate(&actor.id, sos_id),
                    None => AppError::Conflict("active SOS claim changed".to_string()),
                })
            },
            other => other,
        }
    }

    async fn claim(&self, user_id: &str) -> Result<Option<ActiveClaim>, AppError> {
        get_as(self.store.as_ref(), ACTIVE_SOS, user_id).await
    }

    // -----------------------------------------------------------------------
    // Owner and responder updates
    // -----------------------------------------------------------------------

    /// Overwrite the enrichment fields. Every call appends its own timeline entry.
    pub async fn update_details(
        &self,
        actor: &Actor,
        sos_id: &str,
        details: SosDetails,
    ) -> Result<(), AppError> {
        validate_optional_text(details.description.as_ref())?;
        validate_optional_text(details.voice_transcript.as_ref())?;

        let event = self.load(sos_id).await?;
        require_owner_or(actor, &event.user_id, Permission::EditAnySos)?;

        let entry = TimelineEntry::new(
            ACTION_DETAILS,
            actor.id.as_str(),
            Some(format!("Type: {}", details.emergency_type)),
        );
        self.store
            .update(
                SOS_EVENTS,
                sos_id,
                vec![
                    FieldUpdate::set_serialized("emergencyType", &details.emergency_type)?,
                    FieldUpdate::set_serialized("description", &details.description)?,
                    FieldUpdate::set_serialized("voiceTranscript", &details.voice_transcript)?,
                    FieldUpdate::set("isDetailsAdded", true),
                    FieldUpdate::append("timeline", &entry)?,
                ],
            )
            .await?;

        tracing::info!(sos_id, actor = %actor.id, "SOS details updated");
        Ok(())
    }

    /// Take the SOS. Concurrent recognitions are not serialized: the last one wins.
    pub async fn recognise(&self, actor: &Actor, sos_id: &str) -> Result<(), AppError> {
        require(actor, Permission::RecogniseSos)?;
        let event = self.load(sos_id).await?;
        if event.status.resolved {
            return Err(AppError::AlreadyResolved);
        }

        let assigned = ActorSnapshot {
            id: actor.id.clone(),
            name: actor.name.clone(),
            role: ActorRole::Security,
        };
        let entry = TimelineEntry::new(
            ACTION_RECOGNISED,
            actor.id.as_str(),
            Some(format!("Recognised by {}", actor.name)),
        );
        let op = WriteOp::update(
            SOS_EVENTS,
            sos_id,
            vec![
                FieldUpdate::set("status.recognised", true),
                FieldUpdate::set("recognisedBy", actor.id.as_str()),
                FieldUpdate::set_serialized("assignedTo", &assigned)?,
                FieldUpdate::append("timeline", &entry)?,
            ],
        )
        .when(Precondition::field_equals("status.resolved", false));

        self.commit_while_open(op).await?;

        counter!(SOS_RECOGNISED).increment(1);
        tracing::info!(sos_id, actor = %actor.id, "SOS recognised");
        self.events.publish(SafetyEvent::SosRecognised {
            sos_id: sos_id.to_string(),
            by: assigned,
        });
        Ok(())
    }

    /// Warden acknowledgement. Timeline only; flags are untouched.
    pub async fn acknowledge(&self, actor: &Actor, sos_id: &str) -> Result<(), AppError> {
        require(actor, Permission::AcknowledgeSos)?;
        let event = self.load(sos_id).await?;
        if event.status.resolved {
            return Err(AppError::AlreadyResolved);
        }

        let entry = TimelineEntry::new(ACTION_ACKNOWLEDGED, actor.id.as_str(), None);
        let op = WriteOp::update(SOS_EVENTS, sos_id, vec![FieldUpdate::append("timeline", &entry)?])
            .when(Precondition::field_equals("status.resolved", false));
        self.commit_while_open(op).await?;

        tracing::info!(sos_id, actor = %actor.id, "SOS acknowledged");
        Ok(())
    }

    async fn commit_while_open(&self, op: WriteOp) -> Result<(), AppError> {
        match self.store.commit(vec![op]).await {
            Err(AppError::Conflict(_)) => Err(AppError::AlreadyResolved),
            Err(AppError::NotFound(_)) => Err(AppError::SosNotFound),
            other => other,
        }
    }

    /// Close the event as a responder
    pub async fn resolve(
        &self,
        actor: &Actor,
        sos_id: &str,
        summary: &str,
    ) -> Result<Resolution, AppError> {
        require(actor, Permission::ResolveSos)?;
        let summary = validate_summary(summary)?;
        let resolution = self.close(sos_id, summary, ACTION_RESOLVED, &actor.id).await?;
        if resolution == Resolution::Resolved {
            counter!(SOS_RESOLVED).increment(1);
        }
        Ok(resolution)
    }

    /// Close the event as its owner
    pub async fn cancel_by_owner(&self, actor: &Actor, sos_id: &str) -> Result<Resolution, AppError> {
        let event = self.load(sos_id).await?;
        require_owner(actor, &event.user_id)?;
        let resolution = self
            .close(sos_id, CANCEL_SUMMARY, ACTION_CANCELLED, &actor.id)
            .await?;
        if resolution == Resolution::Resolved {
            counter!(SOS_CANCELLED).increment(1);
        }
        Ok(resolution)
    }

    /// Close the event from a device holding only its token
    pub async fn cancel_with_token(&self, request: TokenCancelRequest) -> Result<Resolution, AppError> {
        let session = self
            .tokens
            .authorize(&request.sos_id, &request.sos_token)
            .await?;
        let summary = match request.summary.as_deref().map(str::trim) {
            Some(summary) if !summary.is_empty() => validate_summary(summary)?,
            _ => CANCEL_SUMMARY,
        };
        let resolution = self
            .close(&request.sos_id, summary, ACTION_CANCELLED_TOKEN, &session.user_id)
            .await?;
        if resolution == Resolution::Resolved {
            counter!(SOS_CANCELLED).increment(1);
        }
        Ok(resolution)
    }

    /// Resolve the event, deactivate its session and release the claim atomically
    async fn close(
        &self,
        sos_id: &str,
        summary: &str,
        action: &str,
        by: &str,
    ) -> Result<Resolution, AppError> {
        let event = self.load(sos_id).await?;
        if event.status.resolved {
            tracing::debug!(sos_id, "close on resolved SOS is a no-op");
            return Ok(Resolution::AlreadyResolved);
        }

        let entry = TimelineEntry::new(action, by, Some(summary.to_string()));
        let mut ops = vec![
            WriteOp::update(
                SOS_EVENTS,
                sos_id,
                vec![
                    FieldUpdate::set("status.resolved", true),
                    FieldUpdate::server_timestamp("resolvedAt"),
                    FieldUpdate::set("resolutionSummary", summary),
                    FieldUpdate::append("timeline", &entry)?,
                ],
            )
            .when(Precondition::field_equals("status.resolved", false)),
            SessionTokens::deactivate_op(sos_id),
        ];
        if self
            .claim(&event.user_id)
            .await?
            .is_some_and(|claim| claim.sos_id == sos_id)
        {
            ops.push(
                WriteOp::delete(ACTIVE_SOS, &event.user_id)
                    .when(Precondition::field_equals("sosId", sos_id)),
            );
        }

        match self.store.commit(ops).await {
            Ok(()) => {},
            Err(AppError::Conflict(reason)) => {
                // a concurrent close may have won
                return if self.load(sos_id).await?.status.resolved {
                    Ok(Resolution::AlreadyResolved)
                } else {
                    Err(AppError::Conflict(reason))
                };
            },
            Err(e) => {
                tracing::error!(sos_id, error = %e, "failed to close SOS");
                return Err(e);
            },
        }

        tracing::info!(sos_id, by, action, "SOS closed");
        self.events.publish(SafetyEvent::SosResolved {
            sos_id: sos_id.to_string(),
            user_id: event.user_id,
            summary: summary.to_string(),
        });
        Ok(Resolution::Resolved)
    }

    // -----------------------------------------------------------------------
    // Location
    // -----------------------------------------------------------------------

    /// Unauthenticated position push from the background service
    pub async fn update_location_with_token(
        &self,
        request: TokenLocationUpdate,
    ) -> Result<(), AppError> {
        validate_coordinates(request.latitude, request.longitude)?;
        let session = self
            .tokens
            .authorize(&request.sos_id, &request.sos_token)
            .await?;

        self.write_live_location(&request.sos_id, request.latitude, request.longitude)
            .await?;
        self.locations
            .update(&session.user_id, request.latitude, request.longitude)
            .await
    }

    /// Authenticated position push from the owner's app
    pub async fn report_location(
        &self,
        actor: &Actor,
        sos_id: &str,
        fix: LocationFix,
    ) -> Result<(), AppError> {
        validate_coordinates(fix.latitude, fix.longitude)?;
        let event = self.load(sos_id).await?;
        require_owner(actor, &event.user_id)?;
        if event.status.resolved {
            return Err(AppError::AlreadyResolved);
        }

        self.write_live_location(sos_id, fix.latitude, fix.longitude)
            .await?;
        self.locations
            .set(
                &actor.id,
                LiveLocation {
                    latitude: fix.latitude,
                    longitude: fix.longitude,
                    last_updated: Utc::now(),
                    speed: fix.speed,
                    heading: fix.heading,
                    accuracy: fix.accuracy,
                    sos_id: Some(sos_id.to_string()),
                },
            )
            .await
    }

    async fn write_live_location(&self, sos_id: &str, lat: f64, lng: f64) -> Result<(), AppError> {
        let point = GeoPoint::new(lat, lng);
        match self
            .store
            .update(
                SOS_EVENTS,
                sos_id,
                vec![FieldUpdate::set_serialized("liveLocation", &point)?],
            )
            .await
        {
            Err(AppError::NotFound(_)) => Err(AppError::SosNotFound),
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn load(&self, sos_id: &str) -> Result<SosEvent, AppError> {
        get_as(self.store.as_ref(), SOS_EVENTS, sos_id)
            .await?
            .ok_or(AppError::SosNotFound)
    }

    pub async fn session(&self, sos_id: &str) -> Result<Option<SosSession>, AppError> {
        get_as(self.store.as_ref(), SOS_SESSIONS, sos_id).await
    }

    /// The owner or any responder may read an event
    pub async fn get(&self, actor: &Actor, sos_id: &str) -> Result<SosEvent, AppError> {
        let event = self.load(sos_id).await?;
        require_owner_or(actor, &event.user_id, Permission::MonitorSos)?;
        Ok(event)
    }

    /// Latest unresolved event of a user
    pub async fn find_active(&self, user_id: &str) -> Result<Option<SosEvent>, AppError> {
        let events: Vec<SosEvent> = query_as(
            self.store.as_ref(),
            SOS_EVENTS,
            &[Filter::eq("userId", user_id), Filter::eq("status.resolved", false)],
        )
        .await?;
        Ok(events.into_iter().max_by_key(|event| event.triggered_at))
    }

    /// Unresolved events, newest trigger first
    pub async fn active(&self, actor: &Actor, hostel_id: Option<&str>) -> Result<Vec<SosEvent>, AppError> {
        require(actor, Permission::MonitorSos)?;
        let mut events: Vec<SosEvent> =
            query_as(self.store.as_ref(), SOS_EVENTS, &active_filters(hostel_id)).await?;
        sort_newest_triggered(&mut events);
        Ok(events)
    }

    /// Resolved events, most recently resolved first
    pub async fn history(&self, actor: &Actor) -> Result<Vec<SosEvent>, AppError> {
        require(actor, Permission::MonitorSos)?;
        let mut events: Vec<SosEvent> = query_as(
            self.store.as_ref(),
            SOS_EVENTS,
            &[Filter::eq("status.resolved", true)],
        )
        .await?;
        events.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at));
        Ok(events)
    }

    /// Live feed of unresolved events for a responder
    pub fn subscribe_active(
        &self,
        actor: &Actor,
        hostel_id: Option<&str>,
    ) -> Result<ActiveSosFeed, AppError> {
        require(actor, Permission::MonitorSos)?;
        Ok(ActiveSosFeed {
            inner: QuerySubscription::new(
                self.store.clone(),
                SOS_EVENTS,
                active_filters(hostel_id),
            ),
        })
    }
}

/// Sorted snapshots of the unresolved events
pub struct ActiveSosFeed {
    inner: QuerySubscription,
}

impl ActiveSosFeed {
    pub async fn next(&mut self) -> Option<Result<Vec<SosEvent>, AppError>> {
        let snapshot = self.inner.next().await?;
        Some(snapshot.and_then(|documents| {
            let mut events = documents
                .into_iter()
                .map(|document| decode::<SosEvent>(document.data))
                .collect::<Result<Vec<_>, _>>()?;
            sort_newest_triggered(&mut events);
            Ok(events)
        }))
    }
}

fn active_filters(hostel_id: Option<&str>) -> Vec<Filter> {
    let mut filters = vec![Filter::eq("status.resolved", false)];
    if let Some(hostel_id) = hostel_id {
        filters.push(Filter::eq("hostelId", hostel_id));
    }
    filters
}

fn sort_newest_triggered(events: &mut [SosEvent]) {
    events.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
}

fn duplicate(user_id: &str, sos_id: String) -> AppError {
    counter!(SOS_DUPLICATE).increment(1);
    tracing::info!(user_id, %sos_id, "duplicate SOS trigger");
    AppError::AlreadyActive {
        sos_id,
        tracking_resumed: false,
    }
}

fn new_event(
    sos_id: &str,
    actor: &Actor,
    profile: &UserProfile,
    request: &TriggerRequest,
    now: DateTime<Utc>,
) -> SosEvent {
    let role = profile.role.unwrap_or(actor.role);
    // students are shown by username only
    let user_name = match role {
        ActorRole::Student => profile
            .username
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_STUDENT.to_string()),
        ActorRole::Warden | ActorRole::Security | ActorRole::Admin => profile
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| actor.name.clone()),
    };

    SosEvent {
        id: sos_id.to_string(),
        user_id: actor.id.clone(),
        user_name,
        user_phone: profile.phone_number.clone().unwrap_or_default(),
        role,
        hostel_id: profile.hostel_id.clone(),
        room_number: profile
            .room_no
            .clone()
            .unwrap_or_else(|| NO_ROOM.to_string()),
        status: SosStatus::default(),
        recognised_by: None,
        assigned_to: None,
        location: request.location.clone(),
        live_location: request.location.clone(),
        timeline: vec![TimelineEntry {
            time: now,
            action: ACTION_TRIGGERED.to_string(),
            by: actor.id.clone(),
            note: Some(format!(
                "Emergency: {} ({})",
                request.emergency_type, request.trigger_method
            )),
        }],
        emergency_type: request.emergency_type,
        trigger_method: request.trigger_method,
        description: None,
        voice_transcript: None,
        is_details_added: false,
        triggered_at: now,
        created_at: now,
        resolved_at: None,
        resolution_summary: None,
        notification_sent: false,
    }
}
