// ============================
// crates/backend-lib/src/safewalk/mod.rs
// ============================
//! Safe walk monitoring: a non-emergency walk that can escalate into an SOS.
//!
//! Every status write is a compare-and-swap on the status the caller read,
//! so a terminal status can never be overwritten by a late writer.
pub mod geo;

pub use geo::{check_off_route, haversine_m};

use crate::auth::{require, require_owner, require_owner_or, Permission};
use crate::error::AppError;
use crate::events::SafetyEvent;
use crate::location::LocationStore;
use crate::metrics::{WALK_ESCALATED, WALK_OFF_ROUTE, WALK_STARTED};
use crate::sos::SosService;
use crate::store::{
    decode, get_as, query_as, DocumentStore, FieldUpdate, Filter, Precondition, QuerySubscription,
    WriteOp, SAFE_WALKS, USERS,
};
use crate::validation::{
    validate_coordinates, validate_expected_duration, validate_message, validate_name,
    validate_named_point, validate_optional_text,
};
use campus_safety_common::{
    Actor, EmergencyType, GeoPoint, LiveLocation, LocationFix, OffRouteCheck, SafeWalkSession,
    SafeWalkStatus, SosId, StartWalkRequest, TriggerMethod, TriggerRequest, UserProfile,
    WalkEntryKind, WalkStatusRequest, WalkTimelineEntry,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Author of entries written by the monitor itself
pub const SYSTEM_ACTOR: &str = "system";
pub const DEFAULT_OFF_ROUTE_THRESHOLD_M: f64 = 20.0;

/// Re-reads tolerated while linking an escalated walk to its SOS
const LINK_ATTEMPTS: u32 = 3;
const OFF_ROUTE_NOTE: &str = "User appears to be moving away from destination";
const DELAYED_NOTE: &str = "Walk exceeded expected duration";
const ESCORT_REQUEST_NOTE: &str = "Student requested a security escort";

/// Result of a status update; `sos_id` is set when the walk escalated
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub walk: SafeWalkSession,
    pub sos_id: Option<SosId>,
}

pub struct SafeWalkMonitor {
    store: Arc<dyn DocumentStore>,
    locations: Arc<dyn LocationStore>,
    sos: Arc<SosService>,
    off_route_threshold_m: f64,
}

impl SafeWalkMonitor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locations: Arc<dyn LocationStore>,
        sos: Arc<SosService>,
    ) -> Self {
        Self {
            store,
            locations,
            sos,
            off_route_threshold_m: DEFAULT_OFF_ROUTE_THRESHOLD_M,
        }
    }

    #[must_use]
    pub fn with_off_route_threshold(mut self, meters: f64) -> Self {
        self.off_route_threshold_m = meters;
        self
    }

    pub async fn start(
        &self,
        actor: &Actor,
        request: StartWalkRequest,
    ) -> Result<SafeWalkSession, AppError> {
        validate_named_point(&request.start_location)?;
        validate_named_point(&request.destination)?;
        validate_expected_duration(request.expected_duration)?;
        validate_optional_text(request.note.as_ref())?;

        let profile: UserProfile = get_as(self.store.as_ref(), USERS, &actor.id)
            .await?
            .unwrap_or_default();
        let now = Utc::now();
        let start = request.start_location.point();
        let walk = SafeWalkSession {
            id: Uuid::new_v4().to_string(),
            user_id: actor.id.clone(),
            user_name: profile
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| actor.name.clone()),
            hostel_id: profile.hostel_id,
            last_distance_to_destination: Some(haversine_m(&start, &request.destination.point())),
            start_location: request.start_location,
            destination: request.destination,
            status: SafeWalkStatus::Active,
            expected_duration: request.expected_duration,
            note: request.note,
            start_time: now,
            created_at: now,
            updated_at: now,
            escort_requested: false,
            assigned_escort: None,
            timeline: vec![WalkTimelineEntry::new(
                WalkEntryKind::Status,
                "Safe walk started",
                actor.id.as_str(),
            )],
            linked_sos_id: None,
        };

        self.store
            .commit(vec![WriteOp::create(SAFE_WALKS, &walk.id, &walk)?])
            .await?;

        let live = LiveLocation {
            latitude: start.lat,
            longitude: start.lng,
            last_updated: now,
            speed: Some(0.0),
            heading: None,
            accuracy: None,
            sos_id: None,
        };
        if let Err(e) = self.locations.set(&actor.id, live).await {
            tracing::warn!(walk_id = %walk.id, error = %e, "initial walk location write failed");
        }

        counter!(WALK_STARTED).increment(1);
        tracing::info!(walk_id = %walk.id, user_id = %actor.id, minutes = walk.expected_duration, "safe walk started");
        Ok(walk)
    }

    pub async fn load(&self, walk_id: &str) -> Result<SafeWalkSession, AppError> {
        get_as(self.store.as_ref(), SAFE_WALKS, walk_id)
            .await?
            .ok_or(AppError::WalkNotFound)
    }

    pub async fn get(&self, actor: &Actor, walk_id: &str) -> Result<SafeWalkSession, AppError> {
        let walk = self.load(walk_id).await?;
        require_owner_or(actor, &walk.user_id, Permission::MonitorWalks)?;
        Ok(walk)
    }

    /// Move the walk to `request.status`. `danger` and `sos` hand over to the
    /// SOS lifecycle and end the walk as `sos`.
    pub async fn update_status(
        &self,
        actor: &Actor,
        walk_id: &str,
        request: WalkStatusRequest,
    ) -> Result<StatusChange, AppError> {
        validate_optional_text(request.note.as_ref())?;
        let walk = self.load(walk_id).await?;

        if request.status.escalates() {
            require_owner(actor, &walk.user_id)?;
        } else {
            require_owner_or(actor, &walk.user_id, Permission::MonitorWalks)?;
        }
        if !walk.status.can_transition_to(request.status) {
            return Err(AppError::InvalidTransition {
                from: walk.status,
                to: request.status,
            });
        }

        if request.status.escalates() {
            return self.escalate(actor, walk, request.note).await;
        }

        let details = request
            .note
            .unwrap_or_else(|| format!("Status changed to {}", request.status));
        let mut updates = vec![
            FieldUpdate::set("status", request.status.as_str()),
            FieldUpdate::server_timestamp("updatedAt"),
            FieldUpdate::append(
                "timeline",
                &WalkTimelineEntry::new(WalkEntryKind::Status, details, actor.id.as_str()),
            )?,
        ];
        if request.status == SafeWalkStatus::EscortRequested {
            updates.push(FieldUpdate::set("escortRequested", true));
        }
        self.swap_status(&walk, updates).await?;

        tracing::info!(walk_id, from = %walk.status, to = %request.status, "safe walk status changed");
        Ok(StatusChange {
            walk: self.load(walk_id).await?,
            sos_id: None,
        })
    }

    async fn escalate(
        &self,
        actor: &Actor,
        walk: SafeWalkSession,
        note: Option<String>,
    ) -> Result<StatusChange, AppError> {
        let location = self.last_known_point(&walk).await;
        let trigger = TriggerRequest {
            location,
            emergency_type: EmergencyType::Other,
            trigger_method: TriggerMethod::Button,
        };

        // an SOS the user already has is linked rather than duplicated
        let sos_id = match self.sos.open(actor, trigger).await {
            Ok(response) => response.sos_id,
            Err(AppError::AlreadyActive { sos_id, .. }) => sos_id,
            Err(e) => return Err(e),
        };

        let details = note.unwrap_or_else(|| format!("Escalated to SOS {sos_id}"));
        if let Err(e) = self.link_escalation(&walk, &sos_id, &details, actor).await {
            tracing::error!(walk_id = %walk.id, %sos_id, error = %e, "SOS raised but walk not linked");
            return Err(e);
        }

        counter!(WALK_ESCALATED).increment(1);
        tracing::warn!(walk_id = %walk.id, %sos_id, user_id = %walk.user_id, "safe walk escalated to SOS");
        self.sos.events().publish(SafetyEvent::WalkEscalated {
            walk_id: walk.id.clone(),
            sos_id: sos_id.clone(),
            user_id: walk.user_id.clone(),
        });

        Ok(StatusChange {
            walk: self.load(&walk.id).await?,
            sos_id: Some(sos_id),
        })
    }

    /// End the walk as `sos` pointing at `sos_id`. The SOS already exists, so a
    /// concurrent status change (an off-route flag, say) is re-read and linked over.
    async fn link_escalation(
        &self,
        walk: &SafeWalkSession,
        sos_id: &str,
        details: &str,
        actor: &Actor,
    ) -> Result<(), AppError> {
        let mut current = walk.clone();
        let mut attempts = 0;
        loop {
            let updates = vec![
                FieldUpdate::set("status", SafeWalkStatus::Sos.as_str()),
                FieldUpdate::set("linkedSosId", sos_id),
                FieldUpdate::server_timestamp("updatedAt"),
                FieldUpdate::append(
                    "timeline",
                    &WalkTimelineEntry::new(WalkEntryKind::Status, details, actor.id.as_str()),
                )?,
            ];
            match self.swap_status(&current, updates).await {
                Err(AppError::Conflict(_)) if attempts < LINK_ATTEMPTS => {
                    attempts += 1;
                    current = self.load(&walk.id).await?;
                    tracing::debug!(walk_id = %walk.id, status = %current.status, "walk moved under escalation, relinking");
                },
                other => return other,
            }
        }
    }

    async fn last_known_point(&self, walk: &SafeWalkSession) -> GeoPoint {
        match self.locations.get(&walk.user_id).await {
            Ok(Some(live)) => live.point(),
            Ok(None) => walk.start_location.point(),
            Err(e) => {
                tracing::warn!(walk_id = %walk.id, error = %e, "no live location, escalating at start point");
                walk.start_location.point()
            },
        }
    }

    /// Apply `updates` only if the status is still the one in `walk`
    async fn swap_status(
        &self,
        walk: &SafeWalkSession,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), AppError> {
        let op = WriteOp::update(SAFE_WALKS, &walk.id, updates)
            .when(Precondition::field_equals("status", walk.status.as_str()));
        match self.store.commit(vec![op]).await {
            Err(AppError::Conflict(_)) => {
                let current = self.load(&walk.id).await?;
                Err(if current.status.is_terminal() {
                    AppError::WalkEnded
                } else {
                    AppError::Conflict(format!("safe walk {} changed concurrently", walk.id))
                })
            },
            other => other,
        }
    }

    /// Record a position and run the off-route check against the stored distance
    pub async fn record_position(
        &self,
        actor: &Actor,
        walk_id: &str,
        fix: LocationFix,
    ) -> Result<OffRouteCheck, AppError> {
        validate_coordinates(fix.latitude, fix.longitude)?;
        let walk = self.load(walk_id).await?;
        require_owner(actor, &walk.user_id)?;
        if walk.status.is_terminal() {
            return Err(AppError::WalkEnded);
        }

        let check = check_off_route(
            &fix.point(),
            &walk.destination.point(),
            walk.last_distance_to_destination,
            self.off_route_threshold_m,
        );

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
                    sos_id: None,
                },
            )
            .await?;

        let distance = vec![
            FieldUpdate::set("lastDistanceToDestination", check.current_distance),
            FieldUpdate::server_timestamp("updatedAt"),
        ];

        if check.is_off_route && walk.status == SafeWalkStatus::Active {
            let mut updates = distance.clone();
            updates.push(FieldUpdate::set("status", SafeWalkStatus::OffRoute.as_str()));
            updates.push(FieldUpdate::append(
                "timeline",
                &WalkTimelineEntry::new(WalkEntryKind::Status, OFF_ROUTE_NOTE, SYSTEM_ACTOR),
            )?);
            match self.swap_status(&walk, updates).await {
                Ok(()) => {
                    counter!(WALK_OFF_ROUTE).increment(1);
                    tracing::warn!(walk_id, distance_m = check.current_distance, "safe walk off route");
                    return Ok(check);
                },
                Err(AppError::Conflict(_)) => {
                    tracing::debug!(walk_id, "status moved on, recording distance only");
                },
                Err(e) => return Err(e),
            }
        }

        self.store.update(SAFE_WALKS, walk_id, distance).await?;
        Ok(check)
    }

    pub async fn request_escort(&self, actor: &Actor, walk_id: &str) -> Result<(), AppError> {
        let walk = self.load(walk_id).await?;
        require_owner(actor, &walk.user_id)?;
        if walk.status.is_terminal() {
            return Err(AppError::WalkEnded);
        }

        let mut updates = vec![
            FieldUpdate::set("escortRequested", true),
            FieldUpdate::server_timestamp("updatedAt"),
            FieldUpdate::append(
                "timeline",
                &WalkTimelineEntry::new(WalkEntryKind::Status, ESCORT_REQUEST_NOTE, actor.id.as_str()),
            )?,
        ];
        if walk.status != SafeWalkStatus::EscortRequested {
            updates.push(FieldUpdate::set("status", SafeWalkStatus::EscortRequested.as_str()));
        }
        self.swap_status(&walk, updates).await?;

        tracing::info!(walk_id, user_id = %actor.id, "escort requested");
        Ok(())
    }

    pub async fn assign_escort(
        &self,
        actor: &Actor,
        walk_id: &str,
        escort_name: &str,
    ) -> Result<(), AppError> {
        require(actor, Permission::AssignEscort)?;
        let escort_name = validate_name(escort_name)?;
        let walk = self.load(walk_id).await?;
        if walk.status.is_terminal() {
            return Err(AppError::WalkEnded);
        }

        self.store
            .update(
                SAFE_WALKS,
                walk_id,
                vec![
                    FieldUpdate::set("assignedEscort", escort_name),
                    FieldUpdate::server_timestamp("updatedAt"),
                    FieldUpdate::append(
                        "timeline",
                        &WalkTimelineEntry::new(
                            WalkEntryKind::Status,
                            format!("Escort {escort_name} assigned by security"),
                            actor.id.as_str(),
                        ),
                    )?,
                ],
            )
            .await?;

        tracing::info!(walk_id, escort = escort_name, by = %actor.id, "escort assigned");
        Ok(())
    }

    pub async fn send_message(
        &self,
        actor: &Actor,
        walk_id: &str,
        message: &str,
    ) -> Result<(), AppError> {
        require(actor, Permission::MessageWalk)?;
        let message = validate_message(message)?;
        self.load(walk_id).await?;

        self.store
            .update(
                SAFE_WALKS,
                walk_id,
                vec![
                    FieldUpdate::server_timestamp("updatedAt"),
                    FieldUpdate::append(
                        "timeline",
                        &WalkTimelineEntry::new(
                            WalkEntryKind::Message,
                            format!("Message from {}: {message}", actor.name),
                            actor.id.as_str(),
                        ),
                    )?,
                ],
            )
            .await?;
        Ok(())
    }

    /// Mark `active` walks past their expected end as `delayed`. Returns the walks changed.
    pub async fn sweep_delayed(&self, now: DateTime<Utc>) -> Result<Vec<String>, AppError> {
        let walks: Vec<SafeWalkSession> = query_as(
            self.store.as_ref(),
            SAFE_WALKS,
            &[Filter::eq("status", SafeWalkStatus::Active.as_str())],
        )
        .await?;

        let mut delayed = Vec::new();
        for walk in walks.into_iter().filter(|walk| walk.is_overdue_at(now)) {
            let updates = vec![
                FieldUpdate::set("status", SafeWalkStatus::Delayed.as_str()),
                FieldUpdate::server_timestamp("updatedAt"),
                FieldUpdate::append(
                    "timeline",
                    &WalkTimelineEntry::new(WalkEntryKind::Status, DELAYED_NOTE, SYSTEM_ACTOR),
                )?,
            ];
            match self.swap_status(&walk, updates).await {
                Ok(()) => {
                    tracing::warn!(walk_id = %walk.id, user_id = %walk.user_id, "safe walk delayed");
                    delayed.push(walk.id);
                },
                Err(AppError::Conflict(_) | AppError::WalkEnded) => {
                    tracing::debug!(walk_id = %walk.id, "walk changed during sweep");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(delayed)
    }

    /// Open walks, most recently started first
    pub async fn active(
        &self,
        actor: &Actor,
        hostel_id: Option<&str>,
    ) -> Result<Vec<SafeWalkSession>, AppError> {
        require(actor, Permission::MonitorWalks)?;
        let mut walks: Vec<SafeWalkSession> =
            query_as(self.store.as_ref(), SAFE_WALKS, &open_filters(hostel_id)).await?;
        sort_newest_started(&mut walks);
        Ok(walks)
    }

    pub fn subscribe_active(
        &self,
        actor: &Actor,
        hostel_id: Option<&str>,
    ) -> Result<ActiveWalkFeed, AppError> {
        require(actor, Permission::MonitorWalks)?;
        Ok(ActiveWalkFeed {
            inner: QuerySubscription::new(self.store.clone(), SAFE_WALKS, open_filters(hostel_id)),
        })
    }
}

/// Sorted snapshots of the open walks
pub struct ActiveWalkFeed {
    inner: QuerySubscription,
}

impl ActiveWalkFeed {
    pub async fn next(&mut self) -> Option<Result<Vec<SafeWalkSession>, AppError>> {
        let snapshot = self.inner.next().await?;
        Some(snapshot.and_then(|documents| {
            let mut walks = documents
                .into_iter()
                .map(|document| decode::<SafeWalkSession>(document.data))
                .collect::<Result<Vec<_>, _>>()?;
            sort_newest_started(&mut walks);
            Ok(walks)
        }))
    }
}

fn open_filters(hostel_id: Option<&str>) -> Vec<Filter> {
    let open = SafeWalkStatus::OPEN
        .iter()
        .map(|status| Value::from(status.as_str()))
        .collect();
    let mut filters = vec![Filter::one_of("status", open)];
    if let Some(hostel_id) = hostel_id {
        filters.push(Filter::eq("hostelId", hostel_id));
    }
    filters
}

fn sort_newest_started(walks: &mut [SafeWalkSession]) {
    walks.sort_by(|a, b| b.start_time.cmp(&a.start_time));
}
