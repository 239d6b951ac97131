// ================
// crates/common/src/lib.rs
// ================
//! Common types shared between campus safety clients and the backend.
//!
//! Documents are serialized with camelCase field names; the backend's
//! document store addresses fields by those names (e.g. `status.resolved`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier issued by the auth provider
pub type UserId = String;
/// Opaque SOS event identifier (also the key of its session document)
pub type SosId = String;
/// Opaque safe walk identifier
pub type WalkId = String;

/// Closed set of roles an actor can hold
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Student,
    Warden,
    Security,
    Admin,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Student => "student",
            ActorRole::Warden => "warden",
            ActorRole::Security => "security",
            ActorRole::Admin => "admin",
        }
    }

    /// Roles that respond to alerts rather than raise them
    pub fn is_responder(self) -> bool {
        match self {
            ActorRole::Warden | ActorRole::Security | ActorRole::Admin => true,
            ActorRole::Student => false,
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

/// Point-in-time copy of an actor stored on a document
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActorSnapshot {
    pub id: UserId,
    pub name: String,
    pub role: ActorRole,
}

/// A WGS84 coordinate with an optional human readable address
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            address: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A coordinate with a display name, used for walk endpoints
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NamedPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub name: Option<String>,
}

impl NamedPoint {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

// ---------------------------------------------------------------------------
// SOS
// ---------------------------------------------------------------------------

/// Two independent, monotonic flags. `resolved` without `recognised` is legal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SosStatus {
    pub recognised: bool,
    pub resolved: bool,
}

/// One audit trail entry. Entries are only ever appended.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub time: DateTime<Utc>,
    pub action: String,
    pub by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TimelineEntry {
    pub fn new(action: impl Into<String>, by: impl Into<String>, note: Option<String>) -> Self {
        Self {
            time: Utc::now(),
            action: action.into(),
            by: by.into(),
            note,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyType {
    Medical,
    Harassment,
    #[default]
    Other,
    General,
}

impl fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmergencyType::Medical => "medical",
            EmergencyType::Harassment => "harassment",
            EmergencyType::Other => "other",
            EmergencyType::General => "general",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMethod {
    #[default]
    ManualGesture,
    Shake,
    Voice,
    Button,
}

impl fmt::Display for TriggerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerMethod::ManualGesture => "manual_gesture",
            TriggerMethod::Shake => "shake",
            TriggerMethod::Voice => "voice",
            TriggerMethod::Button => "button",
        };
        f.write_str(s)
    }
}

/// One emergency episode. Never hard-deleted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SosEvent {
    pub id: SosId,
    pub user_id: UserId,
    /// Username for students, real name for staff
    pub user_name: String,
    pub user_phone: String,
    pub role: ActorRole,
    pub hostel_id: Option<String>,
    pub room_number: String,

    pub status: SosStatus,
    pub recognised_by: Option<UserId>,
    pub assigned_to: Option<ActorSnapshot>,

    pub location: GeoPoint,
    pub live_location: GeoPoint,

    pub timeline: Vec<TimelineEntry>,

    pub emergency_type: EmergencyType,
    pub trigger_method: TriggerMethod,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub voice_transcript: Option<String>,
    #[serde(default)]
    pub is_details_added: bool,

    /// Client clock, used for ordering
    pub triggered_at: DateTime<Utc>,
    /// Server clock
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_summary: Option<String>,

    #[serde(default)]
    pub notification_sent: bool,
}

impl SosEvent {
    pub fn is_active(&self) -> bool {
        !self.status.resolved
    }

    pub fn is_in_progress(&self) -> bool {
        self.status.recognised && !self.status.resolved
    }
}

/// Secret paired 1:1 with an [`SosEvent`]; lets a logged-out device act on it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SosSession {
    pub sos_id: SosId,
    pub user_id: UserId,
    pub token: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl SosSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

/// Profile document read when an SOS is raised. Every field is optional.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub role: Option<ActorRole>,
    #[serde(default)]
    pub hostel_id: Option<String>,
    #[serde(default)]
    pub room_no: Option<String>,
    #[serde(default)]
    pub fcm_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Live location
// ---------------------------------------------------------------------------

/// Last known position of a user. One record per user, overwritten in place.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sos_id: Option<SosId>,
}

impl LiveLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// A single position fix reported by a device
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed: None,
            heading: None,
            accuracy: None,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Freshness of a [`LiveLocation`]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocationStatus {
    Active,
    Stale,
    Offline,
}

// ---------------------------------------------------------------------------
// Safe walk
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafeWalkStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "delayed")]
    Delayed,
    #[serde(rename = "off-route")]
    OffRoute,
    #[serde(rename = "danger")]
    Danger,
    #[serde(rename = "escort_requested")]
    EscortRequested,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "sos")]
    Sos,
}

impl SafeWalkStatus {
    pub const OPEN: [SafeWalkStatus; 6] = [
        SafeWalkStatus::Active,
        SafeWalkStatus::Paused,
        SafeWalkStatus::Delayed,
        SafeWalkStatus::OffRoute,
        SafeWalkStatus::Danger,
        SafeWalkStatus::EscortRequested,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SafeWalkStatus::Active => "active",
            SafeWalkStatus::Paused => "paused",
            SafeWalkStatus::Delayed => "delayed",
            SafeWalkStatus::OffRoute => "off-route",
            SafeWalkStatus::Danger => "danger",
            SafeWalkStatus::EscortRequested => "escort_requested",
            SafeWalkStatus::Completed => "completed",
            SafeWalkStatus::Cancelled => "cancelled",
            SafeWalkStatus::Sos => "sos",
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            SafeWalkStatus::Completed | SafeWalkStatus::Cancelled | SafeWalkStatus::Sos => true,
            SafeWalkStatus::Active
            | SafeWalkStatus::Paused
            | SafeWalkStatus::Delayed
            | SafeWalkStatus::OffRoute
            | SafeWalkStatus::Danger
            | SafeWalkStatus::EscortRequested => false,
        }
    }

    /// Statuses that hand the walk over to the SOS lifecycle
    pub fn escalates(self) -> bool {
        matches!(self, SafeWalkStatus::Danger | SafeWalkStatus::Sos)
    }

    pub fn can_transition_to(self, next: SafeWalkStatus) -> bool {
        !self.is_terminal() && self != next
    }
}

impl fmt::Display for SafeWalkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WalkEntryKind {
    Status,
    Message,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalkTimelineEntry {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: WalkEntryKind,
    pub details: String,
    pub by: String,
}

impl WalkTimelineEntry {
    pub fn new(kind: WalkEntryKind, details: impl Into<String>, by: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            kind,
            details: details.into(),
            by: by.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SafeWalkSession {
    pub id: WalkId,
    pub user_id: UserId,
    pub user_name: String,
    #[serde(default)]
    pub hostel_id: Option<String>,
    pub start_location: NamedPoint,
    pub destination: NamedPoint,
    pub status: SafeWalkStatus,
    /// Minutes
    pub expected_duration: u32,
    #[serde(default)]
    pub note: Option<String>,
    pub start_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub escort_requested: bool,
    #[serde(default)]
    pub assigned_escort: Option<String>,
    #[serde(default)]
    pub timeline: Vec<WalkTimelineEntry>,
    #[serde(default)]
    pub last_distance_to_destination: Option<f64>,
    #[serde(default)]
    pub linked_sos_id: Option<SosId>,
}

impl SafeWalkSession {
    pub fn expected_end(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(i64::from(self.expected_duration))
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expected_end()
    }
}

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub location: GeoPoint,
    #[serde(default)]
    pub emergency_type: EmergencyType,
    #[serde(default)]
    pub trigger_method: TriggerMethod,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub sos_id: SosId,
    pub sos_token: String,
}

/// Post-trigger enrichment. Every call replaces all three fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SosDetails {
    pub emergency_type: EmergencyType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub voice_transcript: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResolveRequest {
    pub summary: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenLocationUpdate {
    pub sos_id: SosId,
    pub sos_token: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenCancelRequest {
    pub sos_id: SosId,
    pub sos_token: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StartWalkRequest {
    pub start_location: NamedPoint,
    pub destination: NamedPoint,
    pub expected_duration: u32,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WalkStatusRequest {
    pub status: SafeWalkStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssignEscortRequest {
    pub escort_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WalkMessageRequest {
    pub message: String,
}

/// Result of reporting a walk position
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OffRouteCheck {
    /// Meters to destination
    pub current_distance: f64,
    pub is_off_route: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub const OK: Ack = Ack { success: true };
}

/// Pushed over the live feeds
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedMessage {
    ActiveSos {
        events: Vec<SosEvent>,
    },
    ActiveWalks {
        walks: Vec<SafeWalkSession>,
    },
    Location {
        #[serde(rename = "userId")]
        user_id: UserId,
        location: Option<LiveLocation>,
        status: Option<LocationStatus>,
    },
    Error {
        code: String,
        message: String,
    },
}
