// ============================
// crates/backend-lib/src/auth/session.rs
// ============================
//! SOS session tokens: issue, validate and deactivate.
use super::token_generator::{sos_token, DEFAULT_TOKEN_BYTES};
use crate::error::AppError;
use crate::metrics::SOS_TOKEN_REJECTED;
use crate::store::{get_as, DocumentStore, FieldUpdate, StoreResult, WriteOp, SOS_SESSIONS};
use campus_safety_common::SosSession;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::sync::Arc;

/// Default session TTL in hours
pub const SESSION_TTL_HOURS: i64 = 48;

/// Issues and checks the per-episode secrets stored in `sos_sessions`
#[derive(Clone)]
pub struct SessionTokens {
    store: Arc<dyn DocumentStore>,
    ttl: Option<Duration>,
    token_bytes: usize,
}

impl SessionTokens {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            ttl: Some(Duration::hours(SESSION_TTL_HOURS)),
            token_bytes: DEFAULT_TOKEN_BYTES,
        }
    }

    /// `None` disables expiry
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_token_bytes(mut self, bytes: usize) -> Self {
        self.token_bytes = bytes;
        self
    }

    pub fn generate(&self) -> String {
        sos_token(self.token_bytes)
    }

    /// Build the session document for a new episode; the caller commits it
    pub fn issue(
        &self,
        sos_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SosSession, AppError> {
        let expires_at = match self.ttl {
            Some(ttl) => Some(now.checked_add_signed(ttl).ok_or_else(|| {
                AppError::Internal("SOS session expiry out of range".to_string())
            })?),
            None => None,
        };
        Ok(SosSession {
            sos_id: sos_id.to_string(),
            user_id: user_id.to_string(),
            token: self.generate(),
            is_active: true,
            created_at: now,
            expires_at,
            stopped_at: None,
        })
    }

    pub async fn validate(&self, sos_id: &str, presented: &str) -> StoreResult<bool> {
        self.validate_at(sos_id, presented, Utc::now()).await
    }

    /// True only for an existing, active, unexpired session whose token matches
    pub async fn validate_at(
        &self,
        sos_id: &str,
        presented: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let session: Option<SosSession> = get_as(self.store.as_ref(), SOS_SESSIONS, sos_id).await?;
        Ok(session.is_some_and(|session| accepts(&session, presented, now)))
    }

    /// Return the session or the one generic token error
    pub async fn authorize(&self, sos_id: &str, presented: &str) -> Result<SosSession, AppError> {
        let session: Option<SosSession> = get_as(self.store.as_ref(), SOS_SESSIONS, sos_id).await?;
        match session {
            Some(session) if accepts(&session, presented, Utc::now()) => Ok(session),
            _ => {
                counter!(SOS_TOKEN_REJECTED).increment(1);
                tracing::warn!(sos_id, "rejected SOS token");
                Err(AppError::InvalidToken)
            },
        }
    }

    /// Write op flipping `isActive` off; combined with the event update in one commit
    pub fn deactivate_op(sos_id: &str) -> WriteOp {
        WriteOp::update(
            SOS_SESSIONS,
            sos_id,
            vec![
                FieldUpdate::set("isActive", false),
                FieldUpdate::server_timestamp("stoppedAt"),
            ],
        )
    }
}

fn accepts(session: &SosSession, presented: &str, now: DateTime<Utc>) -> bool {
    // evaluate every check so timing does not reveal which one failed
    let matches = constant_time_eq(session.token.as_bytes(), presented.as_bytes());
    let live = session.is_active & !session.is_expired_at(now);
    matches & live
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
