// ============================
// crates/backend-lib/src/bridge.rs
// ============================
//! Port to the native background location service.
use crate::error::AppError;
use async_trait::async_trait;
use campus_safety_common::{SosId, UserId};

/// Everything the native service needs to keep reporting after logout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRequest {
    pub sos_id: SosId,
    pub sos_token: String,
    /// Bearer credential of the owner, when the device still has one
    pub auth_token: Option<String>,
    pub user_id: UserId,
}

/// Native background tracking service. Callers treat every failure as non-fatal.
#[async_trait]
pub trait BackgroundTracker: Send + Sync {
    async fn start(&self, request: TrackingRequest) -> Result<(), AppError>;

    async fn stop(&self) -> Result<(), AppError>;

    async fn is_running(&self) -> Result<bool, AppError>;
}

/// Tracker for hosts without a native service; web geolocation is the fallback there
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTracker;

#[async_trait]
impl BackgroundTracker for UnavailableTracker {
    async fn start(&self, request: TrackingRequest) -> Result<(), AppError> {
        Err(AppError::Internal(format!(
            "background tracking is not available on this host (sos {})",
            request.sos_id
        )))
    }

    async fn stop(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn is_running(&self) -> Result<bool, AppError> {
        Ok(false)
    }
}
