// ============================
// crates/backend-lib/src/sos/manager.rs
// ============================
//! Device-side orchestration around [`SosService`]: keeps the recovery
//! pointers in local storage and drives the background tracker.
use super::{Resolution, SosService};
use crate::bridge::{BackgroundTracker, TrackingRequest};
use crate::error::AppError;
use crate::local_store::RecoveryStore;
use campus_safety_common::{Actor, SosEvent, TokenCancelRequest, TriggerRequest, TriggerResponse};
use std::sync::Arc;

/// What [`SosManager::recover`] found and did at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No local SOS and no tracker running
    Nothing,
    /// Tracker was running without a local SOS and has been stopped
    StoppedOrphan,
    /// Local SOS is no longer valid; local state cleared
    Cleared { sos_id: String },
    /// Local SOS is valid and already tracked
    AlreadyRunning { sos_id: String },
    /// Local SOS is valid and tracking was restarted
    Resumed { sos_id: String },
    /// Local SOS is valid but the tracker refused to start
    TrackingUnavailable { sos_id: String },
}

pub struct SosManager {
    service: Arc<SosService>,
    recovery: RecoveryStore,
    tracker: Arc<dyn BackgroundTracker>,
}

impl SosManager {
    pub fn new(
        service: Arc<SosService>,
        recovery: RecoveryStore,
        tracker: Arc<dyn BackgroundTracker>,
    ) -> Self {
        Self {
            service,
            recovery,
            tracker,
        }
    }

    pub fn service(&self) -> &Arc<SosService> {
        &self.service
    }

    /// Raise an SOS and start tracking. A duplicate trigger resumes tracking of
    /// the existing event when this device still holds its token.
    pub async fn trigger(
        &self,
        actor: &Actor,
        auth_token: Option<String>,
        request: TriggerRequest,
    ) -> Result<TriggerResponse, AppError> {
        match self.service.open(actor, request).await {
            Ok(response) => {
                if let Err(e) = self.recovery.remember(&response.sos_id, &response.sos_token) {
                    tracing::warn!(sos_id = %response.sos_id, error = %e, "could not persist SOS recovery state");
                }
                self.start_tracking(TrackingRequest {
                    sos_id: response.sos_id.clone(),
                    sos_token: response.sos_token.clone(),
                    auth_token,
                    user_id: actor.id.clone(),
                })
                .await;
                Ok(response)
            },
            Err(AppError::AlreadyActive { sos_id, .. }) => {
                let tracking_resumed = self.resume(&sos_id, &actor.id, auth_token).await;
                Err(AppError::AlreadyActive {
                    sos_id,
                    tracking_resumed,
                })
            },
            Err(e) => Err(e),
        }
    }

    async fn resume(&self, sos_id: &str, user_id: &str, auth_token: Option<String>) -> bool {
        let token = match self.recovery.token_for(sos_id) {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::info!(sos_id, "active SOS has no local token, cannot resume tracking");
                return false;
            },
            Err(e) => {
                tracing::warn!(sos_id, error = %e, "failed to read local SOS token");
                return false;
            },
        };
        if let Err(e) = self.recovery.remember(sos_id, &token) {
            tracing::warn!(sos_id, error = %e, "could not refresh active SOS pointer");
        }
        self.start_tracking(TrackingRequest {
            sos_id: sos_id.to_string(),
            sos_token: token,
            auth_token,
            user_id: user_id.to_string(),
        })
        .await
    }

    async fn start_tracking(&self, request: TrackingRequest) -> bool {
        let sos_id = request.sos_id.clone();
        match self.tracker.start(request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%sos_id, error = %e, "background tracking did not start");
                false
            },
        }
    }

    async fn stop_tracking(&self) {
        if let Err(e) = self.tracker.stop().await {
            tracing::warn!(error = %e, "failed to stop background tracking");
        }
    }

    fn clear_local(&self, sos_id: &str) {
        if let Err(e) = self.recovery.forget(sos_id) {
            tracing::warn!(sos_id, error = %e, "failed to clear local SOS state");
        }
    }

    pub async fn resolve(
        &self,
        actor: &Actor,
        sos_id: &str,
        summary: &str,
    ) -> Result<Resolution, AppError> {
        let resolution = self.service.resolve(actor, sos_id, summary).await?;
        self.clear_local(sos_id);
        self.stop_tracking().await;
        Ok(resolution)
    }

    /// Cancel as the signed-in owner, or with the locally stored token when signed out.
    /// Cancelling an event someone else already closed just cleans up this device.
    pub async fn cancel(&self, actor: Option<&Actor>, sos_id: &str) -> Result<Resolution, AppError> {
        let outcome = match actor {
            Some(actor) => self.service.cancel_by_owner(actor, sos_id).await,
            None => {
                let sos_token = self
                    .recovery
                    .token_for(sos_id)?
                    .ok_or(AppError::InvalidToken)?;
                self.service
                    .cancel_with_token(TokenCancelRequest {
                        sos_id: sos_id.to_string(),
                        sos_token,
                        summary: None,
                    })
                    .await
            },
        };

        let resolution = match outcome {
            Ok(resolution) => resolution,
            Err(e @ (AppError::InvalidToken | AppError::AlreadyResolved)) => {
                if !self.closed_remotely(sos_id).await {
                    return Err(e);
                }
                tracing::info!(sos_id, "SOS already closed, clearing local state");
                Resolution::AlreadyResolved
            },
            Err(e) => return Err(e),
        };
        self.clear_local(sos_id);
        self.stop_tracking().await;
        Ok(resolution)
    }

    async fn closed_remotely(&self, sos_id: &str) -> bool {
        match self.service.load(sos_id).await {
            Ok(event) => event.status.resolved,
            Err(e) => {
                tracing::warn!(sos_id, error = %e, "could not check SOS after failed cancel");
                false
            },
        }
    }

    /// Reconcile local state with the server after an app restart.
    /// Store failures propagate and leave local state untouched.
    pub async fn recover(&self) -> Result<RecoveryOutcome, AppError> {
        let running = match self.tracker.is_running().await {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(error = %e, "could not query background tracker");
                false
            },
        };

        let Some(sos_id) = self.recovery.active_id()? else {
            if running {
                tracing::info!("stopping tracker with no local SOS");
                self.stop_tracking().await;
                return Ok(RecoveryOutcome::StoppedOrphan);
            }
            return Ok(RecoveryOutcome::Nothing);
        };

        let token = self.recovery.token_for(&sos_id)?;
        let valid = match &token {
            Some(token) => self.service.tokens().validate(&sos_id, token).await?,
            None => false,
        };

        let (Some(token), true) = (token, valid) else {
            tracing::info!(%sos_id, "local SOS is no longer active, clearing");
            self.recovery.forget(&sos_id)?;
            self.recovery.clear_active()?;
            if running {
                self.stop_tracking().await;
            }
            return Ok(RecoveryOutcome::Cleared { sos_id });
        };

        if running {
            return Ok(RecoveryOutcome::AlreadyRunning { sos_id });
        }

        let Some(session) = self.service.session(&sos_id).await? else {
            return Ok(RecoveryOutcome::TrackingUnavailable { sos_id });
        };
        let started = self
            .start_tracking(TrackingRequest {
                sos_id: sos_id.clone(),
                sos_token: token,
                auth_token: None,
                user_id: session.user_id,
            })
            .await;

        Ok(if started {
            tracing::info!(%sos_id, "resumed background tracking");
            RecoveryOutcome::Resumed { sos_id }
        } else {
            RecoveryOutcome::TrackingUnavailable { sos_id }
        })
    }

    /// React to a pushed copy of an event. Returns true when local state was cleared.
    pub async fn observe(&self, event: &SosEvent) -> Result<bool, AppError> {
        if !event.status.resolved || self.recovery.active_id()?.as_deref() != Some(event.id.as_str()) {
            return Ok(false);
        }
        tracing::info!(sos_id = %event.id, "own SOS resolved remotely");
        self.recovery.forget(&event.id)?;
        self.stop_tracking().await;
        Ok(true)
    }
}
