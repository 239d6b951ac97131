// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! WebSocket live feeds: active SOS events, open walks and per-user location.
//!
//! Browsers cannot set headers on a WebSocket handshake, so the bearer
//! credential travels as `?token=`.
use crate::auth::{require_owner_or, Permission};
use crate::error::AppError;
use crate::metrics::WS_ACTIVE;
use crate::routes::ValidId;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use campus_safety_common::FeedMessage;
use futures_util::stream::{self, SplitSink};
use futures_util::{SinkExt, Stream, StreamExt};
use metrics::gauge;
use serde::Deserialize;
use std::pin::pin;
use std::sync::Arc;
use uuid::Uuid;

/// Feed routes, merged into the application router
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/sos", get(sos_feed))
        .route("/ws/walks", get(walk_feed))
        .route("/ws/location/{user_id}", get(location_feed))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub token: String,
    #[serde(default)]
    pub hostel_id: Option<String>,
}

/// Snapshots of unresolved SOS events for responders
pub async fn sos_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, AppError> {
    let actor = state.identity.verify(&query.token).await?;
    let feed = state.sos.subscribe_active(&actor, query.hostel_id.as_deref())?;
    tracing::info!(actor = %actor.id, hostel = ?query.hostel_id, "SOS feed connected");

    let messages = stream::unfold(feed, |mut feed| async move {
        let message = match feed.next().await? {
            Ok(events) => FeedMessage::ActiveSos { events },
            Err(e) => error_message(&e),
        };
        Some((message, feed))
    });
    Ok(ws.on_upgrade(move |socket| pump(socket, messages)))
}

/// Snapshots of open safe walks for responders
pub async fn walk_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, AppError> {
    let actor = state.identity.verify(&query.token).await?;
    let feed = state
        .walks
        .subscribe_active(&actor, query.hostel_id.as_deref())?;
    tracing::info!(actor = %actor.id, hostel = ?query.hostel_id, "walk feed connected");

    let messages = stream::unfold(feed, |mut feed| async move {
        let message = match feed.next().await? {
            Ok(walks) => FeedMessage::ActiveWalks { walks },
            Err(e) => error_message(&e),
        };
        Some((message, feed))
    });
    Ok(ws.on_upgrade(move |socket| pump(socket, messages)))
}

/// One user's live location. When the user watches their own record the
/// connection doubles as their presence: closing it clears the record.
pub async fn location_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ValidId(user_id): ValidId,
    Query(query): Query<FeedQuery>,
) -> Result<Response, AppError> {
    let actor = state.identity.verify(&query.token).await?;
    require_owner_or(&actor, &user_id, Permission::MonitorSos)?;
    let presence = (actor.id == user_id).then(|| Uuid::new_v4().to_string());

    Ok(ws.on_upgrade(move |socket| stream_location(socket, state, user_id, presence)))
}

async fn stream_location(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: String,
    presence: Option<String>,
) {
    if let Some(connection_id) = &presence {
        state.locations.remove_on_disconnect(&user_id, connection_id);
    }

    let (mut tx, mut rx) = socket.split();
    let mut watch = state.locations.subscribe(&user_id);
    // re-send on a timer as well so the freshness status ages on screen
    let mut ticker = tokio::time::interval(state.location_windows.active);
    gauge!(WS_ACTIVE).increment(1.0);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            changed = watch.changed() => {
                if changed.is_err() {
                    break;
                }
            },
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        }

        let location = watch.borrow_and_update().clone();
        let status = location
            .as_ref()
            .map(|location| state.location_windows.status(location));
        let message = FeedMessage::Location {
            user_id: user_id.clone(),
            location,
            status,
        };
        if send_json(&mut tx, &message).await.is_err() {
            break;
        }
    }

    gauge!(WS_ACTIVE).decrement(1.0);
    if let Some(connection_id) = presence {
        if let Err(e) = state.locations.disconnect(&connection_id).await {
            tracing::warn!(%user_id, error = %e, "failed to clear location on disconnect");
        }
    }
    tracing::debug!(%user_id, "location feed closed");
}

/// Forward `messages` until the stream ends or the client goes away
async fn pump<S>(socket: WebSocket, messages: S)
where
    S: Stream<Item = FeedMessage>,
{
    let mut messages = pin!(messages);
    let (mut tx, mut rx) = socket.split();
    gauge!(WS_ACTIVE).increment(1.0);

    loop {
        tokio::select! {
            next = messages.next() => {
                let Some(message) = next else { break };
                if send_json(&mut tx, &message).await.is_err() {
                    break;
                }
            },
            incoming = rx.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {},
            },
        }
    }

    gauge!(WS_ACTIVE).decrement(1.0);
}

async fn send_json(
    tx: &mut SplitSink<WebSocket, Message>,
    message: &FeedMessage,
) -> Result<(), AppError> {
    let json = serde_json::to_string(message)?;
    tx.send(Message::Text(json.into()))
        .await
        .map_err(|e| AppError::Internal(format!("websocket send failed: {e}")))
}

fn error_message(error: &AppError) -> FeedMessage {
    FeedMessage::Error {
        code: error.error_code().to_string(),
        message: error.sanitized_message(),
    }
}
