use crate::test_utils::*;
use axum::http::{Method, StatusCode};
use campus_safety_backend::auth::StaticIdentityProvider;
use campus_safety_backend::location::MemoryLocationStore;
use campus_safety_backend::store::MemoryDocumentStore;
use campus_safety_backend::{routes, AppState};
use serde_json::json;
use std::sync::Arc;

async fn trigger_over_http(app: &axum::Router) -> (String, String) {
    trigger_over_http_as(app, STUDENT_TOKEN).await
}

async fn trigger_over_http_as(app: &axum::Router, bearer: &str) -> (String, String) {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/sos",
        Some(bearer),
        Some(json!({
            "location": { "lat": 12.9716, "lng": 77.5946 },
            "emergencyType": "harassment",
            "triggerMethod": "shake"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["sosId"].as_str().unwrap().to_string(),
        body["sosToken"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_health_is_public() {
    let h = Harness::new();
    let (status, body) = call(&h.router(), Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_unknown_bearer_is_unauthorized() {
    let h = Harness::new();
    let app = h.router();

    let (status, body) = call(&app, Method::GET, "/api/sos/active", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_001");

    let (status, _) = call(&app, Method::GET, "/api/sos/active", Some("forged"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_full_lifecycle_over_http() {
    let h = Harness::new();
    let app = h.router();
    let (sos_id, _) = trigger_over_http(&app).await;

    // duplicate
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/sos",
        Some(STUDENT_TOKEN),
        Some(json!({ "location": { "lat": 12.9716, "lng": 77.5946 } })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SOS_001");
    assert_eq!(body["error"]["sosId"], sos_id.as_str());

    let (status, body) = call(&app, Method::GET, "/api/sos/active", Some(GUARD_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["emergencyType"], "harassment");

    let uri = format!("/api/sos/{sos_id}/recognise");
    let (status, _) = call(&app, Method::POST, &uri, Some(STUDENT_TOKEN), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::POST, &uri, Some(GUARD_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/sos/{sos_id}/acknowledge");
    let (status, _) = call(&app, Method::POST, &uri, Some(WARDEN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/sos/{sos_id}/resolve");
    let (status, _) = call(&app, Method::POST, &uri, Some(GUARD_TOKEN), Some(json!({ "summary": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = call(
        &app,
        Method::POST,
        &uri,
        Some(GUARD_TOKEN),
        Some(json!({ "summary": "Escorted back to hostel" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "alreadyResolved": false }));

    let (_, body) = call(
        &app,
        Method::POST,
        &uri,
        Some(WARDEN_TOKEN),
        Some(json!({ "summary": "Again" })),
    )
    .await;
    assert_eq!(body["alreadyResolved"], true);

    let (status, body) = call(&app, Method::GET, &format!("/api/sos/{sos_id}"), Some(STUDENT_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!({ "recognised": true, "resolved": true }));
    assert_eq!(body["timeline"].as_array().unwrap().len(), 4);

    let (_, body) = call(&app, Method::GET, "/api/sos/history", Some(WARDEN_TOKEN), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_ids_are_rejected_before_lookup() {
    let h = Harness::new();
    let app = h.router();

    let (status, body) = call(&app, Method::GET, "/api/sos/bad%20id", Some(GUARD_TOKEN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VAL_001");

    let (status, _) = call(&app, Method::GET, "/api/locations/u1%3Bdrop", Some(GUARD_TOKEN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // oversized ids never reach the lockout table
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/sos/token/cancel",
        None,
        Some(json!({ "sosId": "x".repeat(500), "sosToken": "guess" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.state.token_limiter.tracked_clients(), 0);
}

#[tokio::test]
async fn test_token_endpoints_need_no_bearer() {
    let h = Harness::new();
    let app = h.router();
    let (sos_id, sos_token) = trigger_over_http(&app).await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/sos/token/location",
        None,
        Some(json!({ "sosId": sos_id, "sosToken": sos_token, "latitude": 12.98, "longitude": 77.6 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/sos/token/cancel",
        None,
        Some(json!({ "sosId": sos_id, "sosToken": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid or expired SOS token");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/sos/token/cancel",
        None,
        Some(json!({ "sosId": sos_id, "sosToken": sos_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // the token died with the event
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/sos/token/location",
        None,
        Some(json!({ "sosId": sos_id, "sosToken": sos_token, "latitude": 1.0, "longitude": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_repeated_bad_tokens_lock_the_client_out() {
    let mut settings = test_settings();
    settings.rate_limit.max_token_failures = 3;
    let h = Harness::with_settings(settings);
    let app = h.router();
    let (sos_id, sos_token) = trigger_over_http(&app).await;

    for _ in 0..3 {
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/sos/token/cancel",
            None,
            Some(json!({ "sosId": sos_id, "sosToken": "guess" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // even the right token is refused while locked out
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/sos/token/cancel",
        None,
        Some(json!({ "sosId": sos_id, "sosToken": sos_token })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "AUTH_003");
    assert!(!h.state.sos.load(&sos_id).await.unwrap().status.resolved);
}

#[tokio::test]
async fn test_guessing_at_one_event_does_not_lock_out_another() {
    let h = Harness::new();
    let app = h.router();
    let (sos_id, sos_token) = trigger_over_http_as(&app, OTHER_STUDENT_TOKEN).await;

    // same client address, made-up event
    for _ in 0..h.state.settings.rate_limit.max_token_failures {
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/sos/token/cancel",
            None,
            Some(json!({ "sosId": "made-up", "sosToken": "guess" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/sos/token/cancel",
        None,
        Some(json!({ "sosId": "made-up", "sosToken": "guess" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/sos/token/location",
        None,
        Some(json!({ "sosId": sos_id, "sosToken": sos_token, "latitude": 12.98, "longitude": 77.6 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_safe_walk_over_http() {
    let h = Harness::new();
    let app = h.router();

    let (status, walk) = call(
        &app,
        Method::POST,
        "/api/walks",
        Some(STUDENT_TOKEN),
        Some(json!({
            "startLocation": { "lat": 21.0, "lng": 79.0, "name": "Library" },
            "destination": { "lat": 21.01, "lng": 79.0, "name": "Hostel A" },
            "expectedDuration": 20
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(walk["status"], "active");
    let walk_id = walk["id"].as_str().unwrap().to_string();

    let (status, check) = call(
        &app,
        Method::POST,
        &format!("/api/walks/{walk_id}/location"),
        Some(STUDENT_TOKEN),
        Some(json!({ "latitude": 21.005, "longitude": 79.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["isOffRoute"], false);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/walks/{walk_id}/messages"),
        Some(GUARD_TOKEN),
        Some(json!({ "message": "Camera 4 has you" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, change) = call(
        &app,
        Method::POST,
        &format!("/api/walks/{walk_id}/status"),
        Some(STUDENT_TOKEN),
        Some(json!({ "status": "danger" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(change["walk"]["status"], "sos");
    let sos_id = change["sosId"].as_str().unwrap();
    assert_eq!(change["walk"]["linkedSosId"], sos_id);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/walks/{walk_id}/status"),
        Some(STUDENT_TOKEN),
        Some(json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "WALK_002");

    let (_, location) = call(
        &app,
        Method::GET,
        "/api/locations/u1",
        Some(GUARD_TOKEN),
        None,
    )
    .await;
    assert_eq!(location["type"], "location");
    assert_eq!(location["status"], "active");
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let store = Arc::new(MemoryDocumentStore::new());
    let settings = test_settings();
    let identity = Arc::new(StaticIdentityProvider::from_settings(&settings.identities));
    let state = AppState::new(
        settings,
        store.clone(),
        Arc::new(MemoryLocationStore::new()),
        identity,
    );
    let app = routes::create_router(Arc::new(state));

    store.set_available(false);
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/sos",
        Some(STUDENT_TOKEN),
        Some(json!({ "location": { "lat": 1.0, "lng": 1.0 } })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "STORE_002");

    store.set_available(true);
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/sos",
        Some(STUDENT_TOKEN),
        Some(json!({ "location": { "lat": 1.0, "lng": 1.0 } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}
