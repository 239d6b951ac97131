use crate::test_utils::*;
use campus_safety_backend::error::AppError;
use campus_safety_backend::location::LocationStore;
use campus_safety_backend::sos::{Resolution, ACTION_CANCELLED_TOKEN, CANCEL_SUMMARY};
use campus_safety_common::{TokenCancelRequest, TokenLocationUpdate};

fn cancel_request(sos_id: &str, token: &str) -> TokenCancelRequest {
    TokenCancelRequest {
        sos_id: sos_id.to_string(),
        sos_token: token.to_string(),
        summary: None,
    }
}

#[tokio::test]
async fn test_issued_token_validates_until_cancel() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;
    let tokens = h.state.sos.tokens();

    assert!(tokens.validate(&response.sos_id, &response.sos_token).await.unwrap());
    assert!(!tokens.validate(&response.sos_id, "not-the-token").await.unwrap());
    assert!(!tokens.validate("no-such-event", &response.sos_token).await.unwrap());

    let resolution = h
        .state
        .sos
        .cancel_with_token(cancel_request(&response.sos_id, &response.sos_token))
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::Resolved);
    assert!(!tokens.validate(&response.sos_id, &response.sos_token).await.unwrap());

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(event.status.resolved);
    assert_eq!(event.resolution_summary.as_deref(), Some(CANCEL_SUMMARY));
    let last = event.timeline.last().unwrap();
    assert_eq!(last.action, ACTION_CANCELLED_TOKEN);
    assert_eq!(last.by, "u1");

    // the user may trigger again once cancelled
    h.trigger(&student()).await;
}

#[tokio::test]
async fn test_wrong_token_changes_nothing() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;

    let err = h
        .state
        .sos
        .cancel_with_token(cancel_request(&response.sos_id, "guess"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidToken));

    let err = h
        .state
        .sos
        .update_location_with_token(TokenLocationUpdate {
            sos_id: response.sos_id.clone(),
            sos_token: "guess".into(),
            latitude: 10.0,
            longitude: 10.0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidToken));

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(!event.status.resolved);
    assert_eq!(event.live_location.lat, 12.9716);
}

#[tokio::test]
async fn test_token_location_updates_event_and_live_record() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;

    h.state
        .sos
        .update_location_with_token(TokenLocationUpdate {
            sos_id: response.sos_id.clone(),
            sos_token: response.sos_token.clone(),
            latitude: 12.9800,
            longitude: 77.6000,
        })
        .await
        .unwrap();

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert_eq!(event.live_location.lat, 12.9800);
    assert_eq!(event.live_location.lng, 77.6000);
    // the trigger point itself is kept
    assert_eq!(event.location.lat, 12.9716);

    let live = h.state.locations.get("u1").await.unwrap().unwrap();
    assert_eq!(live.latitude, 12.9800);
    assert_eq!(live.sos_id.as_deref(), Some(response.sos_id.as_str()));
}

#[tokio::test]
async fn test_token_rejected_after_responder_resolves() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;
    h.state
        .sos
        .resolve(&guard(), &response.sos_id, "Handled")
        .await
        .unwrap();

    let err = h
        .state
        .sos
        .update_location_with_token(TokenLocationUpdate {
            sos_id: response.sos_id.clone(),
            sos_token: response.sos_token.clone(),
            latitude: 1.0,
            longitude: 1.0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidToken));
}

#[tokio::test]
async fn test_expired_session_rejects_token() {
    let mut settings = test_settings();
    settings.sos.session_ttl_secs = Some(1);
    let h = Harness::with_settings(settings);
    let response = h.trigger(&student()).await;

    let later = chrono::Utc::now() + chrono::Duration::seconds(5);
    assert!(!h
        .state
        .sos
        .tokens()
        .validate_at(&response.sos_id, &response.sos_token, later)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_tokens_are_unique_and_long() {
    let h = Harness::new();
    let a = h.trigger(&student()).await;
    let b = h.trigger(&other_student()).await;
    assert_ne!(a.sos_token, b.sos_token);
    // 32 bytes of entropy, base64 encoded
    assert!(a.sos_token.len() >= 43);
}
