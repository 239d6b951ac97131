use crate::test_utils::*;
use campus_safety_backend::error::AppError;
use campus_safety_backend::events::SafetyEvent;
use campus_safety_backend::sos::{Resolution, ACTION_DETAILS, ACTION_RECOGNISED, ACTION_RESOLVED, ACTION_TRIGGERED};
use campus_safety_common::{ActorRole, EmergencyType, SosDetails};
use futures_util::future::join_all;
use serde_json::json;

#[tokio::test]
async fn test_trigger_recognise_resolve_happy_path() {
    let h = Harness::new();
    let mut bus = h.state.events().subscribe();

    let response = h.trigger(&student()).await;
    h.state.sos.recognise(&guard(), &response.sos_id).await.unwrap();
    let resolution = h
        .state
        .sos
        .resolve(&guard(), &response.sos_id, "Escorted to clinic")
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::Resolved);

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(event.status.recognised);
    assert!(event.status.resolved);
    assert_eq!(event.recognised_by.as_deref(), Some("sec1"));
    let assigned = event.assigned_to.unwrap();
    assert_eq!(assigned.name, "Guard A");
    assert_eq!(assigned.role, ActorRole::Security);
    assert_eq!(event.resolution_summary.as_deref(), Some("Escorted to clinic"));
    assert!(event.resolved_at.is_some());

    let actions: Vec<_> = event.timeline.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, [ACTION_TRIGGERED, ACTION_RECOGNISED, ACTION_RESOLVED]);

    let session = h.state.sos.session(&response.sos_id).await.unwrap().unwrap();
    assert!(!session.is_active);

    match bus.recv().await.unwrap() {
        SafetyEvent::SosCreated { event } => assert_eq!(event.id, response.sos_id),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(bus.recv().await.unwrap(), SafetyEvent::SosRecognised { .. }));
    assert!(matches!(bus.recv().await.unwrap(), SafetyEvent::SosResolved { .. }));
}

#[tokio::test]
async fn test_duplicate_trigger_reports_existing_event() {
    let h = Harness::new();
    let first = h.trigger(&student()).await;

    match h.state.sos.open(&student(), trigger_at(1.0, 1.0)).await {
        Err(AppError::AlreadyActive { sos_id, .. }) => assert_eq!(sos_id, first.sos_id),
        other => panic!("expected AlreadyActive, got {other:?}"),
    }

    // another user is unaffected
    h.trigger(&other_student()).await;
}

#[tokio::test]
async fn test_concurrent_triggers_create_one_event() {
    let h = Harness::new();
    let actor = student();

    let attempts = join_all((0..8).map(|i| {
        let sos = h.state.sos.clone();
        let actor = actor.clone();
        async move { sos.open(&actor, trigger_at(1.0 + i as f64 * 0.001, 1.0)).await }
    }))
    .await;

    let created: Vec<_> = attempts.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(created.len(), 1);
    for attempt in &attempts {
        if let Err(e) = attempt {
            assert!(matches!(e, AppError::AlreadyActive { .. }), "unexpected error: {e:?}");
        }
    }

    let active = h.state.sos.active(&guard(), None).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, created[0].sos_id);
}

#[tokio::test]
async fn test_new_trigger_allowed_after_resolution() {
    let h = Harness::new();
    let first = h.trigger(&student()).await;
    h.state
        .sos
        .resolve(&warden(), &first.sos_id, "False alarm")
        .await
        .unwrap();

    let second = h.trigger(&student()).await;
    assert_ne!(first.sos_id, second.sos_id);
    let found = h.state.sos.find_active("u1").await.unwrap().unwrap();
    assert_eq!(found.id, second.sos_id);
}

#[tokio::test]
async fn test_flags_never_revert() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;
    h.state.sos.recognise(&guard(), &response.sos_id).await.unwrap();
    h.state
        .sos
        .resolve(&guard(), &response.sos_id, "Handled")
        .await
        .unwrap();

    // later writes cannot flip anything back
    assert!(matches!(
        h.state.sos.recognise(&guard(), &response.sos_id).await,
        Err(AppError::AlreadyResolved)
    ));
    assert_eq!(
        h.state
            .sos
            .resolve(&guard(), &response.sos_id, "Again")
            .await
            .unwrap(),
        Resolution::AlreadyResolved
    );

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(event.status.recognised && event.status.resolved);
    assert_eq!(event.resolution_summary.as_deref(), Some("Handled"));
    assert_eq!(event.timeline.len(), 3);
}

#[tokio::test]
async fn test_concurrent_resolves_close_once() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;

    let outcomes = join_all([guard(), warden()].into_iter().map(|actor| {
        let sos = h.state.sos.clone();
        let sos_id = response.sos_id.clone();
        async move { sos.resolve(&actor, &sos_id, "Done").await }
    }))
    .await;

    let resolved = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(Resolution::Resolved)))
        .count();
    assert_eq!(resolved, 1);

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    let closes = event
        .timeline
        .iter()
        .filter(|entry| entry.action == ACTION_RESOLVED)
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_details_appends_one_entry_per_call() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;

    for description in ["Feeling dizzy", "Now in corridor B"] {
        h.state
            .sos
            .update_details(
                &student(),
                &response.sos_id,
                SosDetails {
                    emergency_type: EmergencyType::Medical,
                    description: Some(description.to_string()),
                    voice_transcript: None,
                },
            )
            .await
            .unwrap();
    }

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(event.is_details_added);
    assert_eq!(event.emergency_type, EmergencyType::Medical);
    assert_eq!(event.description.as_deref(), Some("Now in corridor B"));
    let details = event
        .timeline
        .iter()
        .filter(|entry| entry.action == ACTION_DETAILS)
        .count();
    assert_eq!(details, 2);
}

#[tokio::test]
async fn test_profile_snapshot_is_copied_onto_event() {
    let h = Harness::new();
    h.seed_profile(
        "u1",
        json!({
            "name": "Alice Kumar",
            "username": "alice.k",
            "phoneNumber": "+91 98450 00000",
            "role": "student",
            "hostelId": "H1",
            "roomNo": "204"
        }),
    )
    .await;

    let response = h.trigger(&student()).await;
    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert_eq!(event.user_name, "alice.k");
    assert_eq!(event.user_phone, "+91 98450 00000");
    assert_eq!(event.hostel_id.as_deref(), Some("H1"));
    assert_eq!(event.room_number, "204");

    let in_hostel = h.state.sos.active(&warden(), Some("H1")).await.unwrap();
    assert_eq!(in_hostel.len(), 1);
    let elsewhere = h.state.sos.active(&warden(), Some("H2")).await.unwrap();
    assert!(elsewhere.is_empty());
}

#[tokio::test]
async fn test_students_cannot_read_others_or_list() {
    let h = Harness::new();
    let response = h.trigger(&student()).await;

    assert!(h.state.sos.get(&student(), &response.sos_id).await.is_ok());
    assert!(matches!(
        h.state.sos.get(&other_student(), &response.sos_id).await,
        Err(AppError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.state.sos.active(&student(), None).await,
        Err(AppError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.state.sos.cancel_by_owner(&other_student(), &response.sos_id).await,
        Err(AppError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn test_active_feed_drops_resolved_events() {
    let h = Harness::new();
    let mut feed = h.state.sos.subscribe_active(&guard(), None).unwrap();
    assert!(feed.next().await.unwrap().unwrap().is_empty());

    let response = h.trigger(&student()).await;
    let mut snapshot = feed.next().await.unwrap().unwrap();
    while snapshot.is_empty() {
        snapshot = feed.next().await.unwrap().unwrap();
    }
    assert_eq!(snapshot[0].id, response.sos_id);

    h.state
        .sos
        .resolve(&guard(), &response.sos_id, "Done")
        .await
        .unwrap();
    let mut snapshot = feed.next().await.unwrap().unwrap();
    while !snapshot.is_empty() {
        snapshot = feed.next().await.unwrap().unwrap();
    }
    assert!(snapshot.is_empty());
}
