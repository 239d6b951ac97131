use crate::test_utils::*;
use campus_safety_backend::dispatch::NotificationDispatcher;
use campus_safety_backend::events::EVENT_CAPACITY;
use campus_safety_common::{Actor, ActorRole};
use serde_json::json;
use std::sync::Arc;

async fn seed_campus(h: &Harness) {
    h.seed_profile(
        "u1",
        json!({ "username": "alice.k", "role": "student", "hostelId": "H1", "roomNo": "12" }),
    )
    .await;
    h.seed_profile("sec1", json!({ "name": "Guard A", "role": "security", "fcmToken": "fcm-sec1" }))
        .await;
    h.seed_profile("sec2", json!({ "name": "Guard B", "role": "security", "fcmToken": "fcm-sec2" }))
        .await;
    // no device registered
    h.seed_profile("sec3", json!({ "name": "Guard C", "role": "security" })).await;
    h.seed_profile(
        "w1",
        json!({ "name": "Warden W", "role": "warden", "hostelId": "H1", "fcmToken": "fcm-w1" }),
    )
    .await;
    h.seed_profile(
        "w2",
        json!({ "name": "Warden X", "role": "warden", "hostelId": "H2", "fcmToken": "fcm-w2" }),
    )
    .await;
}

#[tokio::test]
async fn test_new_sos_alerts_security_and_hostel_wardens() {
    let h = Harness::new();
    seed_campus(&h).await;
    let push = Arc::new(RecordingPushSender::default());
    let dispatcher = Arc::new(NotificationDispatcher::new(h.state.store.clone(), push.clone()));
    let _consumer = dispatcher.spawn(h.state.events());

    let response = h.trigger(&student()).await;
    wait_briefly(100).await;

    let sent = push.sent.lock().clone();
    let mut recipients: Vec<String> = sent.iter().flat_map(|(tokens, _)| tokens.clone()).collect();
    recipients.sort();
    assert_eq!(recipients, ["fcm-sec1", "fcm-sec2", "fcm-w1"]);

    let (_, message) = &sent[0];
    assert_eq!(message.title, "SOS ALERT");
    assert_eq!(message.body, "Emergency at Unknown Location! Student: alice.k");
    assert_eq!(message.data["type"], "SOS_ALERT");
    assert_eq!(message.data["eventId"], response.sos_id);

    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(event.notification_sent);
}

#[tokio::test]
async fn test_push_failure_still_marks_event() {
    let h = Harness::new();
    seed_campus(&h).await;
    let push = Arc::new(RecordingPushSender {
        fail: true,
        ..Default::default()
    });
    let dispatcher = NotificationDispatcher::new(h.state.store.clone(), push);

    let response = h.trigger(&student()).await;
    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert_eq!(dispatcher.dispatch(&event).await.unwrap(), 0);
    assert!(h.state.sos.load(&response.sos_id).await.unwrap().notification_sent);
}

#[tokio::test]
async fn test_event_without_hostel_skips_wardens() {
    let h = Harness::new();
    seed_campus(&h).await;
    let dispatcher = NotificationDispatcher::new(
        h.state.store.clone(),
        Arc::new(RecordingPushSender::default()),
    );

    // u2 has no profile, so no hostel
    let response = h.trigger(&other_student()).await;
    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    let recipients = dispatcher.recipients(&event).await.unwrap();
    assert_eq!(recipients.security.len(), 2);
    assert!(recipients.wardens.is_empty());
}

#[tokio::test]
async fn test_burst_beyond_bus_capacity_is_fully_alerted() {
    let h = Harness::new();
    seed_campus(&h).await;
    let push = Arc::new(RecordingPushSender::default());
    let dispatcher = Arc::new(NotificationDispatcher::new(h.state.store.clone(), push.clone()));
    let _consumer = dispatcher.spawn(h.state.events());

    let burst = EVENT_CAPACITY + 44;
    let mut ids = Vec::with_capacity(burst);
    for i in 0..burst {
        let actor = Actor::new(format!("burst-{i}"), format!("Student {i}"), ActorRole::Student);
        let response = h.state.sos.open(&actor, trigger_at(12.97, 77.59)).await.unwrap();
        ids.push(response.sos_id);
    }

    let mut notified = 0;
    for _ in 0..100 {
        wait_briefly(20).await;
        notified = 0;
        for id in &ids {
            if h.state.sos.load(id).await.unwrap().notification_sent {
                notified += 1;
            }
        }
        if notified == burst {
            break;
        }
    }
    assert_eq!(notified, burst);
}

#[tokio::test]
async fn test_startup_scan_alerts_events_created_while_down() {
    let h = Harness::new();
    seed_campus(&h).await;

    // nobody listening yet
    let missed = h.trigger(&student()).await;
    let dispatcher = NotificationDispatcher::new(
        h.state.store.clone(),
        Arc::new(RecordingPushSender::default()),
    );
    assert_eq!(dispatcher.catch_up().await.unwrap(), 1);
    assert!(h.state.sos.load(&missed.sos_id).await.unwrap().notification_sent);

    // already-notified events are left alone
    assert_eq!(dispatcher.catch_up().await.unwrap(), 0);
    assert!(!dispatcher.dispatch_pending(&missed.sos_id).await.unwrap());
}
