use crate::test_utils::*;
use campus_safety_backend::error::AppError;
use campus_safety_backend::local_store::{FlatFileKeyValueStore, RecoveryStore};
use campus_safety_backend::sos::{RecoveryOutcome, Resolution};
use std::sync::Arc;
use tempfile::TempDir;

fn file_recovery(dir: &TempDir) -> RecoveryStore {
    RecoveryStore::new(Arc::new(FlatFileKeyValueStore::new(dir.path()).unwrap()))
}

#[tokio::test]
async fn test_restart_resumes_tracking_from_disk() {
    let h = Harness::new();
    let dir = TempDir::new().unwrap();

    let response = {
        let tracker = Arc::new(RecordingTracker::default());
        let manager = h.manager(tracker, file_recovery(&dir));
        manager
            .trigger(&student(), Some("jwt".into()), trigger_at(1.0, 1.0))
            .await
            .unwrap()
    };

    // new process: fresh tracker, same directory
    let tracker = Arc::new(RecordingTracker::default());
    let manager = h.manager(tracker.clone(), file_recovery(&dir));
    assert_eq!(
        manager.recover().await.unwrap(),
        RecoveryOutcome::Resumed {
            sos_id: response.sos_id.clone()
        }
    );
    let running = tracker.running.lock().clone().unwrap();
    assert_eq!(running.sos_id, response.sos_id);
    assert_eq!(running.sos_token, response.sos_token);
    assert_eq!(running.user_id, "u1");

    // a second recover sees the tracker running and leaves it alone
    assert_eq!(
        manager.recover().await.unwrap(),
        RecoveryOutcome::AlreadyRunning {
            sos_id: response.sos_id
        }
    );
    assert_eq!(tracker.starts.lock().len(), 1);
}

#[tokio::test]
async fn test_restart_after_remote_resolve_clears_state() {
    let h = Harness::new();
    let dir = TempDir::new().unwrap();
    let recovery = file_recovery(&dir);
    let tracker = Arc::new(RecordingTracker::default());
    let manager = h.manager(tracker.clone(), recovery.clone());

    let response = manager
        .trigger(&student(), None, trigger_at(1.0, 1.0))
        .await
        .unwrap();
    h.state
        .sos
        .resolve(&guard(), &response.sos_id, "Handled by security")
        .await
        .unwrap();

    assert_eq!(
        manager.recover().await.unwrap(),
        RecoveryOutcome::Cleared {
            sos_id: response.sos_id.clone()
        }
    );
    assert!(tracker.running.lock().is_none());
    assert_eq!(recovery.active_id().unwrap(), None);
    assert_eq!(recovery.token_for(&response.sos_id).unwrap(), None);
}

#[tokio::test]
async fn test_signed_out_cancel_then_retrigger() {
    let h = Harness::new();
    let recovery = memory_recovery();
    let tracker = Arc::new(RecordingTracker::default());
    let manager = h.manager(tracker.clone(), recovery.clone());

    let response = manager
        .trigger(&student(), None, trigger_at(1.0, 1.0))
        .await
        .unwrap();
    assert_eq!(
        manager.cancel(None, &response.sos_id).await.unwrap(),
        Resolution::Resolved
    );
    assert!(tracker.running.lock().is_none());
    assert_eq!(recovery.active_id().unwrap(), None);

    // without a local token a signed-out cancel cannot be attempted
    assert!(matches!(
        manager.cancel(None, &response.sos_id).await,
        Err(AppError::InvalidToken)
    ));

    let again = manager
        .trigger(&student(), None, trigger_at(1.0, 1.0))
        .await
        .unwrap();
    assert_ne!(again.sos_id, response.sos_id);
}

#[tokio::test]
async fn test_duplicate_trigger_on_another_device_cannot_resume() {
    let h = Harness::new();
    let phone = h.manager(Arc::new(RecordingTracker::default()), memory_recovery());
    let tablet_tracker = Arc::new(RecordingTracker::default());
    let tablet = h.manager(tablet_tracker.clone(), memory_recovery());

    let response = phone
        .trigger(&student(), None, trigger_at(1.0, 1.0))
        .await
        .unwrap();
    match tablet.trigger(&student(), None, trigger_at(1.0, 1.0)).await {
        Err(AppError::AlreadyActive {
            sos_id,
            tracking_resumed,
        }) => {
            assert_eq!(sos_id, response.sos_id);
            assert!(!tracking_resumed);
        },
        other => panic!("expected AlreadyActive, got {other:?}"),
    }
    assert!(tablet_tracker.starts.lock().is_empty());
}

#[tokio::test]
async fn test_observing_remote_resolution_stops_tracking() {
    let h = Harness::new();
    let recovery = memory_recovery();
    let tracker = Arc::new(RecordingTracker::default());
    let manager = h.manager(tracker.clone(), recovery.clone());

    let response = manager
        .trigger(&student(), None, trigger_at(1.0, 1.0))
        .await
        .unwrap();
    let open = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(!manager.observe(&open).await.unwrap());

    h.state
        .sos
        .resolve(&warden(), &response.sos_id, "Resolved by warden")
        .await
        .unwrap();
    let closed = h.state.sos.load(&response.sos_id).await.unwrap();
    assert!(manager.observe(&closed).await.unwrap());
    assert!(tracker.running.lock().is_none());
    assert_eq!(*tracker.stops.lock(), 1);
}

#[tokio::test]
async fn test_signed_out_cancel_after_remote_resolve_cleans_up() {
    let h = Harness::new();
    let recovery = memory_recovery();
    let tracker = Arc::new(RecordingTracker::default());
    let manager = h.manager(tracker.clone(), recovery.clone());

    let response = manager
        .trigger(&student(), None, trigger_at(1.0, 1.0))
        .await
        .unwrap();
    h.state
        .sos
        .resolve(&guard(), &response.sos_id, "Student reached the gate")
        .await
        .unwrap();

    assert_eq!(
        manager.cancel(None, &response.sos_id).await.unwrap(),
        Resolution::AlreadyResolved
    );
    assert!(tracker.running.lock().is_none());
    assert_eq!(recovery.active_id().unwrap(), None);
    assert_eq!(recovery.token_for(&response.sos_id).unwrap(), None);

    // the guard's summary stands
    let event = h.state.sos.load(&response.sos_id).await.unwrap();
    assert_eq!(event.resolution_summary.as_deref(), Some("Student reached the gate"));
}

#[tokio::test]
async fn test_signed_out_cancel_with_stale_token_on_open_event_fails() {
    let h = Harness::new();
    let recovery = memory_recovery();
    let tracker = Arc::new(RecordingTracker::default());
    let manager = h.manager(tracker.clone(), recovery.clone());

    let response = manager
        .trigger(&student(), None, trigger_at(1.0, 1.0))
        .await
        .unwrap();
    recovery.remember(&response.sos_id, "stale").unwrap();

    assert!(matches!(
        manager.cancel(None, &response.sos_id).await,
        Err(AppError::InvalidToken)
    ));
    // still open, so this device keeps tracking
    assert!(tracker.running.lock().is_some());
    assert_eq!(recovery.active_id().unwrap(), Some(response.sos_id));
}
