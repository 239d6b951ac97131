use crate::test_utils::*;
use campus_safety_backend::error::AppError;
use campus_safety_backend::safewalk::SYSTEM_ACTOR;
use campus_safety_backend::sos::Resolution;
use campus_safety_common::{
    LocationFix, NamedPoint, SafeWalkStatus, StartWalkRequest, WalkStatusRequest,
};

const DEST_LAT: f64 = 21.0;
const DEST_LNG: f64 = 79.0;
/// Degrees of latitude per meter, close enough for short hops
const DEG_PER_M: f64 = 1.0 / 111_195.0;

fn north_of_destination(meters: f64) -> (f64, f64) {
    (DEST_LAT + meters * DEG_PER_M, DEST_LNG)
}

fn walk_from(meters: f64) -> StartWalkRequest {
    let (lat, lng) = north_of_destination(meters);
    StartWalkRequest {
        start_location: NamedPoint {
            lat,
            lng,
            name: Some("Library".into()),
        },
        destination: NamedPoint {
            lat: DEST_LAT,
            lng: DEST_LNG,
            name: Some("Hostel A".into()),
        },
        expected_duration: 15,
        note: Some("Late lab".into()),
    }
}

fn fix_at(meters: f64) -> LocationFix {
    let (lat, lng) = north_of_destination(meters);
    LocationFix::new(lat, lng)
}

#[tokio::test]
async fn test_drifting_away_flags_every_step_over_threshold() {
    let h = Harness::new();
    let walk = h.state.walks.start(&student(), walk_from(40.0)).await.unwrap();

    let mut flags = Vec::new();
    for meters in [50.0, 80.0, 120.0] {
        let check = h
            .state
            .walks
            .record_position(&student(), &walk.id, fix_at(meters))
            .await
            .unwrap();
        flags.push(check.is_off_route);
    }
    assert_eq!(flags, [false, true, true]);

    let stored = h.state.walks.load(&walk.id).await.unwrap();
    assert_eq!(stored.status, SafeWalkStatus::OffRoute);
    let flagged_by_system = stored
        .timeline
        .iter()
        .filter(|entry| entry.by == SYSTEM_ACTOR)
        .count();
    assert_eq!(flagged_by_system, 1);
    let distance = stored.last_distance_to_destination.unwrap();
    assert!((distance - 120.0).abs() < 1.0, "distance was {distance}");
}

#[tokio::test]
async fn test_heading_home_is_never_off_route() {
    let h = Harness::new();
    let walk = h.state.walks.start(&student(), walk_from(500.0)).await.unwrap();

    for meters in [450.0, 300.0, 310.0, 120.0, 5.0] {
        let check = h
            .state
            .walks
            .record_position(&student(), &walk.id, fix_at(meters))
            .await
            .unwrap();
        assert!(!check.is_off_route, "flagged at {meters} m");
    }
    assert_eq!(
        h.state.walks.load(&walk.id).await.unwrap().status,
        SafeWalkStatus::Active
    );
}

#[tokio::test]
async fn test_danger_hands_over_to_responders() {
    let h = Harness::new();
    let walk = h.state.walks.start(&student(), walk_from(300.0)).await.unwrap();
    h.state
        .walks
        .record_position(&student(), &walk.id, fix_at(250.0))
        .await
        .unwrap();

    let change = h
        .state
        .walks
        .update_status(
            &student(),
            &walk.id,
            WalkStatusRequest {
                status: SafeWalkStatus::Danger,
                note: None,
            },
        )
        .await
        .unwrap();
    let sos_id = change.sos_id.unwrap();

    // escalated at the last reported position
    let event = h.state.sos.get(&guard(), &sos_id).await.unwrap();
    let (lat, _) = north_of_destination(250.0);
    assert!((event.location.lat - lat).abs() < 1e-9);

    let active = h.state.sos.active(&guard(), None).await.unwrap();
    assert_eq!(active.len(), 1);
    let open_walks = h.state.walks.active(&guard(), None).await.unwrap();
    assert!(open_walks.is_empty());

    // the walk is over; only the SOS carries on
    assert!(matches!(
        h.state
            .walks
            .record_position(&student(), &walk.id, fix_at(240.0))
            .await,
        Err(AppError::WalkEnded)
    ));
    assert_eq!(
        h.state
            .sos
            .resolve(&guard(), &sos_id, "Student found safe")
            .await
            .unwrap(),
        Resolution::Resolved
    );
}

#[tokio::test]
async fn test_two_escalations_share_one_sos() {
    let h = Harness::new();
    let first = h.state.walks.start(&student(), walk_from(300.0)).await.unwrap();
    let second = h.state.walks.start(&student(), walk_from(200.0)).await.unwrap();

    let escalate = |id: String| {
        let walks = h.state.walks.clone();
        async move {
            walks
                .update_status(
                    &student(),
                    &id,
                    WalkStatusRequest {
                        status: SafeWalkStatus::Sos,
                        note: Some("Being followed".into()),
                    },
                )
                .await
        }
    };
    let a = escalate(first.id.clone()).await.unwrap();
    let b = escalate(second.id.clone()).await.unwrap();
    assert_eq!(a.sos_id, b.sos_id);
    assert_eq!(h.state.sos.active(&guard(), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_walk_reads_are_owner_or_responder() {
    let h = Harness::new();
    let walk = h.state.walks.start(&student(), walk_from(100.0)).await.unwrap();

    assert!(h.state.walks.get(&student(), &walk.id).await.is_ok());
    assert!(h.state.walks.get(&warden(), &walk.id).await.is_ok());
    assert!(matches!(
        h.state.walks.get(&other_student(), &walk.id).await,
        Err(AppError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.state.walks.get(&student(), "missing").await,
        Err(AppError::WalkNotFound)
    ));
}
