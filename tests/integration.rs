use std::sync::{Arc, Mutex};
use std::time::Duration;

use cart_hail::config::Config;
use cart_hail::engine::{OperatorDesk, OperatorPublisher, RideRequestCoordinator, RiderLiveSync};
use cart_hail::error::AppError;
use cart_hail::geo::{eta_minutes, haversine_m};
use cart_hail::location::LocationAcquirer;
use cart_hail::location::provider::{Backend, ProviderError, WatchOptions};
use cart_hail::location::simulated::{ScriptedFix, SimulatedProvider};
use cart_hail::models::location::{GeoPoint, LocationFix};
use cart_hail::models::presence::OPERATOR_PRESENCE;
use cart_hail::models::ride::{PickupLocation, RIDE_REQUESTS, RideRequest, RideStatus};
use cart_hail::models::user::{USERS, UserProfile, UserType};
use cart_hail::observability::logging;
use cart_hail::observability::metrics::Metrics;
use cart_hail::store::memory::MemoryStore;
use cart_hail::store::{Document, DocumentStore, Fields};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const RIDER_POS: (f64, f64) = (28.6139, 77.2090);
const WAIT: Duration = Duration::from_secs(2);

type Recorded = Arc<Mutex<Vec<Option<RideStatus>>>>;

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn setup() -> (Arc<MemoryStore>, Metrics) {
    let store = Arc::new(MemoryStore::default());
    store.put(
        USERS,
        "rider-1",
        doc(json!({ "displayName": "Asha", "phoneNumber": "+919800000001", "userType": "rider" })),
    );
    store.put(
        USERS,
        "op-1",
        doc(json!({ "displayName": "Ravi", "phoneNumber": "+919800000002", "userType": "operator" })),
    );
    store.put(
        USERS,
        "op-2",
        doc(json!({ "displayName": "Meena", "userType": "operator" })),
    );
    (store, Metrics::new())
}

fn operator(uid: &str) -> UserProfile {
    UserProfile {
        uid: uid.to_string(),
        display_name: Some(format!("operator {uid}")),
        phone_number: None,
        user_type: UserType::Operator,
        is_active: true,
    }
}

fn pickup() -> PickupLocation {
    PickupLocation::new(RIDER_POS.0, RIDER_POS.1)
}

fn recorder() -> (Recorded, impl Fn(Option<RideRequest>) + Send + Sync + 'static) {
    let seen: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |update: Option<RideRequest>| {
        sink.lock().unwrap().push(update.map(|r| r.status));
    })
}

fn fast_watch() -> WatchOptions {
    WatchOptions {
        fastest_interval: Duration::ZERO,
        ..WatchOptions::default()
    }
}

async fn wait_for_status(coordinator: &RideRequestCoordinator, status: RideStatus) {
    let mut rx = coordinator.updates();
    timeout(
        WAIT,
        rx.wait_for(|current| current.as_ref().map(|r| r.status) == Some(status)),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {status}"))
    .unwrap();
}

async fn wait_for_point(mut rx: watch::Receiver<Option<GeoPoint>>, expected: Option<GeoPoint>) {
    timeout(WAIT, rx.wait_for(|current| *current == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"))
        .unwrap();
}

async fn wait_for_presence(store: &MemoryStore, operator_id: &str, point: GeoPoint) -> Document {
    let mut subscription = store
        .subscribe_document(OPERATOR_PRESENCE, operator_id)
        .await
        .unwrap();
    let expected = serde_json::to_value(point).unwrap();

    timeout(WAIT, async {
        loop {
            match subscription.next().await {
                Some(Ok(Some(doc))) if doc.get("location") == Some(&expected) => return doc,
                Some(_) => {}
                None => panic!("presence subscription closed"),
            }
        }
    })
    .await
    .expect("presence was never published")
}

async fn assert_operator_rule(store: &MemoryStore, request_id: &str) {
    let stored = store.get(RIDE_REQUESTS, request_id).await.unwrap().unwrap();
    let request = RideRequest::from_document(request_id, &stored).unwrap();
    assert_eq!(
        request.operator_id.is_some(),
        request.status.has_operator(),
        "operatorId presence disagrees with status {}",
        request.status
    );
}

#[tokio::test]
async fn rider_and_operator_complete_a_ride() {
    logging::init(&Config::default());
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
    let (seen, on_update) = recorder();

    let request_id = coordinator
        .request_ride(Some("rider-1"), pickup(), on_update)
        .await
        .unwrap();
    wait_for_status(&coordinator, RideStatus::Pending).await;
    assert_eq!(coordinator.status_message(), "Looking for available cart...");
    assert!(coordinator.has_active_request());
    assert_operator_rule(&store, &request_id).await;

    let desk = OperatorDesk::new(store.clone(), metrics.clone(), &operator("op-1"));
    desk.accept(&request_id).await.unwrap();
    wait_for_status(&coordinator, RideStatus::Accepted).await;

    let accepted = coordinator.current_request().unwrap();
    assert_eq!(accepted.operator_id.as_deref(), Some("op-1"));
    assert!(accepted.accepted_at.is_some());
    assert_eq!(coordinator.status_message(), "Cart assigned! Getting ready...");
    assert_operator_rule(&store, &request_id).await;

    let provider = Arc::new(SimulatedProvider::new());
    let acquirer = LocationAcquirer::new(provider.clone(), metrics.clone());
    let mut publisher = OperatorPublisher::new(acquirer, store.clone(), metrics.clone(), fast_watch());
    publisher.set_enabled(Some("op-1"), true).await.unwrap();

    let mut live = RiderLiveSync::new(store.clone(), metrics.clone());
    live.set_rider_location(Some(GeoPoint::new(RIDER_POS.0, RIDER_POS.1)));
    live.follow(coordinator.current_request().as_ref()).await.unwrap();

    let cart = GeoPoint::new(28.6150, 77.2100);
    provider.move_to(cart).await;
    wait_for_point(live.updates(), Some(cart)).await;

    assert_eq!(live.operator_location(), Some(cart));
    let estimate = live.estimate().unwrap();
    assert!(estimate.eta_minutes >= 1);
    assert!(estimate.distance_m > 100.0 && estimate.distance_m < 200.0);
    assert_eq!(publisher.last_location(), Some(cart));

    // The ride is past pending, so the rider cannot cancel it any more.
    coordinator.cancel(&request_id).await.unwrap();
    let stored = coordinator.fetch(&request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);

    for step in [RideStatus::OnWay, RideStatus::Arrived, RideStatus::Completed] {
        desk.advance(&request_id, step).await.unwrap();
        wait_for_status(&coordinator, step).await;
        assert_operator_rule(&store, &request_id).await;
    }

    let completed = coordinator.current_request().unwrap();
    assert!(completed.completed_at.is_some());
    assert_eq!(coordinator.status_message(), "Ride completed. Thank you!");
    assert!(!coordinator.has_active_request());

    live.follow(Some(&completed)).await.unwrap();
    assert_eq!(live.operator_location(), None);
    assert!(live.estimate().is_none());

    publisher.stop();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(provider.active_watches().await, 0);

    let statuses = seen.lock().unwrap().clone();
    assert_eq!(statuses.first(), Some(&Some(RideStatus::Pending)));
    assert_eq!(statuses.last(), Some(&Some(RideStatus::Completed)));
}

#[tokio::test]
async fn only_one_operator_wins_an_acceptance_race() {
    let (store, metrics) = setup();
    let coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
    let request_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();

    let desks: Vec<OperatorDesk> = (1..=5)
        .map(|n| OperatorDesk::new(store.clone(), metrics.clone(), &operator(&format!("op-{n}"))))
        .collect();

    let results = futures::future::join_all(desks.iter().map(|desk| desk.accept(&request_id))).await;

    let winners: Vec<&str> = desks
        .iter()
        .zip(&results)
        .filter(|(_, result)| result.is_ok())
        .map(|(desk, _)| desk.operator_id())
        .collect();
    assert_eq!(winners.len(), 1);

    for result in results.iter().filter(|r| r.is_err()) {
        let err = result.as_ref().unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed(_)));
        assert_eq!(err.user_message(), "This request is no longer available.");
    }

    let stored = coordinator.fetch(&request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);
    assert_eq!(stored.operator_id.as_deref(), Some(winners[0]));
}

#[tokio::test]
async fn cancel_is_idempotent_while_pending() {
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
    let (seen, on_update) = recorder();

    let request_id = coordinator
        .request_ride(Some("rider-1"), pickup(), on_update)
        .await
        .unwrap();
    wait_for_status(&coordinator, RideStatus::Pending).await;

    coordinator.cancel(&request_id).await.unwrap();
    coordinator.cancel(&request_id).await.unwrap();

    assert!(!coordinator.is_subscribed());
    assert_eq!(coordinator.status_message(), "Ride was cancelled.");
    let stored = coordinator.fetch(&request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Cancelled);
    assert!(stored.operator_id.is_none());

    let cancellations = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|s| **s == Some(RideStatus::Cancelled))
        .count();
    assert_eq!(cancellations, 1);

    // A cancelled ride cannot be claimed afterwards.
    let desk = OperatorDesk::new(store.clone(), metrics, &operator("op-1"));
    assert!(desk.accept(&request_id).await.unwrap_err().is_already_taken());
}

#[tokio::test]
async fn cancel_without_a_held_request_is_a_no_op() {
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics);
    let request_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();

    // Never subscribed, so the coordinator holds nothing to cancel.
    coordinator.cancel(&request_id).await.unwrap();

    let stored = coordinator.fetch(&request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Pending);
}

#[tokio::test]
async fn cancel_ignores_a_request_left_behind_by_resubscribing() {
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics);
    let first_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();
    let second_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();

    let (_first_seen, first_cb) = recorder();
    coordinator.subscribe(&first_id, first_cb).await.unwrap();
    wait_for_status(&coordinator, RideStatus::Pending).await;

    let second_ids: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = second_ids.clone();
    coordinator
        .subscribe(&second_id, move |update: Option<RideRequest>| {
            sink.lock().unwrap().push(update.map(|r| r.id));
        })
        .await
        .unwrap();
    assert!(coordinator.current_request().is_none_or(|r| r.id == second_id));

    coordinator.cancel(&first_id).await.unwrap();

    let first = coordinator.fetch(&first_id).await.unwrap().unwrap();
    assert_eq!(first.status, RideStatus::Pending);
    assert!(coordinator.is_subscribed());

    wait_for_status(&coordinator, RideStatus::Pending).await;
    assert_eq!(coordinator.current_request().unwrap().id, second_id);
    assert!(
        second_ids
            .lock()
            .unwrap()
            .iter()
            .all(|id| id.as_deref() == Some(second_id.as_str()))
    );
}

#[tokio::test]
async fn cancel_losing_to_an_acceptance_keeps_the_operator() {
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
    let (seen, on_update) = recorder();

    let request_id = coordinator
        .request_ride(Some("rider-1"), pickup(), on_update)
        .await
        .unwrap();
    wait_for_status(&coordinator, RideStatus::Pending).await;

    // The listener has not run since the acceptance, so the rider still sees pending.
    let desk = OperatorDesk::new(store.clone(), metrics, &operator("op-1"));
    desk.accept(&request_id).await.unwrap();
    assert_eq!(coordinator.current_request().unwrap().status, RideStatus::Pending);

    coordinator.cancel(&request_id).await.unwrap();

    let stored = coordinator.fetch(&request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);
    assert_eq!(stored.operator_id.as_deref(), Some("op-1"));
    assert!(coordinator.is_subscribed());

    wait_for_status(&coordinator, RideStatus::Accepted).await;
    assert!(!seen.lock().unwrap().contains(&Some(RideStatus::Cancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_update_is_delivered_exactly_once() {
    let (store, metrics) = setup();

    for _ in 0..50 {
        let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
        let (seen, on_update) = recorder();

        coordinator
            .request_ride(Some("rider-1"), pickup(), on_update)
            .await
            .unwrap();
        wait_for_status(&coordinator, RideStatus::Pending).await;

        let request_id = coordinator.current_request().unwrap().id;
        coordinator.cancel(&request_id).await.unwrap();
        sleep(Duration::from_millis(2)).await;

        let cancellations = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| **s == Some(RideStatus::Cancelled))
            .count();
        assert_eq!(cancellations, 1);
        assert_eq!(coordinator.status_message(), "Ride was cancelled.");
    }
}

#[tokio::test]
async fn create_requires_a_rider_identity() {
    let (store, metrics) = setup();
    let coordinator = RideRequestCoordinator::new(store, metrics);

    let err = coordinator.create(None, pickup()).await.unwrap_err();
    assert!(matches!(err, AppError::NotAuthenticated));
    assert_eq!(err.user_message(), "User not authenticated");

    let err = coordinator.create(Some("  "), pickup()).await.unwrap_err();
    assert!(matches!(err, AppError::NotAuthenticated));

    let err = coordinator.create(Some("ghost"), pickup()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn rider_info_snapshot_skips_empty_fields() {
    let (store, metrics) = setup();
    store.put(
        USERS,
        "rider-2",
        doc(json!({ "displayName": "", "phoneNumber": "+919800000003" })),
    );
    let coordinator = RideRequestCoordinator::new(store.clone(), metrics);

    let request_id = coordinator
        .create(Some("rider-2"), pickup().with_address("Gate 4"))
        .await
        .unwrap();

    let stored = store.get(RIDE_REQUESTS, &request_id).await.unwrap().unwrap();
    assert_eq!(stored["riderInfo"], json!({ "phoneNumber": "+919800000003" }));
    assert_eq!(stored["status"], "pending");
    assert_eq!(stored["location"]["address"], "Gate 4");
    assert!(stored["requestedAt"].is_string());
    assert!(stored.get("operatorId").is_none());
    assert!(stored.get("acceptedAt").is_none());
}

#[tokio::test]
async fn store_failures_propagate_with_their_message() {
    let (store, metrics) = setup();
    let coordinator = RideRequestCoordinator::new(store.clone(), metrics);
    store.set_offline(true);

    let err = coordinator.create(Some("rider-1"), pickup()).await.unwrap_err();
    assert!(matches!(err, AppError::Store(_)));
    assert_eq!(err.user_message(), "store unavailable");
}

#[tokio::test]
async fn resubscribing_tears_down_the_previous_subscription() {
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
    let first_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();
    let second_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();

    let (first_seen, first_cb) = recorder();
    let first_handle = coordinator.subscribe(&first_id, first_cb).await.unwrap();
    wait_for_status(&coordinator, RideStatus::Pending).await;

    let (second_seen, second_cb) = recorder();
    coordinator.subscribe(&second_id, second_cb).await.unwrap();
    assert!(!first_handle.is_active());

    let before = first_seen.lock().unwrap().len();
    store
        .update(RIDE_REQUESTS, &first_id, Fields::new().set("status", "cancelled"), None)
        .await
        .unwrap();
    sleep(Duration::from_millis(30)).await;

    assert_eq!(first_seen.lock().unwrap().len(), before);
    assert_eq!(
        second_seen.lock().unwrap().first(),
        Some(&Some(RideStatus::Pending))
    );
    assert_eq!(coordinator.current_request().unwrap().id, second_id);

    coordinator.unsubscribe();
    coordinator.unsubscribe();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(metrics.active_subscriptions.get(), 0);
}

#[tokio::test]
async fn subscription_failures_arrive_as_empty_updates() {
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics);
    let (seen, on_update) = recorder();

    coordinator
        .request_ride(Some("rider-1"), pickup(), on_update)
        .await
        .unwrap();
    wait_for_status(&coordinator, RideStatus::Pending).await;

    store.set_offline(true);
    let mut rx = coordinator.updates();
    timeout(WAIT, rx.wait_for(Option::is_none)).await.unwrap().unwrap();

    assert_eq!(seen.lock().unwrap().last(), Some(&None));
    assert_eq!(coordinator.status_message(), "");
    assert!(!coordinator.has_active_request());
}

#[tokio::test]
async fn vanished_request_is_reported_as_none() {
    let (store, metrics) = setup();
    let mut coordinator = RideRequestCoordinator::new(store.clone(), metrics);
    let (seen, on_update) = recorder();

    let request_id = coordinator
        .request_ride(Some("rider-1"), pickup(), on_update)
        .await
        .unwrap();
    wait_for_status(&coordinator, RideStatus::Pending).await;

    store.remove(RIDE_REQUESTS, &request_id);
    let mut rx = coordinator.updates();
    timeout(WAIT, rx.wait_for(Option::is_none)).await.unwrap().unwrap();
    assert_eq!(seen.lock().unwrap().last(), Some(&None));
}

#[tokio::test]
async fn recent_requests_are_newest_first() {
    let (store, metrics) = setup();
    let coordinator = RideRequestCoordinator::new(store.clone(), metrics);

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(coordinator.create(Some("rider-1"), pickup()).await.unwrap());
        sleep(Duration::from_millis(2)).await;
    }

    let recent: Vec<String> = coordinator
        .recent_requests("rider-1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.reverse();
    assert_eq!(recent, ids);
}

#[tokio::test]
async fn operator_queues_follow_claims() {
    let (store, metrics) = setup();
    let coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
    let desk = OperatorDesk::new(store.clone(), metrics, &operator("op-1"));

    let pending: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let assigned: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let pending_sink = pending.clone();
    let assigned_sink = assigned.clone();

    let pending_handle = desk
        .watch_pending(move |requests| {
            *pending_sink.lock().unwrap() = requests.into_iter().map(|r| r.id).collect();
        })
        .await
        .unwrap();
    let assigned_handle = desk
        .watch_assigned(move |requests| {
            *assigned_sink.lock().unwrap() = requests.into_iter().map(|r| r.id).collect();
        })
        .await
        .unwrap();

    let request_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(*pending.lock().unwrap(), vec![request_id.clone()]);
    assert!(assigned.lock().unwrap().is_empty());

    desk.accept(&request_id).await.unwrap();
    sleep(Duration::from_millis(30)).await;
    assert!(pending.lock().unwrap().is_empty());
    assert_eq!(*assigned.lock().unwrap(), vec![request_id.clone()]);

    desk.advance(&request_id, RideStatus::OnWay).await.unwrap();
    sleep(Duration::from_millis(30)).await;
    assert!(assigned.lock().unwrap().is_empty());

    pending_handle.cancel();
    assigned_handle.cancel();
}

#[tokio::test]
async fn operators_cannot_skip_steps_or_drive_foreign_rides() {
    let (store, metrics) = setup();
    let coordinator = RideRequestCoordinator::new(store.clone(), metrics.clone());
    let owner = OperatorDesk::new(store.clone(), metrics.clone(), &operator("op-1"));
    let stranger = OperatorDesk::new(store.clone(), metrics, &operator("op-2"));

    let request_id = coordinator.create(Some("rider-1"), pickup()).await.unwrap();
    owner.accept(&request_id).await.unwrap();

    let err = owner
        .advance(&request_id, RideStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            from: RideStatus::Accepted,
            to: RideStatus::Completed
        }
    ));

    let err = owner
        .advance(&request_id, RideStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    let err = stranger
        .advance(&request_id, RideStatus::OnWay)
        .await
        .unwrap_err();
    assert!(err.is_already_taken());

    let stored = coordinator.fetch(&request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);
    assert_eq!(stored.operator_id.as_deref(), Some("op-1"));
}

#[tokio::test]
async fn publisher_merges_presence_and_survives_errors() {
    let (store, metrics) = setup();
    store.put(
        OPERATOR_PRESENCE,
        "op-1",
        doc(json!({ "vehicle": "cart-7", "available": false })),
    );

    let provider = Arc::new(SimulatedProvider::new());
    let acquirer = LocationAcquirer::new(provider.clone(), metrics.clone());
    let mut publisher = OperatorPublisher::new(acquirer, store.clone(), metrics.clone(), fast_watch());
    publisher.set_enabled(Some("op-1"), true).await.unwrap();
    assert!(publisher.is_publishing());

    provider.push_error(ProviderError::timeout()).await;
    let first = GeoPoint::new(28.6150, 77.2100);
    provider.move_to(first).await;

    let presence = wait_for_presence(&store, "op-1", first).await;
    assert_eq!(presence["vehicle"], "cart-7");
    assert_eq!(presence["available"], true);
    assert!(presence["updatedAt"].is_string());
    assert!(publisher.is_publishing());

    let second = GeoPoint::new(28.6160, 77.2110);
    provider.move_to(second).await;
    wait_for_presence(&store, "op-1", second).await;

    publisher.stop();
    publisher.stop();
    assert!(!publisher.is_publishing());
}

#[tokio::test]
async fn disabling_the_publisher_cancels_its_watch() {
    let (store, metrics) = setup();
    let provider = Arc::new(SimulatedProvider::new().with_alternate_backend());
    let acquirer = LocationAcquirer::new(provider.clone(), metrics.clone());
    let mut publisher = OperatorPublisher::new(acquirer, store.clone(), metrics, fast_watch());

    publisher.set_enabled(None, true).await.unwrap();
    assert!(!publisher.is_publishing());
    assert!(provider.watch_requests().await.is_empty());

    publisher.set_enabled(Some("op-1"), true).await.unwrap();
    publisher.set_enabled(Some("op-1"), true).await.unwrap();
    let requests = provider.watch_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].backend, Backend::Alternate);

    publisher.set_enabled(Some("op-1"), false).await.unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(provider.active_watches().await, 0);

    provider.move_to(GeoPoint::new(1.0, 1.0)).await;
    sleep(Duration::from_millis(20)).await;
    assert!(store.get(OPERATOR_PRESENCE, "op-1").await.unwrap().is_none());

    publisher.set_enabled(Some("op-1"), true).await.unwrap();
    assert_eq!(provider.watch_requests().await.len(), 2);
    assert_eq!(provider.active_watches().await, 1);
}

#[tokio::test]
async fn live_sync_resets_when_operator_is_cleared() {
    let (store, metrics) = setup();
    let mut live = RiderLiveSync::new(store.clone(), metrics.clone());

    let here = GeoPoint::new(28.6150, 77.2100);
    store
        .merge(
            OPERATOR_PRESENCE,
            "op-1",
            Fields::new().set("available", true).set("location", serde_json::to_value(here).unwrap()),
        )
        .await
        .unwrap();

    live.track(Some("op-1")).await.unwrap();
    wait_for_point(live.updates(), Some(here)).await;
    assert!(live.estimate().is_none(), "rider location is still unknown");

    live.track(None).await.unwrap();
    assert_eq!(live.operator_location(), None);

    // No presence published for op-2 yet.
    live.track(Some("op-2")).await.unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(live.operator_location(), None);

    live.stop();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(metrics.active_subscriptions.get(), 0);
}

#[tokio::test]
async fn eta_shrinks_as_the_cart_approaches() {
    let (store, metrics) = setup();
    let provider = Arc::new(SimulatedProvider::new());
    let acquirer = LocationAcquirer::new(provider.clone(), metrics.clone());
    let mut publisher = OperatorPublisher::new(acquirer, store.clone(), metrics.clone(), fast_watch());
    publisher.start("op-1").await.unwrap();

    let rider = GeoPoint::new(RIDER_POS.0, RIDER_POS.1);
    let mut live = RiderLiveSync::new(store.clone(), metrics);
    live.set_rider_location(Some(rider));
    live.track(Some("op-1")).await.unwrap();

    let mut previous = u32::MAX;
    for step in (0..6).rev() {
        let offset = 0.004 * step as f64 + 0.0005;
        let cart = GeoPoint::new(rider.latitude + offset, rider.longitude + offset);
        provider.move_to(cart).await;
        wait_for_point(live.updates(), Some(cart)).await;

        let estimate = live.estimate().unwrap();
        let expected = eta_minutes(haversine_m(&cart, &rider), 15.0);
        assert_eq!(estimate.eta_minutes, expected);
        assert!(estimate.eta_minutes <= previous);
        assert_eq!(estimate.eta_text(), format!("{expected} min"));
        previous = estimate.eta_minutes;
    }
}

#[tokio::test]
async fn components_follow_configuration() {
    let config = Config::from_lookup(|key| {
        let value = match key {
            "AVERAGE_SPEED_KMH" => "5",
            "FIX_MAX_AGE_MS" => "0",
            "EVENT_BUFFER_SIZE" => "8",
            "WATCH_DISTANCE_FILTER_M" => "50",
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap();
    let store = Arc::new(MemoryStore::from_config(&config));
    let metrics = Metrics::new();

    let provider = Arc::new(SimulatedProvider::new());
    let cached = LocationFix::at(GeoPoint::new(9.0, 9.0), Utc::now() - chrono::Duration::seconds(1));
    let fresh = GeoPoint::new(28.6339, 77.2290);
    provider.script(ScriptedFix::Fix(cached)).await;
    provider.script_fix_at(fresh).await;

    let acquirer = LocationAcquirer::from_config(provider.clone(), metrics.clone(), &config);
    let fix = acquirer.current_fix().await.unwrap();
    assert_eq!(fix.point(), fresh);
    assert_eq!(provider.requests().await[0].max_age, Duration::ZERO);

    let mut publisher = OperatorPublisher::from_config(acquirer, store.clone(), metrics.clone(), &config);
    publisher.start("op-1").await.unwrap();
    assert_eq!(provider.watch_requests().await[0].distance_filter_m, 50.0);

    let rider = GeoPoint::new(RIDER_POS.0, RIDER_POS.1);
    let mut live = RiderLiveSync::from_config(store.clone(), metrics, &config);
    live.set_rider_location(Some(rider));
    live.track(Some("op-1")).await.unwrap();

    provider.move_to(fresh).await;
    wait_for_point(live.updates(), Some(fresh)).await;

    let distance = haversine_m(&fresh, &rider);
    let estimate = live.estimate().unwrap();
    assert_eq!(estimate.eta_minutes, eta_minutes(distance, 5.0));
    assert!(estimate.eta_minutes > eta_minutes(distance, 15.0));
}
