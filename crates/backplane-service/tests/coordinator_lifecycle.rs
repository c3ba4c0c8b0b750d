//! Entity coordinator behavior through the public runtime API.
//!
//! Covers subscription idempotence, empty-set teardown, failure self-heal
//! during fan-out and the liveness reminder sweep.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use backplane_service::actors::{ActorRuntime, Lifecycle, RuntimeSettings};
use backplane_service::observer::Delivery;
use backplane_test_utils::{reply, wait_until, MockObserver, MockStateStore};
use common::types::{EntityKey, ServerId};

fn runtime_with(store: &Arc<MockStateStore>, settings: RuntimeSettings) -> ActorRuntime {
    ActorRuntime::new(store.clone(), settings)
}

fn runtime(store: &Arc<MockStateStore>) -> ActorRuntime {
    runtime_with(store, RuntimeSettings::default())
}

fn register(runtime: &ActorRuntime, observer: &Arc<MockObserver>) {
    runtime.directory().register("chat", observer.handle());
}

fn group_delivery() -> Delivery {
    Delivery::new(EntityKey::group("chat", "g1"), Arc::new(reply("hi")))
}

// ============================================================================
// Subscription idempotence
// ============================================================================

#[tokio::test]
async fn test_subscribing_twice_keeps_set_size() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let coordinator = runtime.coordinator(EntityKey::group("chat", "g1"));
    let a = MockObserver::new("srv-a");

    coordinator.subscribe(a.handle()).await.unwrap();
    coordinator.subscribe(a.handle()).await.unwrap();

    assert_eq!(coordinator.subscribers().await.unwrap(), vec![ServerId::new("srv-a")]);
    assert_eq!(store.saves(), 1, "second subscribe must not write state");
}

#[tokio::test]
async fn test_failed_save_rolls_subscribe_back() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let key = EntityKey::group("chat", "g1");
    let coordinator = runtime.coordinator(key.clone());
    let a = MockObserver::new("srv-a");

    store.set_fail_saves(true);
    assert!(coordinator.subscribe(a.handle()).await.is_err());

    store.set_fail_saves(false);
    assert!(coordinator.subscribers().await.unwrap().is_empty());
    assert!(!store.contains(&key).await);
}

// ============================================================================
// Empty-set teardown
// ============================================================================

#[tokio::test]
async fn test_emptied_coordinator_clears_state_and_stops() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let key = EntityKey::user("chat", "u1");
    let coordinator = runtime.coordinator(key.clone());
    let a = MockObserver::new("srv-a");
    let b = MockObserver::new("srv-b");

    coordinator.subscribe(a.handle()).await.unwrap();
    coordinator.subscribe(b.handle()).await.unwrap();

    let status = coordinator.status().await.unwrap();
    assert_eq!(status.lifecycle, Lifecycle::Active);
    assert_eq!(status.subscriber_count, 2);
    assert!(status.reminder_active);
    assert_eq!(
        store.persisted(&key).await,
        vec![ServerId::new("srv-a"), ServerId::new("srv-b")]
    );

    coordinator.unsubscribe(a.server_id()).await.unwrap();
    assert!(coordinator.status().await.unwrap().reminder_active);

    coordinator.unsubscribe(b.server_id()).await.unwrap();
    assert!(!store.contains(&key).await);

    wait_until("coordinator deactivated", || async { !runtime.is_active(&key) }).await;
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let coordinator = runtime.coordinator(EntityKey::group("chat", "g1"));
    let a = MockObserver::new("srv-a");

    coordinator.unsubscribe(a.server_id()).await.unwrap();
    coordinator.subscribe(a.handle()).await.unwrap();
    coordinator.unsubscribe(a.server_id()).await.unwrap();
    coordinator.unsubscribe(a.server_id()).await.unwrap();

    assert!(coordinator.subscribers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reactivation_restores_persisted_subscribers() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let key = EntityKey::group("chat", "g1");
    let a = MockObserver::new("srv-a");
    let gone = ServerId::new("srv-gone");
    register(&runtime, &a);

    store.seed(&key, &[a.server_id().clone(), gone]).await;

    let coordinator = runtime.coordinator(key.clone());
    assert_eq!(coordinator.subscribers().await.unwrap(), vec![a.server_id().clone()]);
    assert_eq!(store.persisted(&key).await, vec![a.server_id().clone()]);
}

// ============================================================================
// Failure self-heal
// ============================================================================

#[tokio::test]
async fn test_notify_evicts_failing_subscribers_in_one_update() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let key = EntityKey::group("chat", "g1");
    let coordinator = runtime.coordinator(key.clone());

    let healthy: Vec<_> = ["srv-a", "srv-b", "srv-c"]
        .into_iter()
        .map(MockObserver::new)
        .collect();
    let failing: Vec<_> = ["srv-x", "srv-y"]
        .into_iter()
        .map(MockObserver::failing)
        .collect();
    for observer in healthy.iter().chain(&failing) {
        coordinator.subscribe(observer.handle()).await.unwrap();
    }
    let saves_before = store.saves();

    let outcome = coordinator.notify(group_delivery(), None).await.unwrap();

    assert_eq!(outcome.delivered, 3);
    assert_eq!(
        outcome.evicted,
        vec![ServerId::new("srv-x"), ServerId::new("srv-y")]
    );
    assert_eq!(store.saves() - saves_before, 1);

    let remaining = coordinator.subscribers().await.unwrap();
    assert_eq!(remaining.len(), 3);
    assert_eq!(store.persisted(&key).await, remaining);
    for observer in &healthy {
        assert_eq!(observer.deliveries(), vec![key.clone()]);
    }
}

#[tokio::test]
async fn test_notify_skips_origin_server() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let coordinator = runtime.coordinator(EntityKey::group("chat", "g1"));
    let a = MockObserver::new("srv-a");
    let b = MockObserver::new("srv-b");
    coordinator.subscribe(a.handle()).await.unwrap();
    coordinator.subscribe(b.handle()).await.unwrap();

    let outcome = coordinator
        .notify(group_delivery(), Some(a.server_id().clone()))
        .await
        .unwrap();

    assert_eq!(outcome.delivered, 1);
    assert_eq!(a.delivery_count(), 0);
    assert_eq!(b.delivery_count(), 1);
}

#[tokio::test]
async fn test_notify_with_only_failing_subscribers_empties_coordinator() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let key = EntityKey::connection("chat", "conn-1");
    let coordinator = runtime.coordinator(key.clone());
    coordinator
        .subscribe(MockObserver::failing("srv-x").handle())
        .await
        .unwrap();

    let outcome = coordinator.notify(group_delivery(), None).await.unwrap();

    assert_eq!(outcome.delivered, 0);
    assert_eq!(outcome.evicted.len(), 1);
    assert!(!store.contains(&key).await);
    assert!(coordinator.subscribers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_explicit_evict_reports_membership() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    let coordinator = runtime.coordinator(EntityKey::all("chat"));
    let a = MockObserver::new("srv-a");
    let b = MockObserver::new("srv-b");
    coordinator.subscribe(a.handle()).await.unwrap();
    coordinator.subscribe(b.handle()).await.unwrap();

    assert!(coordinator.evict(b.server_id()).await.unwrap());
    assert!(!coordinator.evict(b.server_id()).await.unwrap());
    assert_eq!(coordinator.subscribers().await.unwrap(), vec![a.server_id().clone()]);
}

// ============================================================================
// Liveness reminder
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_liveness_sweep_evicts_dead_subscribers() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime_with(
        &store,
        RuntimeSettings {
            liveness_period: Duration::from_secs(60),
            ..RuntimeSettings::default()
        },
    );
    let coordinator = runtime.coordinator(EntityKey::group("chat", "g1"));
    let a = MockObserver::new("srv-a");
    let b = MockObserver::new("srv-b");
    coordinator.subscribe(a.handle()).await.unwrap();
    coordinator.subscribe(b.handle()).await.unwrap();

    b.set_failing(true);
    tokio::time::advance(Duration::from_secs(61)).await;

    wait_until("dead subscriber swept", || async {
        coordinator.subscribers().await.unwrap() == vec![ServerId::new("srv-a")]
    })
    .await;
    assert!(a.ping_count() >= 1);
    assert_eq!(a.delivery_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_of_last_subscriber_deactivates() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime_with(
        &store,
        RuntimeSettings {
            liveness_period: Duration::from_secs(60),
            ..RuntimeSettings::default()
        },
    );
    let key = EntityKey::user("chat", "u1");
    let coordinator = runtime.coordinator(key.clone());
    let a = MockObserver::new("srv-a");
    coordinator.subscribe(a.handle()).await.unwrap();

    a.set_failing(true);
    tokio::time::advance(Duration::from_secs(61)).await;

    wait_until("coordinator deactivated after sweep", || async {
        !runtime.is_active(&key)
    })
    .await;
    assert!(!store.contains(&key).await);
}

#[tokio::test]
async fn test_shut_down_runtime_refuses_calls() {
    let store = Arc::new(MockStateStore::new());
    let runtime = runtime(&store);
    runtime.shutdown();

    let result = runtime
        .coordinator(EntityKey::group("chat", "g1"))
        .subscribe(MockObserver::new("srv-a").handle())
        .await;
    assert!(result.is_err());
}
