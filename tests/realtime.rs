//! Integration tests for the real-time engine: storage change feed →
//! registry fan-out → per-subscription channels, including resume and
//! teardown behaviour.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use emberstore::auth::{AuthUser, OpenRules, StaticTokenAuth};
use emberstore::paths::split_path;
use emberstore::realtime::{SubscribeRequest, SubscriptionKey, SubscriptionOptions};
use emberstore::storage::MemoryStore;
use emberstore::value::{codec, MapValue, Value};
use emberstore::{AppState, Config, TenantId};

fn state() -> AppState {
    AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticTokenAuth),
        Arc::new(OpenRules),
        Config::default(),
    )
}

fn tenant() -> TenantId {
    TenantId::new("org1", "proj1", "db1")
}

fn user() -> AuthUser {
    AuthUser::new("tester", None)
}

fn subscribe_request(subscriber: &str, subscription: &str, full_path: &str) -> SubscribeRequest {
    SubscribeRequest {
        key: SubscriptionKey::new(subscriber, subscription),
        tenant_org: "org1".to_string(),
        full_path: full_path.to_string(),
        resume_token: None,
        query: None,
        options: SubscriptionOptions::default(),
    }
}

fn fields(entries: Vec<(&str, Value)>) -> MapValue {
    let mut map = MapValue::empty();
    for (key, value) in entries {
        map.insert(key, value);
    }
    map
}

async fn create(state: &AppState, path: &str, entries: Vec<(&str, Value)>) {
    state
        .storage
        .create_document(&tenant(), &split_path(path).unwrap(), fields(entries))
        .await
        .unwrap();
}

#[tokio::test]
async fn subscribe_then_live_event_then_unsubscribe() {
    let state = state();
    state.start_background_tasks();

    create(&state, "col/docX", vec![("n", Value::from_integer(1))]).await;

    let outcome = state
        .registry
        .subscribe(
            &user(),
            subscribe_request("c1", "s1", "projects/proj1/databases/db1/documents/col/docX"),
        )
        .await
        .unwrap();

    // The snapshot reflects the pre-subscription write.
    assert_eq!(
        outcome.initial_snapshot["fields"]["n"]["integerValue"],
        "1"
    );

    // A storage mutation flows through the event pump to the subscriber.
    state
        .storage
        .update_document(
            &tenant(),
            &split_path("col/docX").unwrap(),
            fields(vec![("n", Value::from_integer(2))]),
            None,
        )
        .await
        .unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(2), outcome.receiver.recv())
        .await
        .expect("event within deadline")
        .expect("channel open");
    assert_eq!(envelope.event.path.canonical_string(), "col/docX");
    let encoded = codec::encode_fields_object(envelope.event.fields.as_ref().unwrap());
    assert_eq!(encoded["n"]["integerValue"], "2");
    assert!(!envelope.resume_token.is_empty());

    // Unsubscribing closes the channel; nothing is delivered afterwards.
    assert!(state
        .registry
        .unsubscribe(&SubscriptionKey::new("c1", "s1"))
        .await);
    assert!(outcome.receiver.is_closed());

    state
        .storage
        .update_document(
            &tenant(),
            &split_path("col/docX").unwrap(),
            fields(vec![("n", Value::from_integer(3))]),
            None,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(outcome.receiver.try_recv().is_err());
}

#[tokio::test]
async fn resume_token_bridges_a_reconnect() {
    let state = state();
    state.start_background_tasks();

    let first = state
        .registry
        .subscribe(
            &user(),
            subscribe_request("c1", "s1", "projects/proj1/databases/db1/documents/col"),
        )
        .await
        .unwrap();

    create(&state, "col/a", vec![("n", Value::from_integer(1))]).await;
    let token = tokio::time::timeout(Duration::from_secs(2), first.receiver.recv())
        .await
        .unwrap()
        .unwrap()
        .resume_token;

    // Disconnect, miss two events, reconnect with the token.
    state.registry.unsubscribe_all("c1").await;
    create(&state, "col/b", vec![("n", Value::from_integer(2))]).await;
    create(&state, "col/c", vec![("n", Value::from_integer(3))]).await;
    // Let the pump drain before resubscribing.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut resume = subscribe_request("c1", "s1", "projects/proj1/databases/db1/documents/col");
    resume.resume_token = Some(token);
    let second = state.registry.subscribe(&user(), resume).await.unwrap();

    let replay_a = second.receiver.recv().await.unwrap();
    let replay_b = second.receiver.recv().await.unwrap();
    assert_eq!(replay_a.event.path.canonical_string(), "col/b");
    assert_eq!(replay_b.event.path.canonical_string(), "col/c");
    assert_eq!(replay_a.sequence + 1, replay_b.sequence);
}

#[tokio::test]
async fn slow_consumer_never_delays_a_fast_one() {
    let state = state();
    state.start_background_tasks();

    let slow = state
        .registry
        .subscribe(
            &user(),
            subscribe_request("slow", "s1", "projects/proj1/databases/db1/documents/col"),
        )
        .await
        .unwrap();
    let fast = state
        .registry
        .subscribe(
            &user(),
            subscribe_request("fast", "s1", "projects/proj1/databases/db1/documents/col"),
        )
        .await
        .unwrap();

    // Overrun the per-subscription capacity (200) without draining `slow`.
    for i in 0..250 {
        create(&state, &format!("col/doc{i}"), vec![("n", Value::from_integer(i))]).await;
    }

    // The fast consumer drains as events arrive.
    let mut fast_received = 0;
    while fast_received < 200 {
        match tokio::time::timeout(Duration::from_secs(2), fast.receiver.recv()).await {
            Ok(Ok(_)) => fast_received += 1,
            _ => break,
        }
    }
    assert_eq!(fast_received, 200);

    // The slow consumer kept only its buffer's worth; the overflow was
    // dropped rather than blocking delivery.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut slow_received = 0;
    while slow.receiver.try_recv().is_ok() {
        slow_received += 1;
    }
    assert_eq!(slow_received, 200);
}

#[tokio::test]
async fn query_scoped_subscription_only_sees_matches() {
    let state = state();
    state.start_background_tasks();

    let query = emberstore::query::parse_structured_query(&json!({
        "from": [{ "collectionId": "col" }],
        "where": {
            "fieldFilter": {
                "field": { "fieldPath": "category" },
                "op": "EQUAL",
                "value": { "stringValue": "books" }
            }
        }
    }))
    .unwrap();

    let mut request = subscribe_request("c1", "s1", "projects/proj1/databases/db1/documents/col");
    request.query = Some(query);
    let outcome = state.registry.subscribe(&user(), request).await.unwrap();

    create(&state, "col/a", vec![("category", Value::from_string("toys"))]).await;
    create(&state, "col/b", vec![("category", Value::from_string("books"))]).await;

    let envelope = tokio::time::timeout(Duration::from_secs(2), outcome.receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.event.path.canonical_string(), "col/b");
    assert!(outcome.receiver.try_recv().is_err());
}

#[tokio::test]
async fn graceful_shutdown_closes_subscriptions() {
    let state = state();
    state.start_background_tasks();

    let outcome = state
        .registry
        .subscribe(
            &user(),
            subscribe_request("c1", "s1", "projects/proj1/databases/db1/documents/col"),
        )
        .await
        .unwrap();

    state.shutdown().await;
    assert!(outcome.receiver.is_closed());
    assert_eq!(state.registry.subscription_count().await, 0);
}
