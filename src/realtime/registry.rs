//! The subscription registry: path-scoped fan-out of document change events
//! with resume tokens, heartbeat tracking, and a drop-on-full slow-consumer
//! policy.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_lock::RwLock;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value as JsonValue};

use crate::auth::{AuthUser, SecurityRules};
use crate::error::ApiResult;
use crate::model::{Document, TenantId, Timestamp};
use crate::paths::{parse_listen_path, DocumentAddress};
use crate::query::{matches_filters, Query};
use crate::storage::{DocumentChangeEvent, ListOptions, Storage};
use crate::value::codec;

/// `(subscriberID, subscriptionID)` — the registry key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub subscriber_id: String,
    pub subscription_id: String,
}

impl SubscriptionKey {
    pub fn new(subscriber_id: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            subscription_id: subscription_id.into(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SubscriptionOptions {
    pub include_old_fields: bool,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            include_old_fields: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    pub key: SubscriptionKey,
    pub tenant_org: String,
    pub full_path: String,
    pub resume_token: Option<String>,
    pub query: Option<Query>,
    pub options: SubscriptionOptions,
}

/// An event stamped for one subscription.
#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub event: DocumentChangeEvent,
    pub resume_token: String,
    pub sequence: u64,
    pub include_old_fields: bool,
}

pub struct SubscribeOutcome {
    pub receiver: async_channel::Receiver<EventEnvelope>,
    pub resume_token: String,
    pub created_at: Timestamp,
    pub initial_snapshot: JsonValue,
}

struct SubscriptionState {
    sender: async_channel::Sender<EventEnvelope>,
    tenant: TenantId,
    full_path: String,
    is_document: bool,
    query: Option<Query>,
    options: SubscriptionOptions,
    last_heartbeat: Timestamp,
    last_resume_token: u64,
}

#[derive(Default)]
struct RegistryState {
    by_path: HashMap<String, HashSet<SubscriptionKey>>,
    subscriptions: HashMap<SubscriptionKey, SubscriptionState>,
    replay: VecDeque<(u64, DocumentChangeEvent)>,
}

pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    sequence: AtomicU64,
    storage: Arc<dyn Storage>,
    rules: Arc<dyn SecurityRules>,
    channel_capacity: usize,
    replay_window: usize,
}

pub fn encode_resume_token(sequence: u64) -> String {
    STANDARD.encode(sequence.to_string())
}

pub fn decode_resume_token(token: &str) -> Option<u64> {
    let bytes = STANDARD.decode(token).ok()?;
    std::str::from_utf8(&bytes).ok()?.parse().ok()
}

impl SubscriptionRegistry {
    pub fn new(
        storage: Arc<dyn Storage>,
        rules: Arc<dyn SecurityRules>,
        channel_capacity: usize,
        replay_window: usize,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            sequence: AtomicU64::new(0),
            storage,
            rules,
            channel_capacity,
            replay_window,
        }
    }

    /// Drains the storage change feed into the registry until the feed
    /// closes.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        events: async_channel::Receiver<DocumentChangeEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                registry.deliver(event).await;
            }
            log::debug!("storage change feed closed; event pump stopping");
        })
    }

    pub async fn subscribe(
        &self,
        user: &AuthUser,
        request: SubscribeRequest,
    ) -> ApiResult<SubscribeOutcome> {
        let listen = parse_listen_path(&request.full_path)?;
        self.rules.validate_read(user, &request.full_path).await?;

        let tenant = TenantId::new(
            request.tenant_org.clone(),
            listen.project_id(),
            listen.database_id(),
        );

        let initial_snapshot = self.initial_snapshot(&tenant, listen.address()).await?;

        let (sender, receiver) = async_channel::bounded(self.channel_capacity);
        let created_at = Timestamp::now();

        let mut state = self.state.write().await;

        // Closing any previous channel under the same key keeps the
        // exactly-once close invariant when a client re-subscribes.
        self.remove_locked(&mut state, &request.key);

        let resume_from = request.resume_token.as_deref().and_then(decode_resume_token);
        if let Some(resume_from) = resume_from {
            self.replay_locked(
                &state,
                &sender,
                &request,
                &tenant,
                listen.address().is_document(),
                resume_from,
            );
        }

        let current = self.sequence.load(Ordering::SeqCst);
        let resume_token = encode_resume_token(current);

        state
            .by_path
            .entry(request.full_path.clone())
            .or_default()
            .insert(request.key.clone());
        state.subscriptions.insert(
            request.key.clone(),
            SubscriptionState {
                sender,
                tenant,
                full_path: request.full_path.clone(),
                is_document: listen.address().is_document(),
                query: request.query,
                options: request.options,
                last_heartbeat: created_at,
                last_resume_token: current,
            },
        );

        Ok(SubscribeOutcome {
            receiver,
            resume_token,
            created_at,
            initial_snapshot,
        })
    }

    async fn initial_snapshot(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
    ) -> ApiResult<JsonValue> {
        if address.is_document() {
            match self.storage.get_document(tenant, address).await {
                Ok(document) => Ok(json!({
                    "path": tenant.resource_name(&document.path().canonical_string()),
                    "fields": codec::encode_fields_object(document.fields()),
                    "createTime": document.create_time().to_rfc3339(),
                    "updateTime": document.update_time().to_rfc3339(),
                })),
                Err(err) if err.code() == "document_not_found" => Ok(JsonValue::Null),
                Err(err) => Err(err),
            }
        } else {
            let options = ListOptions {
                page_size: Some(100),
                ..Default::default()
            };
            let page = self
                .storage
                .list_documents(tenant, address.collection_path(), &options)
                .await?;
            let documents: Vec<JsonValue> = page
                .documents
                .iter()
                .map(|document| {
                    json!({
                        "path": tenant.resource_name(&document.path().canonical_string()),
                        "fields": codec::encode_fields_object(document.fields()),
                        "createTime": document.create_time().to_rfc3339(),
                        "updateTime": document.update_time().to_rfc3339(),
                    })
                })
                .collect();
            Ok(json!({ "documents": documents, "count": documents.len() }))
        }
    }

    /// Replays retained events strictly after `resume_from` into a freshly
    /// created channel. Tokens older than the replay window cannot be
    /// resumed gap-free; the subscription then restarts from the snapshot.
    fn replay_locked(
        &self,
        state: &RegistryState,
        sender: &async_channel::Sender<EventEnvelope>,
        request: &SubscribeRequest,
        tenant: &TenantId,
        is_document: bool,
        resume_from: u64,
    ) {
        if let Some((oldest, _)) = state.replay.front() {
            if resume_from + 1 < *oldest {
                log::warn!(
                    "resume token {resume_from} predates the replay window (oldest {oldest}); \
                     restarting {key:?} from snapshot",
                    key = request.key
                );
                return;
            }
        }

        for (sequence, event) in state.replay.iter() {
            if *sequence <= resume_from {
                continue;
            }
            if !event_matches(
                event,
                tenant,
                &request.full_path,
                is_document,
                request.query.as_ref(),
            ) {
                continue;
            }
            let envelope = EventEnvelope {
                event: event.clone(),
                resume_token: encode_resume_token(*sequence),
                sequence: *sequence,
                include_old_fields: request.options.include_old_fields,
            };
            if let Err(err) = sender.try_send(envelope) {
                log::warn!("replay overflowed subscription channel: {err}");
                break;
            }
        }
    }

    /// Fans one storage event out to every matching subscription. Sends are
    /// non-blocking: a full channel drops the event for that subscriber
    /// only.
    pub async fn deliver(&self, event: DocumentChangeEvent) {
        let mut state = self.state.write().await;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        state.replay.push_back((sequence, event.clone()));
        while state.replay.len() > self.replay_window {
            state.replay.pop_front();
        }

        let event_path = event.full_path();
        let mut matched: Vec<SubscriptionKey> = Vec::new();
        for (prefix, keys) in state.by_path.iter() {
            if &event_path == prefix || event_path.starts_with(&format!("{prefix}/")) {
                matched.extend(keys.iter().cloned());
            }
        }

        for key in matched {
            let Some(subscription) = state.subscriptions.get_mut(&key) else {
                continue;
            };
            if subscription.tenant != event.tenant {
                continue;
            }
            if !event_matches(
                &event,
                &subscription.tenant,
                &subscription.full_path,
                subscription.is_document,
                subscription.query.as_ref(),
            ) {
                continue;
            }

            subscription.last_resume_token = sequence;
            let envelope = EventEnvelope {
                event: event.clone(),
                resume_token: encode_resume_token(sequence),
                sequence,
                include_old_fields: subscription.options.include_old_fields,
            };
            match subscription.sender.try_send(envelope) {
                Ok(()) => {}
                Err(async_channel::TrySendError::Full(_)) => {
                    log::warn!(
                        "subscription channel full; dropping event {sequence} for {key:?} \
                         (client can resume from its last token)"
                    );
                }
                Err(async_channel::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Removes one subscription and closes its channel. Unknown keys are a
    /// no-op success.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let mut state = self.state.write().await;
        self.remove_locked(&mut state, key)
    }

    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
        let mut state = self.state.write().await;
        let keys: Vec<SubscriptionKey> = state
            .subscriptions
            .keys()
            .filter(|key| key.subscriber_id == subscriber_id)
            .cloned()
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.remove_locked(&mut state, &key) {
                removed += 1;
            }
        }
        removed
    }

    fn remove_locked(&self, state: &mut RegistryState, key: &SubscriptionKey) -> bool {
        let Some(subscription) = state.subscriptions.remove(key) else {
            return false;
        };
        // The map entry is the single owner of the sender, so this close
        // happens exactly once per subscription.
        subscription.sender.close();
        if let Some(keys) = state.by_path.get_mut(&subscription.full_path) {
            keys.remove(key);
            if keys.is_empty() {
                state.by_path.remove(&subscription.full_path);
            }
        }
        true
    }

    pub async fn update_last_heartbeat(&self, key: &SubscriptionKey) {
        let mut state = self.state.write().await;
        if let Some(subscription) = state.subscriptions.get_mut(key) {
            let now = Timestamp::now();
            if now > subscription.last_heartbeat {
                subscription.last_heartbeat = now;
            }
        }
    }

    /// Stamps every subscription of one subscriber, the per-tick path the
    /// connection manager uses.
    pub async fn touch_subscriber(&self, subscriber_id: &str) {
        let mut state = self.state.write().await;
        let now = Timestamp::now();
        for (key, subscription) in state.subscriptions.iter_mut() {
            if key.subscriber_id == subscriber_id && now > subscription.last_heartbeat {
                subscription.last_heartbeat = now;
            }
        }
    }

    /// Global sweep: refreshes every live subscription's heartbeat.
    pub async fn send_heartbeat(&self) -> usize {
        let mut state = self.state.write().await;
        let now = Timestamp::now();
        for subscription in state.subscriptions.values_mut() {
            if now > subscription.last_heartbeat {
                subscription.last_heartbeat = now;
            }
        }
        state.subscriptions.len()
    }

    /// Evicts subscriptions whose heartbeat age exceeds `timeout`; the
    /// registry's authoritative liveness signal.
    pub async fn cleanup_stale_connections(&self, timeout: Duration) -> Vec<SubscriptionKey> {
        let cutoff = Timestamp::now().seconds - timeout.as_secs() as i64;
        let mut state = self.state.write().await;
        let stale: Vec<SubscriptionKey> = state
            .subscriptions
            .iter()
            .filter(|(_, subscription)| subscription.last_heartbeat.seconds < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            log::warn!("evicting stale subscription {key:?}");
            self.remove_locked(&mut state, key);
        }
        stale
    }

    pub async fn subscription_count(&self) -> usize {
        self.state.read().await.subscriptions.len()
    }

    /// Closes every channel; called on graceful shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        for (_, subscription) in state.subscriptions.drain() {
            subscription.sender.close();
        }
        state.by_path.clear();
        state.replay.clear();
    }
}

fn event_matches(
    event: &DocumentChangeEvent,
    tenant: &TenantId,
    full_path: &str,
    is_document: bool,
    query: Option<&Query>,
) -> bool {
    if &event.tenant != tenant {
        return false;
    }
    let event_path = event.full_path();
    let path_matches = if is_document {
        event_path == full_path
    } else {
        event_path == full_path || event_path.starts_with(&format!("{full_path}/"))
    };
    if !path_matches {
        return false;
    }

    if let Some(query) = query {
        // Deletions cannot be evaluated against the predicate; deliver them
        // so clients can drop the document.
        if let Some(fields) = &event.fields {
            let document = Document::new(
                event.path.clone(),
                fields.clone(),
                event.read_time,
                event.read_time,
            );
            return matches_filters(&document, query.filters());
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OpenRules;
    use crate::storage::{ChangeType, MemoryStore};
    use crate::value::{MapValue, Value};

    fn registry_with_store() -> (Arc<SubscriptionRegistry>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SubscriptionRegistry::new(
            store.clone(),
            Arc::new(OpenRules),
            8,
            64,
        ));
        (registry, store)
    }

    fn user() -> AuthUser {
        AuthUser::new("tester", None)
    }

    fn request(subscriber: &str, subscription: &str, full_path: &str) -> SubscribeRequest {
        SubscribeRequest {
            key: SubscriptionKey::new(subscriber, subscription),
            tenant_org: "org".to_string(),
            full_path: full_path.to_string(),
            resume_token: None,
            query: None,
            options: SubscriptionOptions::default(),
        }
    }

    fn change_event(path: &str, value: i64) -> DocumentChangeEvent {
        let mut fields = MapValue::empty();
        fields.insert("n", Value::from_integer(value));
        DocumentChangeEvent {
            tenant: TenantId::new("org", "p", "d"),
            change_type: ChangeType::Updated,
            path: crate::model::ResourcePath::from_string(path).unwrap(),
            fields: Some(fields),
            old_fields: None,
            read_time: Timestamp::now(),
        }
    }

    #[test]
    fn resume_tokens_roundtrip() {
        let token = encode_resume_token(42);
        assert_eq!(decode_resume_token(&token), Some(42));
        assert_eq!(decode_resume_token("not base64!"), None);
    }

    #[tokio::test]
    async fn document_subscription_receives_matching_events() {
        let (registry, _store) = registry_with_store();
        let outcome = registry
            .subscribe(
                &user(),
                request("c1", "s1", "projects/p/databases/d/documents/col/docX"),
            )
            .await
            .unwrap();

        registry.deliver(change_event("col/docX", 1)).await;
        registry.deliver(change_event("col/other", 2)).await;

        let envelope = outcome.receiver.recv().await.unwrap();
        assert_eq!(envelope.event.path.canonical_string(), "col/docX");
        assert!(outcome.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn collection_subscription_matches_prefix() {
        let (registry, _store) = registry_with_store();
        let outcome = registry
            .subscribe(
                &user(),
                request("c1", "s1", "projects/p/databases/d/documents/col"),
            )
            .await
            .unwrap();

        registry.deliver(change_event("col/docA", 1)).await;
        registry.deliver(change_event("elsewhere/docB", 2)).await;

        let envelope = outcome.receiver.recv().await.unwrap();
        assert_eq!(envelope.event.path.canonical_string(), "col/docA");
        assert!(outcome.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_exactly_once() {
        let (registry, _store) = registry_with_store();
        let outcome = registry
            .subscribe(
                &user(),
                request("c1", "s1", "projects/p/databases/d/documents/col/docX"),
            )
            .await
            .unwrap();

        assert!(registry.unsubscribe(&SubscriptionKey::new("c1", "s1")).await);
        assert!(outcome.receiver.is_closed());
        // Idempotent.
        assert!(!registry.unsubscribe(&SubscriptionKey::new("c1", "s1")).await);

        registry.deliver(change_event("col/docX", 1)).await;
        assert!(outcome.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_all_removes_only_that_subscriber() {
        let (registry, _store) = registry_with_store();
        registry
            .subscribe(
                &user(),
                request("c1", "s1", "projects/p/databases/d/documents/col"),
            )
            .await
            .unwrap();
        registry
            .subscribe(
                &user(),
                request("c1", "s2", "projects/p/databases/d/documents/col2"),
            )
            .await
            .unwrap();
        registry
            .subscribe(
                &user(),
                request("c2", "s1", "projects/p/databases/d/documents/col"),
            )
            .await
            .unwrap();

        assert_eq!(registry.unsubscribe_all("c1").await, 2);
        assert_eq!(registry.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn slow_consumer_drops_without_blocking_others() {
        let (registry, _store) = registry_with_store();
        let slow = registry
            .subscribe(
                &user(),
                request("slow", "s1", "projects/p/databases/d/documents/col"),
            )
            .await
            .unwrap();
        let fast = registry
            .subscribe(
                &user(),
                request("fast", "s1", "projects/p/databases/d/documents/col"),
            )
            .await
            .unwrap();

        // Channel capacity in tests is 8; push past it without draining the
        // slow consumer.
        for i in 0..12 {
            registry.deliver(change_event("col/doc", i)).await;
        }

        let mut fast_count = 0;
        while fast.receiver.try_recv().is_ok() {
            fast_count += 1;
        }
        // The fast consumer also was not drained, so it drops too once full;
        // the point is delivery never blocked and both got the first 8.
        assert_eq!(fast_count, 8);

        let mut slow_count = 0;
        while slow.receiver.try_recv().is_ok() {
            slow_count += 1;
        }
        assert_eq!(slow_count, 8);
    }

    #[tokio::test]
    async fn resume_replays_events_after_token_without_gaps() {
        let (registry, _store) = registry_with_store();
        let first = registry
            .subscribe(
                &user(),
                request("c1", "s1", "projects/p/databases/d/documents/col"),
            )
            .await
            .unwrap();

        registry.deliver(change_event("col/doc", 1)).await;
        let token = first.receiver.recv().await.unwrap().resume_token;

        registry.deliver(change_event("col/doc", 2)).await;
        registry.deliver(change_event("col/doc", 3)).await;
        registry.unsubscribe(&SubscriptionKey::new("c1", "s1")).await;

        let mut resume = request("c1", "s1", "projects/p/databases/d/documents/col");
        resume.resume_token = Some(token);
        let second = registry.subscribe(&user(), resume).await.unwrap();

        let a = second.receiver.recv().await.unwrap();
        let b = second.receiver.recv().await.unwrap();
        assert_eq!(a.sequence + 1, b.sequence);
        assert!(second.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn query_predicate_filters_events() {
        let (registry, _store) = registry_with_store();
        let query = crate::query::parse_structured_query(&serde_json::json!({
            "from": [{ "collectionId": "col" }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": "n" },
                    "op": "GREATER_THAN",
                    "value": { "integerValue": "5" }
                }
            }
        }))
        .unwrap();

        let mut req = request("c1", "s1", "projects/p/databases/d/documents/col");
        req.query = Some(query);
        let outcome = registry.subscribe(&user(), req).await.unwrap();

        registry.deliver(change_event("col/doc", 3)).await;
        registry.deliver(change_event("col/doc", 9)).await;

        let envelope = outcome.receiver.recv().await.unwrap();
        assert_eq!(
            envelope.event.fields.as_ref().unwrap().fields()["n"],
            Value::from_integer(9)
        );
        assert!(outcome.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_subscriptions_are_evicted() {
        let (registry, _store) = registry_with_store();
        registry
            .subscribe(
                &user(),
                request("c1", "s1", "projects/p/databases/d/documents/col"),
            )
            .await
            .unwrap();

        let evicted = registry
            .cleanup_stale_connections(Duration::from_secs(60))
            .await;
        assert!(evicted.is_empty());

        {
            let mut state = registry.state.write().await;
            let subscription = state
                .subscriptions
                .get_mut(&SubscriptionKey::new("c1", "s1"))
                .unwrap();
            subscription.last_heartbeat = Timestamp::new(0, 0);
        }
        let evicted = registry
            .cleanup_stale_connections(Duration::from_secs(60))
            .await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(registry.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn initial_snapshot_for_existing_document() {
        let (registry, store) = registry_with_store();
        let tenant = TenantId::new("org", "p", "d");
        let mut fields = MapValue::empty();
        fields.insert("name", Value::from_string("sf"));
        store
            .create_document(
                &tenant,
                &crate::paths::split_path("col/docX").unwrap(),
                fields,
            )
            .await
            .unwrap();

        let outcome = registry
            .subscribe(
                &user(),
                request("c1", "s1", "projects/p/databases/d/documents/col/docX"),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.initial_snapshot["fields"]["name"]["stringValue"],
            "sf"
        );
    }
}
