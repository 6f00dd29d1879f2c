//! Per-connection lifecycle for the WebSocket listen channel.
//!
//! Each accepted socket runs four cooperating tasks — ingress (this
//! function's own loop), egress, fan-in, and the heartbeat ticker — all
//! anchored to one watch-based cancellation scope. Any fatal path flips the
//! scope and every task returns on its next check.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_lock::{Mutex, RwLock};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;

use crate::auth::{AuthProvider, AuthUser};
use crate::config::Config;
use crate::error::{invalid_json, invalid_request_body, unauthorized};
use crate::model::{TenantId, Timestamp};
use crate::realtime::message::{self, ClientMessage};
use crate::realtime::registry::{
    EventEnvelope, SubscribeRequest, SubscriptionKey, SubscriptionOptions, SubscriptionRegistry,
};

const FAN_IN_CYCLE: Duration = Duration::from_millis(5);

fn generate_subscriber_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    format!("conn-{suffix}")
}

struct ConnectionHandle {
    cancel: watch::Sender<bool>,
    last_activity: Arc<AtomicI64>,
}

type ActiveSubs = Arc<RwLock<HashMap<String, async_channel::Receiver<EventEnvelope>>>>;

pub struct ConnectionManager {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
    registry: Arc<SubscriptionRegistry>,
    auth: Arc<dyn AuthProvider>,
    config: Config,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        auth: Arc<dyn AuthProvider>,
        config: Config,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            registry,
            auth,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Periodically reaps connections with no client activity and lets the
    /// registry evict stale subscriptions.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let period = manager.config.connection_timeout.min(Duration::from_secs(30));
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                manager.reap_idle_connections().await;
                manager
                    .registry
                    .cleanup_stale_connections(manager.config.connection_timeout)
                    .await;
            }
        })
    }

    async fn reap_idle_connections(&self) {
        let cutoff =
            Timestamp::now().seconds - self.config.connection_timeout.as_secs() as i64;
        let connections = self.connections.read().await;
        for (subscriber_id, handle) in connections.iter() {
            if handle.last_activity.load(Ordering::SeqCst) < cutoff {
                log::warn!("reaping idle connection {subscriber_id}");
                let _ = handle.cancel.send(true);
            }
        }
    }

    /// Cancels every live connection; used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let connections = self.connections.read().await;
        for handle in connections.values() {
            let _ = handle.cancel.send(true);
        }
    }

    /// Drives one upgraded socket to completion.
    pub async fn serve(self: Arc<Self>, socket: WebSocket, tenant: TenantId, user: Option<AuthUser>) {
        let subscriber_id = generate_subscriber_id();
        log::debug!("websocket connected as {subscriber_id}");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let last_activity = Arc::new(AtomicI64::new(Timestamp::now().seconds));
        {
            let mut connections = self.connections.write().await;
            connections.insert(
                subscriber_id.clone(),
                ConnectionHandle {
                    cancel: cancel_tx.clone(),
                    last_activity: Arc::clone(&last_activity),
                },
            );
        }

        let (outbound_tx, outbound_rx) =
            async_channel::bounded::<JsonValue>(self.config.outbound_queue_capacity);
        let (ws_sink, ws_stream) = socket.split();
        let active_subs: ActiveSubs = Arc::new(RwLock::new(HashMap::new()));
        let authenticated = Arc::new(AtomicBool::new(user.is_some()));
        let user_slot = Arc::new(Mutex::new(user));

        let egress = tokio::spawn(egress_loop(
            ws_sink,
            outbound_rx,
            cancel_rx.clone(),
            cancel_tx.clone(),
            self.config.write_deadline,
        ));
        let fan_in = tokio::spawn(fan_in_loop(
            Arc::clone(&active_subs),
            outbound_tx.clone(),
            cancel_rx.clone(),
        ));
        let ticker = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.registry),
            subscriber_id.clone(),
            outbound_tx.clone(),
            cancel_rx.clone(),
            cancel_tx.clone(),
            Arc::clone(&last_activity),
            self.config.heartbeat_interval,
            self.config.connection_timeout,
        ));

        if !authenticated.load(Ordering::SeqCst) {
            tokio::spawn(auth_watchdog(
                Arc::clone(&authenticated),
                outbound_tx.clone(),
                cancel_tx.clone(),
                self.config.auth_timeout,
            ));
        }

        self.ingress_loop(
            ws_stream,
            cancel_rx,
            &subscriber_id,
            &tenant,
            &outbound_tx,
            &active_subs,
            &authenticated,
            &user_slot,
            &last_activity,
        )
        .await;

        // Teardown, in order: cancel the scope, release every subscription
        // (which closes each channel exactly once), close the outbound
        // queue, drop the connection record.
        let _ = cancel_tx.send(true);
        self.registry.unsubscribe_all(&subscriber_id).await;
        active_subs.write().await.clear();
        outbound_tx.close();
        {
            let mut connections = self.connections.write().await;
            connections.remove(&subscriber_id);
        }
        let _ = egress.await;
        let _ = fan_in.await;
        ticker.abort();
        log::debug!("websocket {subscriber_id} closed");
    }

    #[allow(clippy::too_many_arguments)]
    async fn ingress_loop(
        &self,
        mut ws_stream: SplitStream<WebSocket>,
        mut cancel_rx: watch::Receiver<bool>,
        subscriber_id: &str,
        tenant: &TenantId,
        outbound_tx: &async_channel::Sender<JsonValue>,
        active_subs: &ActiveSubs,
        authenticated: &Arc<AtomicBool>,
        user_slot: &Arc<Mutex<Option<AuthUser>>>,
        last_activity: &Arc<AtomicI64>,
    ) {
        loop {
            tokio::select! {
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
                inbound = ws_stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            last_activity.store(Timestamp::now().seconds, Ordering::SeqCst);
                            self.handle_client_text(
                                &text,
                                subscriber_id,
                                tenant,
                                outbound_tx,
                                active_subs,
                                authenticated,
                                user_slot,
                            )
                            .await;
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            last_activity.store(Timestamp::now().seconds, Ordering::SeqCst);
                        }
                        Some(Ok(Message::Binary(_))) => {
                            enqueue(outbound_tx, message::error_envelope(&invalid_json(
                                "Binary frames are not part of the protocol",
                            )));
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(err)) => {
                            // Transport failure is fatal for the connection.
                            log::debug!("websocket read error on {subscriber_id}: {err}");
                            break;
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_client_text(
        &self,
        text: &str,
        subscriber_id: &str,
        tenant: &TenantId,
        outbound_tx: &async_channel::Sender<JsonValue>,
        active_subs: &ActiveSubs,
        authenticated: &Arc<AtomicBool>,
        user_slot: &Arc<Mutex<Option<AuthUser>>>,
    ) {
        let parsed: ClientMessage = match serde_json::from_str(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                // Malformed JSON is not fatal; tell the client and move on.
                enqueue(
                    outbound_tx,
                    message::error_envelope(&invalid_json(format!("Invalid message: {err}"))),
                );
                return;
            }
        };

        if let Some(token) = parsed.token.as_deref() {
            match self.auth.validate_token(token).await {
                Ok(user) => {
                    *user_slot.lock().await = Some(user);
                    authenticated.store(true, Ordering::SeqCst);
                }
                Err(err) => {
                    enqueue(outbound_tx, message::error_envelope(&err));
                    return;
                }
            }
        }

        match parsed.action.as_str() {
            "subscribe" => {
                self.handle_subscribe(
                    parsed,
                    subscriber_id,
                    tenant,
                    outbound_tx,
                    active_subs,
                    user_slot,
                )
                .await;
            }
            "unsubscribe" => {
                let Some(subscription_id) = parsed.subscription_id else {
                    enqueue(
                        outbound_tx,
                        message::error_envelope(&invalid_request_body(
                            "unsubscribe requires a subscriptionID",
                        )),
                    );
                    return;
                };
                let key = SubscriptionKey::new(subscriber_id, subscription_id.clone());
                self.registry.unsubscribe(&key).await;
                active_subs.write().await.remove(&subscription_id);
                enqueue(outbound_tx, message::unsubscription_confirmed(&subscription_id));
            }
            other => {
                enqueue(
                    outbound_tx,
                    message::error_with_code(
                        "invalid_action",
                        &format!("Unknown action {other:?}"),
                    ),
                );
            }
        }
    }

    async fn handle_subscribe(
        &self,
        parsed: ClientMessage,
        subscriber_id: &str,
        tenant: &TenantId,
        outbound_tx: &async_channel::Sender<JsonValue>,
        active_subs: &ActiveSubs,
        user_slot: &Arc<Mutex<Option<AuthUser>>>,
    ) {
        let user = user_slot.lock().await.clone();
        let Some(user) = user else {
            enqueue(
                outbound_tx,
                message::subscription_error(
                    parsed.subscription_id.as_deref(),
                    &unauthorized("Subscribe requires an authenticated connection"),
                ),
            );
            return;
        };

        let (Some(subscription_id), Some(full_path)) =
            (parsed.subscription_id.clone(), parsed.full_path.clone())
        else {
            enqueue(
                outbound_tx,
                message::subscription_error(
                    parsed.subscription_id.as_deref(),
                    &invalid_request_body("subscribe requires fullPath and subscriptionID"),
                ),
            );
            return;
        };

        let query = match parsed.query {
            Some(ref raw) => match crate::query::parse_structured_query(raw) {
                Ok(query) => Some(query),
                Err(err) => {
                    enqueue(
                        outbound_tx,
                        message::subscription_error(Some(&subscription_id), &err),
                    );
                    return;
                }
            },
            None => None,
        };

        let request = SubscribeRequest {
            key: SubscriptionKey::new(subscriber_id, subscription_id.clone()),
            tenant_org: tenant.organization_id().to_string(),
            full_path: full_path.clone(),
            resume_token: parsed.resume_token,
            query,
            options: SubscriptionOptions::default(),
        };

        match self.registry.subscribe(&user, request).await {
            Ok(outcome) => {
                active_subs
                    .write()
                    .await
                    .insert(subscription_id.clone(), outcome.receiver);
                enqueue(
                    outbound_tx,
                    message::subscription_confirmed(
                        &subscription_id,
                        json!({
                            "fullPath": full_path,
                            "initialSnapshot": outcome.initial_snapshot,
                            "resumeToken": outcome.resume_token,
                            "createdAt": outcome.created_at.to_rfc3339(),
                        }),
                    ),
                );
            }
            Err(err) => {
                enqueue(
                    outbound_tx,
                    message::subscription_error(Some(&subscription_id), &err),
                );
            }
        }
    }
}

fn enqueue(outbound_tx: &async_channel::Sender<JsonValue>, message: JsonValue) {
    match outbound_tx.try_send(message) {
        Ok(()) => {}
        Err(async_channel::TrySendError::Full(_)) => {
            log::warn!("outbound queue full; dropping server message");
        }
        Err(async_channel::TrySendError::Closed(_)) => {}
    }
}

/// Writes queued messages to the socket under a per-message deadline; a
/// failed or overdue write cancels the connection.
async fn egress_loop(
    mut ws_sink: SplitSink<WebSocket, Message>,
    outbound_rx: async_channel::Receiver<JsonValue>,
    mut cancel_rx: watch::Receiver<bool>,
    cancel_tx: watch::Sender<bool>,
    write_deadline: Duration,
) {
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            outbound = outbound_rx.recv() => {
                let Ok(value) = outbound else { break };
                let frame = Message::Text(value.to_string());
                match tokio::time::timeout(write_deadline, ws_sink.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        log::debug!("websocket write failed: {err}");
                        let _ = cancel_tx.send(true);
                        break;
                    }
                    Err(_) => {
                        log::warn!("websocket write missed its deadline");
                        let _ = cancel_tx.send(true);
                        break;
                    }
                }
            }
        }
    }
    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Polls every active subscription channel each cycle and moves events to
/// the outbound queue without blocking. A full queue drops the event.
async fn fan_in_loop(
    active_subs: ActiveSubs,
    outbound_tx: async_channel::Sender<JsonValue>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut cycle = tokio::time::interval(FAN_IN_CYCLE);
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            _ = cycle.tick() => {
                let subs = active_subs.read().await;
                for (subscription_id, receiver) in subs.iter() {
                    while let Ok(envelope) = receiver.try_recv() {
                        let frame = message::document_change(
                            subscription_id,
                            &envelope.event,
                            &envelope.resume_token,
                            envelope.include_old_fields,
                        );
                        enqueue(&outbound_tx, frame);
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn heartbeat_loop(
    registry: Arc<SubscriptionRegistry>,
    subscriber_id: String,
    outbound_tx: async_channel::Sender<JsonValue>,
    mut cancel_rx: watch::Receiver<bool>,
    cancel_tx: watch::Sender<bool>,
    last_activity: Arc<AtomicI64>,
    heartbeat_interval: Duration,
    connection_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    // The first tick fires immediately; skip it so pings start one interval
    // in.
    ticker.tick().await;
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                enqueue(&outbound_tx, message::ping());
                registry.touch_subscriber(&subscriber_id).await;

                let idle = Timestamp::now().seconds - last_activity.load(Ordering::SeqCst);
                if idle > connection_timeout.as_secs() as i64 {
                    log::warn!("connection {subscriber_id} idle for {idle}s; closing");
                    let _ = cancel_tx.send(true);
                    break;
                }
            }
        }
    }
}

/// Closes connections that never presented credentials within the auth
/// window.
async fn auth_watchdog(
    authenticated: Arc<AtomicBool>,
    outbound_tx: async_channel::Sender<JsonValue>,
    cancel_tx: watch::Sender<bool>,
    auth_timeout: Duration,
) {
    tokio::time::sleep(auth_timeout).await;
    if !authenticated.load(Ordering::SeqCst) {
        enqueue(
            &outbound_tx,
            message::error_envelope(&unauthorized("Authentication timed out")),
        );
        // Give egress a beat to flush the error before cancelling.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = cancel_tx.send(true);
    }
}
