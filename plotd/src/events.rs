//! Event fan-out to connected clients.
//!
//! Each connection registers a handle carrying an outbound channel and
//! its job subscriptions. Three delivery modes: broadcast to everyone,
//! broadcast to subscribers of one job, and unicast back to a single
//! client. A heartbeat task reaps clients that stop answering probes.

use plot_common::types::JobId;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default liveness probe period.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Identifier for one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the socket writer receives for one client.
#[derive(Debug)]
pub enum Outbound {
    /// A serialized event envelope.
    Event(String),
    /// A liveness probe; the writer maps this to a protocol ping.
    Ping,
}

struct ClientHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    subscriptions: HashSet<JobId>,
    alive: bool,
}

/// Subscription-keyed broadcast bus.
#[derive(Clone, Default)]
pub struct EventBus {
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new client; the receiver feeds its socket writer.
    pub async fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<Outbound>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().await.insert(
            id,
            ClientHandle {
                tx,
                subscriptions: HashSet::new(),
                alive: true,
            },
        );
        debug!(client = %id, "client registered");
        (id, rx)
    }

    /// Detach a client and drop all of its subscriptions.
    pub async fn unregister(&self, id: &ClientId) {
        if self.clients.write().await.remove(id).is_some() {
            debug!(client = %id, "client unregistered");
        }
    }

    /// Subscribe a client to one job's events.
    pub async fn subscribe(&self, id: &ClientId, job: JobId) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(id) {
            Some(handle) => {
                handle.subscriptions.insert(job);
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe(&self, id: &ClientId, job: &JobId) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(id) {
            Some(handle) => {
                handle.subscriptions.remove(job);
                true
            }
            None => false,
        }
    }

    /// Record proof of life for the heartbeat sweep.
    pub async fn mark_alive(&self, id: &ClientId) {
        if let Some(handle) = self.clients.write().await.get_mut(id) {
            handle.alive = true;
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Deliver an event to every connected client.
    pub async fn broadcast<T: Serialize>(&self, event: &str, data: &T) {
        let Some(payload) = envelope(event, data) else {
            return;
        };
        let clients = self.clients.read().await;
        for handle in clients.values() {
            let _ = handle.tx.send(Outbound::Event(payload.clone()));
        }
    }

    /// Deliver an event to the subscribers of one job.
    pub async fn broadcast_job<T: Serialize>(&self, job: &JobId, event: &str, data: &T) {
        let Some(payload) = envelope(event, data) else {
            return;
        };
        let clients = self.clients.read().await;
        for handle in clients.values() {
            if handle.subscriptions.contains(job) {
                let _ = handle.tx.send(Outbound::Event(payload.clone()));
            }
        }
    }

    /// Deliver an event to a single client.
    pub async fn send_to<T: Serialize>(&self, id: &ClientId, event: &str, data: &T) {
        let Some(payload) = envelope(event, data) else {
            return;
        };
        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(id) {
            let _ = handle.tx.send(Outbound::Event(payload));
        }
    }

    /// Spawn the liveness sweep.
    ///
    /// Every interval, clients that did not answer the previous probe
    /// are dropped (closing their outbound channel ends the socket) and
    /// the rest are probed again.
    pub fn start_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let clients = self.clients.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so clients get a
            // full interval to answer the first probe.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut clients = clients.write().await;
                let before = clients.len();
                clients.retain(|id, handle| {
                    if !handle.alive {
                        warn!(client = %id, "client missed heartbeat, dropping");
                        return false;
                    }
                    handle.alive = false;
                    handle.tx.send(Outbound::Ping).is_ok()
                });
                let dropped = before - clients.len();
                if dropped > 0 {
                    debug!(dropped, remaining = clients.len(), "heartbeat sweep");
                }
            }
        })
    }
}

/// Wrap an event in the wire envelope.
fn envelope<T: Serialize>(event: &str, data: &T) -> Option<String> {
    let payload = json!({
        "type": event,
        "data": data,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    });
    match serde_json::to_string(&payload) {
        Ok(serialized) => Some(serialized),
        Err(err) => {
            warn!("failed to serialize event {event}: {err}");
            None
        }
    }
}
