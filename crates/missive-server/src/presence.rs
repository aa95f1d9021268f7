//! Connection registry and presence publisher.
//!
//! Maps each user to at most one live connection. The registry is an
//! injected, explicitly-scoped object constructed once per process; tests
//! build as many isolated registries as they like.
//!
//! A second connection for the same user overwrites the first without
//! closing it (last connection wins), and an unregister only takes effect
//! when it comes from the connection that currently owns the mapping, so a
//! slow disconnect of the old connection cannot evict the new one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use missive_shared::events::ServerEvent;
use missive_shared::UserId;

/// Write half of one live connection. Events pushed here are serialized and
/// written out by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(conn_id: Uuid, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { conn_id, tx }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Fire-and-forget push. Returns false if the connection is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a connection for `user_id`, unconditionally overwriting any
    /// prior mapping, then broadcast the new online set. The mutation and
    /// broadcast happen under one lock acquisition so every connection sees
    /// presence snapshots in event order.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle) {
        let mut map = self.inner.lock().await;
        map.insert(user_id, handle);
        broadcast_presence(&map);
    }

    /// Remove the mapping for `user_id`, but only if `conn_id` still owns it.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) {
        let mut map = self.inner.lock().await;
        let owns = map
            .get(&user_id)
            .map(|h| h.conn_id() == conn_id)
            .unwrap_or(false);
        if owns {
            map.remove(&user_id);
            broadcast_presence(&map);
        } else {
            tracing::debug!(user = %user_id, conn = %conn_id, "stale unregister ignored");
        }
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.inner.lock().await.contains_key(user_id)
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.inner.lock().await.keys().copied().collect()
    }

    /// Push an event to one user's connection. Absent simply means offline;
    /// callers fall back on persistence rather than treating it as an error.
    pub async fn send_to(&self, user_id: &UserId, event: ServerEvent) -> bool {
        let map = self.inner.lock().await;
        match map.get(user_id) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast the full online set to every live connection. One broadcast per
/// registry change, no coalescing, no acks.
fn broadcast_presence(map: &HashMap<UserId, ConnectionHandle>) {
    let online: Vec<UserId> = map.keys().copied().collect();
    let event = ServerEvent::PresenceUpdate { online };
    for handle in map.values() {
        handle.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(Uuid::new_v4(), tx), rx)
    }

    fn last_presence(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<UserId> {
        let mut online = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::PresenceUpdate { online: set } = event {
                online = set;
            }
        }
        online
    }

    #[tokio::test]
    async fn connect_then_disconnect_leaves_user_absent() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let other = UserId::new();

        let (h_other, mut rx_other) = handle();
        registry.register(other, h_other).await;

        let (h, _rx) = handle();
        let conn_id = h.conn_id();
        registry.register(user, h).await;
        assert!(registry.is_online(&user).await);

        registry.unregister(user, conn_id).await;
        assert!(!registry.is_online(&user).await);

        // The surviving connection's final presence broadcast excludes the
        // departed user.
        let online = last_presence(&mut rx_other);
        assert!(online.contains(&other));
        assert!(!online.contains(&user));
    }

    #[tokio::test]
    async fn last_connection_wins() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();

        let (h1, _rx1) = handle();
        let old_conn = h1.conn_id();
        registry.register(user, h1).await;

        let (h2, mut rx2) = handle();
        registry.register(user, h2).await;

        // A late disconnect from the replaced connection must not evict the
        // new mapping.
        registry.unregister(user, old_conn).await;
        assert!(registry.is_online(&user).await);

        // The new connection can still receive pushes.
        assert!(
            registry
                .send_to(
                    &user,
                    ServerEvent::RequestError {
                        message: "ping".into(),
                        request_id: None,
                    },
                )
                .await
        );
        let mut seen_ping = false;
        while let Ok(event) = rx2.try_recv() {
            if matches!(event, ServerEvent::RequestError { .. }) {
                seen_ping = true;
            }
        }
        assert!(seen_ping);
    }

    #[tokio::test]
    async fn every_registry_change_broadcasts_in_order() {
        let registry = PresenceRegistry::new();
        let watcher = UserId::new();
        let (h, mut rx) = handle();
        registry.register(watcher, h).await;

        let visitor = UserId::new();
        let (hv, _rxv) = handle();
        let visitor_conn = hv.conn_id();
        registry.register(visitor, hv).await;
        registry.unregister(visitor, visitor_conn).await;

        let mut snapshots = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::PresenceUpdate { online } = event {
                snapshots.push(online);
            }
        }
        // Own registration, visitor's arrival, visitor's departure.
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots[1].contains(&visitor));
        assert!(!snapshots[2].contains(&visitor));
    }

    #[tokio::test]
    async fn send_to_offline_user_reports_absent() {
        let registry = PresenceRegistry::new();
        let delivered = registry
            .send_to(
                &UserId::new(),
                ServerEvent::PresenceUpdate { online: vec![] },
            )
            .await;
        assert!(!delivered);
    }
}
