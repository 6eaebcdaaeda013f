use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use duel_core::ids::{ConnectionId, SessionId, UserId};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A live WebSocket connection.
struct Connection {
    user_id: UserId,
    session_id: Option<SessionId>,
    tx: mpsc::Sender<String>,
    last_seen: Instant,
}

/// Snapshot of a connection's identity and membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The outbound queue is at capacity; the frame was dropped.
    Full,
    /// The writer side is gone.
    Closed,
    UnknownConnection,
}

/// Identity and membership of every live connection. Holds no business
/// rules; the coordinator decides what membership means.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Admit a connection. Without a user id, a provisional guest id is assigned.
    pub fn register(&self, user_id: Option<UserId>) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections.insert(
            id.clone(),
            Connection {
                user_id: user_id.unwrap_or_default(),
                session_id: None,
                tx,
                last_seen: Instant::now(),
            },
        );
        (id, rx)
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|c| ConnectionInfo {
            id: id.clone(),
            user_id: c.user_id.clone(),
            session_id: c.session_id.clone(),
        })
    }

    pub fn bind_session(&self, id: &ConnectionId, session_id: SessionId) {
        if let Some(mut c) = self.connections.get_mut(id) {
            c.session_id = Some(session_id);
        }
    }

    pub fn unbind_session(&self, id: &ConnectionId) {
        if let Some(mut c) = self.connections.get_mut(id) {
            c.session_id = None;
        }
    }

    /// Remove a connection, returning what it looked like (including the
    /// session it was bound to). Dropping the sender ends its writer.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.remove(id).map(|(id, c)| ConnectionInfo {
            id,
            user_id: c.user_id,
            session_id: c.session_id,
        })
    }

    pub fn connections_for_session(&self, session_id: &SessionId) -> Vec<ConnectionInfo> {
        self.collect(|c| c.session_id.as_ref() == Some(session_id))
    }

    pub fn connections_for_user(&self, user_id: &UserId) -> Vec<ConnectionInfo> {
        self.collect(|c| &c.user_id == user_id)
    }

    fn collect(&self, pred: impl Fn(&Connection) -> bool) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| ConnectionInfo {
                id: entry.key().clone(),
                user_id: entry.user_id.clone(),
                session_id: entry.session_id.clone(),
            })
            .collect()
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(mut c) = self.connections.get_mut(id) {
            c.last_seen = Instant::now();
        }
    }

    /// Connections silent for at least `timeout`.
    pub fn dead_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        self.connections
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) >= timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, id: &ConnectionId, frame: String) -> Result<(), SendError> {
        // Clone the sender so the map shard is not held during the send.
        let tx = self
            .connections
            .get(id)
            .map(|c| c.tx.clone())
            .ok_or(SendError::UnknownConnection)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

/// Drive one WebSocket: the writer forwards queued frames and pings on
/// `heartbeat`; the reader hands text frames to `on_frame` and records
/// liveness. Returns when either side finishes.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ConnectionRegistry>,
    on_frame: mpsc::Sender<(ConnectionId, String)>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_cid = connection_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_registry.record_pong(&reader_cid);
                    if on_frame
                        .send((reader_cid.clone(), text.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&reader_cid),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_guest_identity() {
        let registry = ConnectionRegistry::new(8);
        let (id, _rx) = registry.register(None);
        let info = registry.lookup(&id).unwrap();
        assert!(info.user_id.is_provisional());
        assert!(info.session_id.is_none());
        assert!(id.as_str().starts_with("conn_"));
    }

    #[test]
    fn register_keeps_supplied_identity() {
        let registry = ConnectionRegistry::new(8);
        let (id, _rx) = registry.register(Some(UserId::from_raw("alice")));
        assert_eq!(registry.lookup(&id).unwrap().user_id.as_str(), "alice");
    }

    #[test]
    fn bind_and_remove() {
        let registry = ConnectionRegistry::new(8);
        let (a, _rxa) = registry.register(Some(UserId::from_raw("alice")));
        let (b, _rxb) = registry.register(Some(UserId::from_raw("bob")));
        let (_c, _rxc) = registry.register(Some(UserId::from_raw("carol")));
        let session = SessionId::new();

        registry.bind_session(&a, session.clone());
        registry.bind_session(&b, session.clone());
        assert_eq!(registry.connections_for_session(&session).len(), 2);

        registry.unbind_session(&b);
        assert_eq!(registry.connections_for_session(&session).len(), 1);

        let removed = registry.remove(&a).unwrap();
        assert_eq!(removed.session_id, Some(session.clone()));
        assert!(registry.connections_for_session(&session).is_empty());
        assert_eq!(registry.count(), 2);

        assert!(registry.remove(&a).is_none());
    }

    #[test]
    fn binding_a_gone_connection_is_a_noop() {
        let registry = ConnectionRegistry::new(8);
        let ghost = ConnectionId::new();
        registry.bind_session(&ghost, SessionId::new());
        registry.unbind_session(&ghost);
        assert!(registry.lookup(&ghost).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn connections_for_user_spans_tabs() {
        let registry = ConnectionRegistry::new(8);
        let alice = UserId::from_raw("alice");
        let (_a1, _r1) = registry.register(Some(alice.clone()));
        let (_a2, _r2) = registry.register(Some(alice.clone()));
        let (_b, _r3) = registry.register(Some(UserId::from_raw("bob")));
        assert_eq!(registry.connections_for_user(&alice).len(), 2);
    }

    #[tokio::test]
    async fn try_send_delivers() {
        let registry = ConnectionRegistry::new(8);
        let (id, mut rx) = registry.register(None);
        registry.try_send(&id, "hello".into()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn try_send_full_queue_drops() {
        let registry = ConnectionRegistry::new(2);
        let (id, _rx) = registry.register(None);
        assert!(registry.try_send(&id, "1".into()).is_ok());
        assert!(registry.try_send(&id, "2".into()).is_ok());
        assert_eq!(registry.try_send(&id, "3".into()), Err(SendError::Full));
    }

    #[test]
    fn try_send_closed_and_unknown() {
        let registry = ConnectionRegistry::new(2);
        let (id, rx) = registry.register(None);
        drop(rx);
        assert_eq!(registry.try_send(&id, "x".into()), Err(SendError::Closed));
        assert_eq!(
            registry.try_send(&ConnectionId::new(), "x".into()),
            Err(SendError::UnknownConnection)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dead_connections_after_silence() {
        let registry = ConnectionRegistry::new(8);
        let (quiet, _r1) = registry.register(None);
        let (chatty, _r2) = registry.register(None);

        tokio::time::advance(Duration::from_secs(60)).await;
        registry.record_pong(&chatty);
        tokio::time::advance(Duration::from_secs(31)).await;

        let dead = registry.dead_connections(Duration::from_secs(90));
        assert_eq!(dead, vec![quiet]);
    }
}
