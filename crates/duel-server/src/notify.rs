use std::sync::Arc;

use duel_core::ids::{ConnectionId, SessionId, UserId};
use duel_core::messages::ServerMessage;
use tracing::{debug, error, warn};

use crate::registry::{ConnectionRegistry, SendError};

/// Pushes server messages onto connection queues. Never blocks: a full or
/// closed queue drops the frame.
#[derive(Clone)]
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
}

impl Notifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Returns whether the frame was queued.
    pub fn send(&self, connection_id: &ConnectionId, message: &ServerMessage) -> bool {
        match encode(message) {
            Some(frame) => self.deliver(connection_id, frame),
            None => false,
        }
    }

    /// Send to every connection bound to the session. Returns how many
    /// connections received the frame.
    pub fn broadcast(&self, session_id: &SessionId, message: &ServerMessage) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };
        self.registry
            .connections_for_session(session_id)
            .iter()
            .filter(|c| self.deliver(&c.id, frame.clone()))
            .count()
    }

    /// Send to the user's connections that are bound to the session.
    pub fn send_to_participant(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        message: &ServerMessage,
    ) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };
        self.registry
            .connections_for_session(session_id)
            .iter()
            .filter(|c| &c.user_id == user_id)
            .filter(|c| self.deliver(&c.id, frame.clone()))
            .count()
    }

    fn deliver(&self, connection_id: &ConnectionId, frame: String) -> bool {
        match self.registry.try_send(connection_id, frame) {
            Ok(()) => true,
            Err(SendError::Full) => {
                warn!(connection_id = %connection_id, "send queue full, dropping message");
                false
            }
            Err(SendError::Closed) | Err(SendError::UnknownConnection) => {
                debug!(connection_id = %connection_id, "connection gone, skipping message");
                false
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match message.to_json() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(error = %e, "failed to serialize server message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rx: &mut tokio::sync::mpsc::Receiver<String>) -> ServerMessage {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn broadcast_reaches_bound_connections_only() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let notifier = Notifier::new(Arc::clone(&registry));
        let session = SessionId::new();

        let (a, mut rx_a) = registry.register(Some(UserId::from_raw("alice")));
        let (b, mut rx_b) = registry.register(Some(UserId::from_raw("bob")));
        let (_c, mut rx_c) = registry.register(Some(UserId::from_raw("carol")));
        registry.bind_session(&a, session.clone());
        registry.bind_session(&b, session.clone());

        assert_eq!(notifier.broadcast(&session, &ServerMessage::Pong), 2);
        assert_eq!(frame(&mut rx_a), ServerMessage::Pong);
        assert_eq!(frame(&mut rx_b), ServerMessage::Pong);
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let registry = Arc::new(ConnectionRegistry::new(1));
        let notifier = Notifier::new(Arc::clone(&registry));
        let (a, mut rx) = registry.register(None);

        assert!(notifier.send(&a, &ServerMessage::Pong));
        assert!(!notifier.send(&a, &ServerMessage::Pong));
        assert_eq!(frame(&mut rx), ServerMessage::Pong);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removed_connection_is_skipped() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let notifier = Notifier::new(Arc::clone(&registry));
        let (a, _rx) = registry.register(None);
        registry.remove(&a);
        assert!(!notifier.send(&a, &ServerMessage::Pong));
    }

    #[test]
    fn participant_send_filters_by_user() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let notifier = Notifier::new(Arc::clone(&registry));
        let session = SessionId::new();
        let alice = UserId::from_raw("alice");

        let (a, mut rx_a) = registry.register(Some(alice.clone()));
        let (b, mut rx_b) = registry.register(Some(UserId::from_raw("bob")));
        registry.bind_session(&a, session.clone());
        registry.bind_session(&b, session.clone());

        assert_eq!(notifier.send_to_participant(&session, &alice, &ServerMessage::Pong), 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
