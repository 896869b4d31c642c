//! Fan-out over the connection registry.
//!
//! Delivery is best-effort and at-most-once: channels that are not open are
//! skipped, absent users are dropped silently, and nothing is queued.

use axum::extract::ws::Message;
use serde_json::Value;

use super::protocol::{Envelope, OutboundEvent};
use super::ConnectionRegistry;

/// Send `{event, data}` to every open channel. Returns the number of channels
/// the frame was queued on.
pub fn broadcast(registry: &ConnectionRegistry, event: &str, data: Value) -> usize {
    match serde_json::to_string(&Envelope::new(event, data)) {
        Ok(text) => broadcast_text(registry, text),
        Err(e) => {
            tracing::warn!(event = %event, error = %e, "Failed to serialize broadcast envelope");
            0
        }
    }
}

/// Broadcast a typed outbound event to every open channel.
pub fn broadcast_event(registry: &ConnectionRegistry, event: &OutboundEvent) -> usize {
    match serde_json::to_string(event) {
        Ok(text) => broadcast_text(registry, text),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize outbound event");
            0
        }
    }
}

/// Send `{event, data}` to one user's channel if it is registered and open.
/// Returns whether the frame was queued.
///
/// This is the entry point for business logic outside the channel protocol
/// (e.g. task assignment).
pub fn notify_user(registry: &ConnectionRegistry, user_id: &str, event: &str, data: Value) -> bool {
    match serde_json::to_string(&Envelope::new(event, data)) {
        Ok(text) => send_text_to_user(registry, user_id, text),
        Err(e) => {
            tracing::warn!(event = %event, error = %e, "Failed to serialize notification envelope");
            false
        }
    }
}

/// Send a typed outbound event to one user's channel.
pub fn send_event_to_user(registry: &ConnectionRegistry, user_id: &str, event: &OutboundEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => send_text_to_user(registry, user_id, text),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize outbound event");
            false
        }
    }
}

fn broadcast_text(registry: &ConnectionRegistry, text: String) -> usize {
    let msg = Message::Text(text.into());
    let mut delivered = 0;

    registry.for_each(|user_id, handle| {
        if handle.send(msg.clone()) {
            delivered += 1;
        } else {
            tracing::debug!(user_id = %user_id, "Skipping channel that is no longer open");
        }
    });

    delivered
}

fn send_text_to_user(registry: &ConnectionRegistry, user_id: &str, text: String) -> bool {
    let Some(handle) = registry.lookup(user_id) else {
        tracing::debug!(user_id = %user_id, "No open channel, dropping notification");
        return false;
    };

    let sent = handle.send(Message::Text(text.into()));
    if !sent {
        tracing::debug!(user_id = %user_id, "Channel closed, dropping notification");
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn listen(registry: &ConnectionRegistry, user_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(user_id, tx);
        rx
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Value> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => Some(serde_json::from_str(text.as_str()).unwrap()),
            _ => None,
        }
    }

    #[test]
    fn test_broadcast_reaches_every_open_channel() {
        let registry = ConnectionRegistry::new();
        let mut rx1 = listen(&registry, "1");
        let mut rx2 = listen(&registry, "2");

        let delivered = broadcast(
            &registry,
            "new_message",
            json!({"id": 5, "content": "hi", "teamId": "9"}),
        );

        let expected = json!({"event": "new_message", "data": {"id": 5, "content": "hi", "teamId": "9"}});
        assert_eq!(delivered, 2);
        assert_eq!(recv_json(&mut rx1), Some(expected.clone()));
        assert_eq!(recv_json(&mut rx2), Some(expected));
    }

    #[test]
    fn test_broadcast_with_no_connections_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(broadcast(&registry, "new_message", json!({})), 0);
    }

    #[test]
    fn test_broadcast_skips_closed_channel_and_continues() {
        let registry = ConnectionRegistry::new();
        let rx1 = listen(&registry, "1");
        let mut rx2 = listen(&registry, "2");
        drop(rx1);

        let delivered = broadcast(&registry, "notification", json!({"title": "T", "message": "M"}));

        assert_eq!(delivered, 1);
        assert!(recv_json(&mut rx2).is_some());
    }

    #[test]
    fn test_notify_absent_user_is_silent() {
        let registry = ConnectionRegistry::new();
        let mut rx1 = listen(&registry, "1");

        let sent = notify_user(
            &registry,
            "2",
            "task_assigned",
            json!({"taskId": 7, "title": "X", "message": "assigned"}),
        );

        assert!(!sent);
        assert!(recv_json(&mut rx1).is_none());
        assert!(registry.lookup("1").unwrap().is_open());
    }

    #[test]
    fn test_notify_after_unregister_is_silent() {
        let registry = ConnectionRegistry::new();
        let mut rx = listen(&registry, "1");
        registry.unregister("1");

        assert!(!notify_user(&registry, "1", "notification", json!({"title": "T", "message": "M"})));
        assert!(recv_json(&mut rx).is_none());
    }

    #[test]
    fn test_notify_delivers_to_target_only() {
        let registry = ConnectionRegistry::new();
        let mut rx1 = listen(&registry, "1");
        let mut rx2 = listen(&registry, "2");

        assert!(notify_user(&registry, "2", "task_assigned", json!({"taskId": 7})));

        assert!(recv_json(&mut rx1).is_none());
        assert_eq!(
            recv_json(&mut rx2),
            Some(json!({"event": "task_assigned", "data": {"taskId": 7}}))
        );
    }
}
