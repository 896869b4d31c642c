//! Process-wide registry mapping a user id to its single live channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::ConnectionSender;

/// Close code sent to a channel displaced by a newer connection for the same user.
pub const CLOSE_REPLACED: u16 = 4000;

/// Close code sent to every channel when the registry shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A registered channel: the outbound queue of one WebSocket connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    /// Process-unique connection number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True while the connection's writer task still accepts frames.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a frame for delivery. Returns false if the channel is no longer open.
    pub fn send(&self, msg: Message) -> bool {
        if !self.is_open() {
            return false;
        }
        self.sender.send(msg).is_ok()
    }

    /// Ask the writer task to send a Close frame and stop.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }
}

/// Connection registry service.
///
/// Cloning is cheap and every clone shares the same map. Per-key mutation is
/// serialized by the map's shard locks; [`ConnectionRegistry::for_each`]
/// works on a snapshot, so no lock is held while a callback sends.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<String, ConnectionHandle>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `sender` as the channel for `user_id`.
    ///
    /// A channel already registered for the same user is closed with
    /// [`CLOSE_REPLACED`] before the new one is installed.
    pub fn register(&self, user_id: &str, sender: ConnectionSender) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            sender,
        };

        match self.entries.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let displaced = entry.get();
                tracing::debug!(
                    user_id = %user_id,
                    displaced = displaced.id,
                    connection_id = handle.id,
                    "Replacing existing connection"
                );
                displaced.close(CLOSE_REPLACED, "Replaced by a newer connection");
                entry.insert(handle.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(handle.clone());
            }
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = handle.id,
            "Connection registered"
        );
        handle
    }

    /// Remove whatever channel is registered for `user_id`. No-op if absent.
    pub fn unregister(&self, user_id: &str) -> bool {
        let removed = self.entries.remove(user_id).is_some();
        if removed {
            tracing::debug!(user_id = %user_id, "Connection unregistered");
        }
        removed
    }

    /// Remove the entry for `user_id` only if it is still `connection_id`.
    ///
    /// A connection that was displaced must not evict its replacement when it
    /// finally shuts down.
    pub fn unregister_connection(&self, user_id: &str, connection_id: u64) -> bool {
        let removed = self
            .entries
            .remove_if(user_id, |_, handle| handle.id == connection_id)
            .is_some();
        tracing::debug!(
            user_id = %user_id,
            connection_id = connection_id,
            removed = removed,
            "Connection unregistered"
        );
        removed
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries.get(user_id).map(|entry| entry.value().clone())
    }

    /// Invoke `f` for every registered channel as of the call.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &ConnectionHandle),
    {
        let snapshot: Vec<(String, ConnectionHandle)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (user_id, handle) in &snapshot {
            f(user_id, handle);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close and drop every registered channel. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let mut closed = 0;
        self.entries.retain(|_, handle| {
            handle.close(CLOSE_GOING_AWAY, "Server shutting down");
            closed += 1;
            false
        });
        tracing::info!(closed = closed, "Connection registry drained");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel() -> (ConnectionSender, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_lookup_tracks_latest_action_per_user() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();

        assert!(registry.lookup("1").is_none());

        let first = registry.register("1", tx1);
        assert_eq!(registry.lookup("1").unwrap().id(), first.id());

        let second = registry.register("1", tx2);
        assert_eq!(registry.lookup("1").unwrap().id(), second.id());

        registry.unregister("1");
        assert!(registry.lookup("1").is_none());

        let third = registry.register("1", tx3);
        assert_eq!(registry.lookup("1").unwrap().id(), third.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_absent_user_is_noop() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register("1", tx);

        assert!(!registry.unregister("2"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_closes_displaced_channel() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();

        registry.register("1", tx1);
        registry.register("1", tx2);

        match rx1.try_recv() {
            Ok(Message::Close(Some(frame))) => assert_eq!(frame.code, CLOSE_REPLACED),
            other => panic!("Expected close frame on displaced channel, got {:?}", other),
        }
        assert!(rx2.try_recv().is_err(), "New channel must not be closed");
    }

    #[test]
    fn test_stale_connection_does_not_evict_replacement() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let old = registry.register("1", tx1);
        let new = registry.register("1", tx2);

        assert!(!registry.unregister_connection("1", old.id()));
        assert_eq!(registry.lookup("1").unwrap().id(), new.id());

        assert!(registry.unregister_connection("1", new.id()));
        assert!(registry.lookup("1").is_none());
    }

    #[test]
    fn test_handle_reports_closed_after_receiver_drop() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = channel();
        let handle = registry.register("1", tx);

        assert!(handle.is_open());
        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.send(Message::Text("late".into())));
    }

    #[test]
    fn test_for_each_allows_mutation_from_callback() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.register("1", tx1);
        registry.register("2", tx2);

        let mut seen = Vec::new();
        registry.for_each(|user_id, _| {
            seen.push(user_id.to_string());
            registry.unregister(user_id);
        });

        seen.sort();
        assert_eq!(seen, vec!["1", "2"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register("1", tx1);
        registry.register("2", tx2);

        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_empty());

        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv() {
                Ok(Message::Close(Some(frame))) => assert_eq!(frame.code, CLOSE_GOING_AWAY),
                other => panic!("Expected close frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = ConnectionRegistry::new();
        let clone = registry.clone();
        let (tx, _rx) = channel();

        clone.register("1", tx);
        assert!(registry.lookup("1").is_some());
    }
}
