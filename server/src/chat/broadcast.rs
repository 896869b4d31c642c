//! WebSocket broadcast helpers for chat events.

use std::sync::Arc;

use crate::chat::store::{ChatMessage, ChatStore, StoreError};
use crate::ws::broadcast::broadcast_event;
use crate::ws::protocol::OutboundEvent;
use crate::ws::ConnectionRegistry;

/// Broadcast a `new_message` event to all connected channels.
/// Clients filter by the embedded `teamId`.
pub fn broadcast_new_message(registry: &ConnectionRegistry, message: &ChatMessage) -> usize {
    broadcast_event(registry, &OutboundEvent::NewMessage(message.clone()))
}

/// Persist a chat message, then broadcast it.
///
/// The broadcast happens only after the store call returns successfully, so
/// no observer sees a message that is not durable. On failure nothing is
/// broadcast. Returns the stored message and the number of channels reached.
pub async fn persist_and_broadcast(
    store: &Arc<dyn ChatStore>,
    registry: &ConnectionRegistry,
    team_id: &str,
    sender: &str,
    content: &str,
) -> Result<(ChatMessage, usize), StoreError> {
    let store = store.clone();
    let (team_id, sender, content) = (team_id.to_string(), sender.to_string(), content.to_string());

    let message = tokio::task::spawn_blocking(move || {
        store.insert_chat_message(&team_id, &sender, &content)
    })
    .await
    .map_err(|e| StoreError::Join(e.to_string()))??;

    let delivered = broadcast_new_message(registry, &message);
    Ok((message, delivered))
}
