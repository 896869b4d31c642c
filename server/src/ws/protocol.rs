//! Channel wire protocol: `{"event": <tag>, "data": <object>}` text frames.
//!
//! Inbound frames are parsed into [`InboundEvent`]; outbound payloads are the
//! [`OutboundEvent`] sum type. Unknown inbound tags parse to
//! [`InboundEvent::Unknown`] and are ignored by the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::broadcast::persist_and_broadcast;
use crate::chat::store::ChatMessage;
use crate::state::AppState;
use crate::ws::broadcast::send_event_to_user;

pub const EVENT_SEND_MESSAGE: &str = "send_message";
pub const EVENT_NOTIFY_USER: &str = "notify_user";

/// Maximum chat message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// The envelope wrapping every frame in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Payload of a `task_assigned` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssigned {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub title: String,
    pub message: String,
}

/// Payload of a generic `notification` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    NewMessage(ChatMessage),
    TaskAssigned(TaskAssigned),
    Notification(Notification),
}

/// Client-to-server events after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    SendMessage {
        team_id: String,
        content: String,
    },
    NotifyUser {
        recipient_id: String,
        title: String,
        message: String,
    },
    /// Any tag this server does not understand.
    Unknown(String),
}

/// Why an inbound frame was dropped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{event}: missing or empty field `{field}`")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
    #[error("{event}: field `{field}` exceeds {max} characters")]
    TooLong {
        event: &'static str,
        field: &'static str,
        max: usize,
    },
}

/// Parse and validate one inbound text frame.
pub fn parse_inbound(text: &str) -> Result<InboundEvent, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;

    match envelope.event.as_str() {
        EVENT_SEND_MESSAGE => {
            let team_id = id_field(&envelope.data, EVENT_SEND_MESSAGE, "teamId")?;
            let content = text_field(&envelope.data, EVENT_SEND_MESSAGE, "content")?;
            if content.chars().count() > MAX_CONTENT_LENGTH {
                return Err(ProtocolError::TooLong {
                    event: EVENT_SEND_MESSAGE,
                    field: "content",
                    max: MAX_CONTENT_LENGTH,
                });
            }
            Ok(InboundEvent::SendMessage { team_id, content })
        }
        EVENT_NOTIFY_USER => Ok(InboundEvent::NotifyUser {
            recipient_id: id_field(&envelope.data, EVENT_NOTIFY_USER, "recipientId")?,
            title: text_field(&envelope.data, EVENT_NOTIFY_USER, "title")?,
            message: text_field(&envelope.data, EVENT_NOTIFY_USER, "message")?,
        }),
        _ => Ok(InboundEvent::Unknown(envelope.event)),
    }
}

/// Identifier fields arrive as strings or numbers depending on the client.
fn id_field(data: &Value, event: &'static str, field: &'static str) -> Result<String, ProtocolError> {
    match data.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ProtocolError::MissingField { event, field }),
    }
}

/// Text fields must not be blank but are kept exactly as sent.
fn text_field(data: &Value, event: &'static str, field: &'static str) -> Result<String, ProtocolError> {
    match data.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(ProtocolError::MissingField { event, field }),
    }
}

/// Handle one inbound text frame from `user_id`.
/// Every failure is logged and contained to this frame.
pub async fn handle_text_message(text: &str, state: &AppState, user_id: &str) {
    match parse_inbound(text) {
        Ok(event) => dispatch_event(event, state, user_id).await,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Dropping inbound frame"
            );
        }
    }
}

/// Dispatch a validated inbound event to the matching action.
pub async fn dispatch_event(event: InboundEvent, state: &AppState, user_id: &str) {
    match event {
        InboundEvent::SendMessage { team_id, content } => {
            match persist_and_broadcast(
                &state.chat_store,
                &state.connections,
                &team_id,
                user_id,
                &content,
            )
            .await
            {
                Ok((message, delivered)) => {
                    tracing::debug!(
                        user_id = %user_id,
                        team_id = %team_id,
                        message_id = message.id,
                        delivered = delivered,
                        "Chat message persisted and broadcast"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        team_id = %team_id,
                        error = %e,
                        "Failed to persist chat message, not broadcasting"
                    );
                }
            }
        }
        InboundEvent::NotifyUser {
            recipient_id,
            title,
            message,
        } => {
            let delivered = send_event_to_user(
                &state.connections,
                &recipient_id,
                &OutboundEvent::Notification(Notification { title, message }),
            );
            tracing::debug!(
                user_id = %user_id,
                recipient_id = %recipient_id,
                delivered = delivered,
                "Notification relayed"
            );
        }
        InboundEvent::Unknown(tag) => {
            tracing::debug!(
                user_id = %user_id,
                event = %tag,
                "Ignoring unrecognized event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::{ChatStore, StoreError};
    use axum::extract::ws::Message;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// In-memory store recording every insert.
    #[derive(Default)]
    struct RecordingStore {
        rows: Mutex<Vec<ChatMessage>>,
    }

    impl ChatStore for RecordingStore {
        fn insert_chat_message(
            &self,
            team_id: &str,
            sender: &str,
            content: &str,
        ) -> Result<ChatMessage, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let message = ChatMessage {
                id: rows.len() as i64 + 1,
                team_id: team_id.to_string(),
                sender: sender.to_string(),
                content: content.to_string(),
                created_at: "2024-01-01T00:00:00+00:00".to_string(),
            };
            rows.push(message.clone());
            Ok(message)
        }

        fn list_team_messages(
            &self,
            team_id: &str,
            _before: Option<i64>,
            _limit: u32,
        ) -> Result<Vec<ChatMessage>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().filter(|m| m.team_id == team_id).cloned().collect())
        }
    }

    struct FailingStore;

    impl ChatStore for FailingStore {
        fn insert_chat_message(&self, _: &str, _: &str, _: &str) -> Result<ChatMessage, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        fn list_team_messages(&self, _: &str, _: Option<i64>, _: u32) -> Result<Vec<ChatMessage>, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
    }

    fn state_with(store: Arc<dyn ChatStore>) -> AppState {
        let mut state = AppState::new(
            crate::db::init_in_memory().unwrap(),
            vec![0u8; 32],
            crate::config::WsConfig::default(),
        );
        state.chat_store = store;
        state
    }

    fn listen(state: &AppState, user_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.connections.register(user_id, tx);
        rx
    }

    fn next_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Value> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => Some(serde_json::from_str(text.as_str()).unwrap()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_send_message() {
        let event = parse_inbound(r#"{"event":"send_message","data":{"teamId":"9","content":"hi"}}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::SendMessage {
                team_id: "9".into(),
                content: "hi".into()
            }
        );
    }

    #[test]
    fn test_parse_keeps_content_whitespace() {
        let event = parse_inbound(
            r#"{"event":"send_message","data":{"teamId":" 9 ","content":"  indented\n"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::SendMessage {
                team_id: "9".into(),
                content: "  indented\n".into()
            }
        );
    }

    #[test]
    fn test_parse_accepts_numeric_ids() {
        let event = parse_inbound(r#"{"event":"send_message","data":{"teamId":9,"content":"hi"}}"#).unwrap();
        assert!(matches!(event, InboundEvent::SendMessage { ref team_id, .. } if team_id == "9"));

        let event = parse_inbound(
            r#"{"event":"notify_user","data":{"recipientId":2,"title":"T","message":"M"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::NotifyUser {
                recipient_id: "2".into(),
                title: "T".into(),
                message: "M".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_missing_or_empty_fields() {
        let cases = [
            r#"{"event":"send_message","data":{"teamId":"9"}}"#,
            r#"{"event":"send_message","data":{"teamId":"9","content":""}}"#,
            r#"{"event":"send_message","data":{"teamId":"9","content":"   "}}"#,
            r#"{"event":"send_message","data":{"content":"hi"}}"#,
            r#"{"event":"send_message"}"#,
            r#"{"event":"notify_user","data":{"recipientId":"2","title":"T"}}"#,
            r#"{"event":"notify_user","data":{"title":"T","message":"M"}}"#,
        ];
        for case in cases {
            assert!(
                matches!(parse_inbound(case), Err(ProtocolError::MissingField { .. })),
                "expected missing field for {case}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(matches!(parse_inbound("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(parse_inbound(r#"{"data":{}}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(parse_inbound(r#"{"event":5}"#), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_oversized_content() {
        let content = "x".repeat(MAX_CONTENT_LENGTH + 1);
        let frame = json!({"event": "send_message", "data": {"teamId": "9", "content": content}});
        assert!(matches!(
            parse_inbound(&frame.to_string()),
            Err(ProtocolError::TooLong { .. })
        ));
    }

    #[test]
    fn test_parse_unknown_event_is_forward_compatible() {
        let event = parse_inbound(r#"{"event":"typing","data":{"teamId":"9"}}"#).unwrap();
        assert_eq!(event, InboundEvent::Unknown("typing".into()));
    }

    #[test]
    fn test_outbound_event_wire_shape() {
        let event = OutboundEvent::TaskAssigned(TaskAssigned {
            task_id: "7".into(),
            title: "X".into(),
            message: "assigned".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "task_assigned", "data": {"taskId": "7", "title": "X", "message": "assigned"}})
        );

        let event = OutboundEvent::Notification(Notification {
            title: "T".into(),
            message: "M".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "notification", "data": {"title": "T", "message": "M"}})
        );
    }

    #[tokio::test]
    async fn test_send_message_persists_then_broadcasts_to_all() {
        let store = Arc::new(RecordingStore::default());
        let state = state_with(store.clone());
        let mut rx1 = listen(&state, "1");
        let mut rx2 = listen(&state, "2");

        handle_text_message(
            r#"{"event":"send_message","data":{"teamId":"9","content":"hi"}}"#,
            &state,
            "1",
        )
        .await;

        let rows = store.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender, "1");

        let expected = json!({
            "event": "new_message",
            "data": {
                "id": rows[0].id,
                "content": "hi",
                "sender": "1",
                "teamId": "9",
                "created_at": rows[0].created_at,
            }
        });
        assert_eq!(next_json(&mut rx1), Some(expected.clone()));
        assert_eq!(next_json(&mut rx2), Some(expected));
    }

    #[tokio::test]
    async fn test_send_message_without_content_is_dropped() {
        let store = Arc::new(RecordingStore::default());
        let state = state_with(store.clone());
        let mut rx = listen(&state, "1");

        handle_text_message(r#"{"event":"send_message","data":{"teamId":"9"}}"#, &state, "1").await;
        handle_text_message(
            r#"{"event":"send_message","data":{"teamId":"9","content":""}}"#,
            &state,
            "1",
        )
        .await;

        assert!(store.rows.lock().unwrap().is_empty());
        assert!(next_json(&mut rx).is_none());
    }

    #[tokio::test]
    async fn test_persistence_failure_suppresses_broadcast() {
        let state = state_with(Arc::new(FailingStore));
        let mut rx = listen(&state, "1");

        handle_text_message(
            r#"{"event":"send_message","data":{"teamId":"9","content":"hi"}}"#,
            &state,
            "1",
        )
        .await;

        assert!(next_json(&mut rx).is_none());
    }

    #[tokio::test]
    async fn test_notify_user_targets_only_recipient() {
        let state = state_with(Arc::new(RecordingStore::default()));
        let mut rx1 = listen(&state, "1");
        let mut rx2 = listen(&state, "2");

        handle_text_message(
            r#"{"event":"notify_user","data":{"recipientId":"2","title":"Hey","message":"Look"}}"#,
            &state,
            "1",
        )
        .await;

        assert!(next_json(&mut rx1).is_none());
        assert_eq!(
            next_json(&mut rx2),
            Some(json!({"event": "notification", "data": {"title": "Hey", "message": "Look"}}))
        );
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_are_ignored() {
        let store = Arc::new(RecordingStore::default());
        let state = state_with(store.clone());
        let mut rx = listen(&state, "1");

        handle_text_message("{not json", &state, "1").await;
        handle_text_message(r#"{"event":"typing","data":{}}"#, &state, "1").await;

        assert!(store.rows.lock().unwrap().is_empty());
        assert!(next_json(&mut rx).is_none());
    }
}
