//! REST endpoints for team chat history and posting.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::store::ChatMessage;
use crate::state::AppState;
use crate::ws::protocol::MAX_CONTENT_LENGTH;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

/// GET /api/chat/{team_id}?before=&limit=
/// Page of a team's history, ascending by id.
pub async fn get_history(
    State(state): State<AppState>,
    _claims: Claims,
    Path(team_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let store = state.chat_store.clone();

    let messages = tokio::task::spawn_blocking(move || {
        store.list_team_messages(&team_id, params.before, limit)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| {
        tracing::error!(error = %e, "failed to load chat history");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(messages))
}

/// POST /api/chat/{team_id}
/// Persist a message from the caller and broadcast it to every open channel.
pub async fn create_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(team_id): Path<String>,
    Json(body): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), StatusCode> {
    let content = body.content.as_str();
    if content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let (message, delivered) = broadcast::persist_and_broadcast(
        &state.chat_store,
        &state.connections,
        &team_id,
        &claims.sub,
        content,
    )
    .await
    .map_err(|e| {
        tracing::error!(team_id = %team_id, error = %e, "failed to persist chat message");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::debug!(message_id = message.id, delivered, "chat message posted over REST");
    Ok((StatusCode::CREATED, Json(message)))
}
