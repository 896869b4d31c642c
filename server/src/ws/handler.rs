use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// The channel identity from the handshake query: the first `userId` value,
/// if it is not blank. Later repeats are ignored.
/// The user id is trusted as-is; the channel carries no further authentication.
pub fn channel_user_id(params: &[(String, String)]) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key == "userId")
        .map(|(_, value)| value)
        .filter(|value| !value.trim().is_empty())
        .cloned()
}

/// GET /ws?userId=<id>
/// WebSocket upgrade endpoint. With a user id, spawns the connection actor.
/// Without one the upgrade still succeeds but the channel stays inert.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    ws: WebSocketUpgrade,
) -> Response {
    match channel_user_id(&params) {
        Some(user_id) => {
            tracing::info!(user_id = %user_id, "WebSocket connection accepted");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        None => {
            tracing::warn!("WebSocket connection without userId, leaving inert");
            ws.on_upgrade(actor::run_inert)
        }
    }
}
