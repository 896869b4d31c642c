use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::config::WsConfig;
use crate::state::AppState;
use crate::ws::protocol;

/// Lifecycle of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Run the actor-per-connection pattern for a WebSocket carrying a user id.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel
/// - Reader loop: processes inbound frames, dispatches to protocol handlers
///
/// The mpsc sender is what the registry hands out, so any part of the system
/// can push frames to this client. The connection leaves `Open` when the
/// client closes, the transport errors, or the writer stops (displaced by a
/// newer connection, server shutdown, broken sink).
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let mut conn_state = ConnectionState::Connecting;
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let handle = state.connections.register(&user_id, tx.clone());
    conn_state = transition(&user_id, handle.id(), conn_state, ConnectionState::Open);

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = spawn_ping_task(&state.ws_config, tx.clone(), pong_rx);

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    protocol::handle_text_message(text.as_str(), &state, &user_id).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(
                        user_id = %user_id,
                        bytes = data.len(),
                        "Ignoring binary frame (protocol is JSON text)"
                    );
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    tracing::info!(user_id = %user_id, "WebSocket stream ended");
                    break;
                }
            },
            _ = &mut writer_handle => {
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = handle.id(),
                    "Writer stopped"
                );
                break;
            }
        }
    }

    writer_handle.abort();
    if let Some(ping_handle) = ping_handle {
        ping_handle.abort();
    }

    state
        .connections
        .unregister_connection(&user_id, handle.id());
    transition(&user_id, handle.id(), conn_state, ConnectionState::Closed);
}

/// Accept a connection that carries no user id and do nothing with it.
///
/// The channel is never registered and its frames are never dispatched; it
/// stays open until the client goes away.
pub async fn run_inert(mut socket: WebSocket) {
    tracing::debug!("Inert connection started");
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    tracing::debug!("Inert connection ended");
}

fn transition(
    user_id: &str,
    connection_id: u64,
    from: ConnectionState,
    to: ConnectionState,
) -> ConnectionState {
    tracing::info!(
        user_id = %user_id,
        connection_id = connection_id,
        from = ?from,
        to = ?to,
        "Channel state changed"
    );
    to
}

/// Writer task: receives frames from the mpsc channel and forwards them to the
/// WebSocket sink. Stops after forwarding a Close frame.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Spawn the transport keepalive: ping every interval, close if no pong
/// arrives within the timeout. Disabled when the interval is zero.
fn spawn_ping_task(
    config: &WsConfig,
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
) -> Option<JoinHandle<()>> {
    if config.ping_interval_secs == 0 {
        return None;
    }
    let ping_interval = config.ping_interval();
    let pong_timeout = config.pong_timeout();

    Some(tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    }))
}
