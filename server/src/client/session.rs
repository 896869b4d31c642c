//! Channel session: one shared WebSocket per user over `tokio-tungstenite`.
//!
//! Every inbound envelope is fanned out to every subscriber; there is no
//! topic filtering, so listeners match on `event` and any embedded `teamId`
//! themselves. Sends are at-most-once: nothing is queued while disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::ws::protocol::{Envelope, EVENT_NOTIFY_USER, EVENT_SEND_MESSAGE};
use crate::ws::registry::CLOSE_REPLACED;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the subscriber fan-out. Slow subscribers lag and skip.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("session is closed")]
    Closed,
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What to do when the channel drops without the client asking for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Stay closed until a new session is created.
    #[default]
    Never,
    /// Exponential backoff, doubling from `initial` and capped at `max`.
    /// `max_attempts == 0` retries forever.
    Backoff {
        initial: Duration,
        max: Duration,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based), or `None`
    /// when no further attempt should be made.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if *max_attempts != 0 && attempt >= *max_attempts {
                    return None;
                }
                let factor = 2u32.saturating_pow(attempt);
                Some(initial.saturating_mul(factor).min(*max))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base server URL (`ws://host:port`) or the full channel URL.
    pub server_url: String,
    pub user_id: String,
    pub reconnect: ReconnectPolicy,
}

/// Build the channel URL: default the path to `/ws` and set `userId`.
pub fn channel_url(server_url: &str, user_id: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse(server_url)?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/ws");
    }
    url.query_pairs_mut().append_pair("userId", user_id);
    Ok(url)
}

enum Command {
    Send(String),
    Close,
}

/// How one connected stretch of the session ended.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    /// `close()` was called or every handle was dropped.
    ClientClosed,
    /// The server closed this channel because a newer one replaced it.
    Replaced,
    Disconnected,
}

struct Inner {
    user_id: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<Envelope>,
    open: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// Shared handle to the user's channel. Cloning is cheap; all clones drive
/// the same socket.
#[derive(Clone)]
pub struct ChannelSession {
    inner: Arc<Inner>,
}

impl ChannelSession {
    /// Open the channel. The user id is captured here and never re-read.
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        let url = channel_url(&config.server_url, &config.user_id)?;
        let (ws, _) = connect_async(url.as_str()).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let open = Arc::new(AtomicBool::new(true));

        let driver = tokio::spawn(drive(
            ws,
            url,
            config.reconnect,
            cmd_rx,
            events.clone(),
            open.clone(),
        ));

        tracing::debug!(user_id = %config.user_id, "Channel session opened");

        Ok(Self {
            inner: Arc::new(Inner {
                user_id: config.user_id,
                cmd_tx,
                events,
                open,
                driver,
            }),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Attach a listener. It sees every envelope received after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.events.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// The session has stopped for good: closed, replaced, or out of
    /// reconnect attempts. A terminated session never reopens.
    pub fn is_terminated(&self) -> bool {
        self.inner.driver.is_finished()
    }

    /// Send a raw envelope. Fails with [`SessionError::Closed`] while the
    /// channel is down; nothing is buffered for later.
    pub fn send(&self, envelope: &Envelope) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        let text = serde_json::to_string(envelope)?;
        self.inner
            .cmd_tx
            .send(Command::Send(text))
            .map_err(|_| SessionError::Closed)
    }

    pub fn send_message(&self, team_id: &str, content: &str) -> Result<(), SessionError> {
        self.send(&Envelope::new(
            EVENT_SEND_MESSAGE,
            json!({ "teamId": team_id, "content": content }),
        ))
    }

    pub fn notify_user(&self, recipient_id: &str, title: &str, message: &str) -> Result<(), SessionError> {
        self.send(&Envelope::new(
            EVENT_NOTIFY_USER,
            json!({ "recipientId": recipient_id, "title": title, "message": message }),
        ))
    }

    /// Close the channel for every clone of this handle. No reconnect follows.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
        let _ = self.inner.cmd_tx.send(Command::Close);
    }
}

async fn drive(
    mut ws: WsStream,
    url: Url,
    policy: ReconnectPolicy,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<Envelope>,
    open: Arc<AtomicBool>,
) {
    loop {
        let exit = pump(ws, &mut cmd_rx, &events).await;
        open.store(false, Ordering::Release);

        match exit {
            Exit::ClientClosed => return,
            Exit::Replaced => {
                tracing::info!("Channel replaced by a newer session, not reconnecting");
                return;
            }
            Exit::Disconnected => {}
        }

        match reconnect(&url, &policy, &mut cmd_rx).await {
            Some(stream) => {
                ws = stream;
                open.store(true, Ordering::Release);
                tracing::info!("Channel reconnected");
            }
            None => return,
        }
    }
}

/// Move frames in both directions until the connection ends.
async fn pump(
    ws: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events: &broadcast::Sender<Envelope>,
) -> Exit {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "Channel send failed");
                        return Exit::Disconnected;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Exit::ClientClosed;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Envelope>(text.as_str()) {
                        // No subscribers is fine.
                        Ok(envelope) => { let _ = events.send(envelope); }
                        Err(e) => tracing::debug!(error = %e, "Ignoring malformed envelope"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let replaced = frame
                        .as_ref()
                        .is_some_and(|f| u16::from(f.code) == CLOSE_REPLACED);
                    return if replaced { Exit::Replaced } else { Exit::Disconnected };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Channel read failed");
                    return Exit::Disconnected;
                }
                None => return Exit::Disconnected,
            },
        }
    }
}

/// Retry per `policy`. Sends issued while down are dropped; `close()` aborts.
async fn reconnect(
    url: &Url,
    policy: &ReconnectPolicy,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<WsStream> {
    let mut attempt = 0;
    loop {
        let delay = policy.delay_for(attempt)?;
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(_)) => tracing::debug!("Dropping send while disconnected"),
                    Some(Command::Close) | None => return None,
                },
            }
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => return Some(ws),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnect failed");
                attempt += 1;
            }
        }
    }
}
