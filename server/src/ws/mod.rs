pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

pub use registry::{ConnectionHandle, ConnectionRegistry};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system push frames to a specific client through it;
/// the connection's writer task owns the receiving half.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
