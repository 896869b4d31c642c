//! Client side of the realtime channel.

pub mod session;

pub use session::{ChannelSession, ReconnectPolicy, SessionConfig, SessionError};
