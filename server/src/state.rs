use std::sync::Arc;

use crate::chat::store::{ChatStore, SqliteChatStore};
use crate::config::WsConfig;
use crate::db::DbPool;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Persistence gateway for chat messages
    pub chat_store: Arc<dyn ChatStore>,
    /// Live channel per user
    pub connections: ConnectionRegistry,
    /// JWT verification secret (256-bit key)
    pub jwt_secret: Vec<u8>,
    /// Channel keepalive settings
    pub ws_config: WsConfig,
}

impl AppState {
    /// State backed by the SQLite chat store and a fresh connection registry.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, ws_config: WsConfig) -> Self {
        Self {
            chat_store: Arc::new(SqliteChatStore::new(db.clone())),
            db,
            connections: ConnectionRegistry::new(),
            jwt_secret,
            ws_config,
        }
    }
}
