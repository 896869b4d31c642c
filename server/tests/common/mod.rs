//! Shared helpers for integration tests: a real server on a random port.

#![allow(dead_code)]

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use teamtask_server::config::WsConfig;
use teamtask_server::state::AppState;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub state: AppState,
    serve_handle: tokio::task::JoinHandle<()>,
    _tmp_dir: tempfile::TempDir,
}

/// Start the server on 127.0.0.1:0 with a fresh data directory.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = teamtask_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = teamtask_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let state = AppState::new(db, jwt_secret, WsConfig::default());

    let app = teamtask_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serve_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        ws_url: format!("ws://{}", addr),
        state,
        serve_handle,
        _tmp_dir: tmp_dir,
    }
}

impl TestServer {
    /// Bearer token for `user_id`, as the account service would mint it.
    pub fn token(&self, user_id: &str) -> String {
        teamtask_server::auth::jwt::issue_access_token(&self.state.jwt_secret, user_id)
            .expect("Failed to issue token")
    }

    /// Stop the accept loop and drop the listener. Connections already
    /// upgraded keep running on their own tasks.
    pub async fn stop_accepting(&self) {
        self.serve_handle.abort();
        for _ in 0..200 {
            if self.serve_handle.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("accept loop did not stop within 2s");
    }

    /// Open a channel for `user_id` and wait until the server has registered it.
    pub async fn connect(&self, user_id: &str) -> WsStream {
        let url = format!("{}/ws?userId={}", self.ws_url, user_id);
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .expect("WS connect failed");
        self.wait_until(|s| s.connections.lookup(user_id).is_some()).await;
        ws
    }

    /// Poll `check` against the server state for up to two seconds.
    pub async fn wait_until<F>(&self, check: F)
    where
        F: Fn(&AppState) -> bool,
    {
        for _ in 0..200 {
            if check(&self.state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }
}

/// Next text frame parsed as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Stream ended")
            .expect("WS error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Assert that no text frame arrives within 300ms.
pub async fn assert_silent(ws: &mut WsStream) {
    match tokio::time::timeout(Duration::from_millis(300), ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected message: {}", text.as_str()),
        Ok(other) => panic!("unexpected frame: {:?}", other),
    }
}
