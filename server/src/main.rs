use std::net::SocketAddr;

use tokio::net::TcpListener;

use teamtask_server::config::{generate_config_template, Config};
use teamtask_server::{auth, db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("teamtask_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }

    tracing::info!("teamtask server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    // HS256 verification key shared with the account service
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let ws_config = config.ws_config();
    tracing::info!(
        ping_interval_secs = ws_config.ping_interval_secs,
        pong_timeout_secs = ws_config.pong_timeout_secs,
        "Channel keepalive configured"
    );

    let app_state = state::AppState::new(db, jwt_secret, ws_config);
    let connections = app_state.connections.clone();

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let closed = connections.shutdown();
    tracing::info!(closed, "Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
