use axum::routing::{get, patch, post, put};
use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::messages as chat_messages;
use crate::state::AppState;
use crate::tasks::crud as task_crud;
use crate::teams::crud as team_crud;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Channel upgrade: identity comes from the userId query parameter, no JWT
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let team_routes = Router::new()
        .route(
            "/api/teams",
            post(team_crud::create_team).get(team_crud::list_teams),
        )
        .route(
            "/api/teams/{team_id}/members",
            get(team_crud::list_members).post(team_crud::add_member),
        );

    let task_routes = Router::new()
        .route(
            "/api/teams/{team_id}/tasks",
            post(task_crud::create_task).get(task_crud::list_tasks),
        )
        .route(
            "/api/teams/{team_id}/tasks/assigned",
            get(task_crud::list_assigned_tasks),
        )
        .route(
            "/api/teams/{team_id}/tasks/{task_id}",
            put(task_crud::update_task).delete(task_crud::delete_task),
        )
        .route("/api/tasks/{task_id}/status", patch(task_crud::update_status));

    let chat_routes = Router::new().route(
        "/api/chat/{team_id}",
        get(chat_messages::get_history).post(chat_messages::create_message),
    );

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(team_routes)
        .merge(task_routes)
        .merge(chat_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
