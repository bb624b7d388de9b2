//! Axum app: state, router, and the Bearer-auth layer.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use steward::{Engine, ErrorBody, ErrorCode};

use crate::chat::chat_completions;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(state: AppState) -> Router {
    let chat = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(health))
        .route("/stats", get(stats))
        .merge(chat)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.health().await)
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.stats())
}

/// Validates `Authorization: Bearer <token>` when a token is configured.
async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.engine.settings().auth_token.clone() else {
        return next.run(req).await;
    };
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        next.run(req).await
    } else {
        let body = ErrorBody::new(ErrorCode::AuthError, "auth", "invalid or missing bearer token");
        (axum::http::StatusCode::UNAUTHORIZED, Json(body.to_response())).into_response()
    }
}
