pub mod health;
pub mod history;
pub mod rules;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vaultize_engine::Engine;
use vaultize_state::StateStore;

use crate::error::ApiError;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The running engine.
    pub engine: Engine,
    /// History reads for the management API.
    pub history: Arc<StateStore>,
    /// Bearer token guarding the mutating endpoints. When unset, those
    /// endpoints are refused outright.
    pub admin_token: Option<String>,
}

/// Build the management API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/alerts/rules", get(rules::list))
        .route("/api/v1/alerts/rules/reload", post(rules::reload))
        .route("/api/v1/alerts/rules/{name}/status", get(rules::status))
        .route("/api/v1/alerts/rules/{name}/trigger", post(rules::trigger))
        .route("/api/v1/alerts/history", get(history::query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The happy-path envelope: `{status: "success", data: ...}`.
pub(crate) fn success(data: impl Serialize) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "success",
        "data": data,
    }))
}

/// Check the bearer token on an admin endpoint.
pub(crate) fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::Forbidden(
            "admin endpoints are disabled: no admin token configured".to_owned(),
        ));
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        None => Err(ApiError::Unauthorized(
            "missing bearer token".to_owned(),
        )),
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ApiError::Forbidden("invalid admin token".to_owned())),
    }
}
