use axum::extract::State;
use axum::response::IntoResponse;

use super::{AppState, success};
use crate::error::ApiError;

/// `GET /health` — `ready` iff the scheduler is running and the store has
/// answered at least once since startup; 503 otherwise.
pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if !state.engine.is_ready() {
        return Err(ApiError::NotReady);
    }
    let snapshot = state.engine.metrics().snapshot();
    Ok(success(serde_json::json!({
        "status": "ready",
        "metrics": snapshot,
    })))
}
