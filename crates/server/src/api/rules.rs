use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use vaultize_engine::EngineError;

use super::{AppState, require_admin, success};
use crate::error::ApiError;

/// `GET /api/v1/alerts/rules` — name, enabled, interval, and current
/// state for every loaded rule.
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(success(state.engine.rule_summaries().await))
}

/// `GET /api/v1/alerts/rules/{name}/status` — full definition plus
/// runtime state.
pub async fn status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (rule, rule_state) = state
        .engine
        .rule_status(&name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("unknown rule '{name}'")))?;
    Ok(success(serde_json::json!({
        "rule": &*rule,
        "state": rule_state,
    })))
}

/// `POST /api/v1/alerts/rules/{name}/trigger` — run one evaluation
/// synchronously with full state-machine semantics. Admin only.
pub async fn trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    match state.engine.trigger(&name).await {
        Ok(outcome) => Ok(success(outcome)),
        Err(EngineError::UnknownRule(name)) => {
            Err(ApiError::NotFound(format!("unknown rule '{name}'")))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// `POST /api/v1/alerts/rules/reload` — re-read the rules directory and
/// swap to the new snapshot. Admin only.
pub async fn reload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    let summary = state
        .engine
        .reload()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(success(summary))
}
