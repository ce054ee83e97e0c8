use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use vaultize_state::HistoryQuery;

use super::{AppState, success};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub rule: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// `GET /api/v1/alerts/history?rule=&since=&limit=` — newest-first alert
/// events from the history index.
pub async fn query(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = HistoryQuery {
        rule: params.rule,
        since: params.since,
        limit: params.limit,
    };
    let events = state
        .history
        .history(&query, &CancellationToken::new())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(success(events))
}
