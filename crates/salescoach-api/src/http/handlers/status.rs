//! Provider status endpoint.

use std::time::Instant;

use axum::extract::State;
use axum::Json;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/providers/status - Per-candidate attempt statistics.
///
/// Returns, for every task kind, the configured candidates in order with
/// call counts, failure counts, last error, and last latency.
pub async fn provider_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let tasks: Vec<serde_json::Value> = state
        .router
        .status()
        .into_iter()
        .map(|(task, candidates)| {
            serde_json::json!({
                "task": task.to_string(),
                "candidates": candidates,
            })
        })
        .collect();

    Ok(Json(ApiResponse::success(
        serde_json::json!({ "tasks": tasks }),
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}
