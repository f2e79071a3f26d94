//! Cross-bot user profile endpoint.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/users/{external_id}/profile - XP, level, and badges.
///
/// Badges are cross-bot: every badge the user earned in any training bot
/// appears here, newest first.
pub async fn get_profile(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let Some((user, badges)) = state.coordinator.profile(&external_id).await? else {
        return Err(AppError::NotFound(format!(
            "No user found for '{external_id}'"
        )));
    };

    let badge_list: Vec<serde_json::Value> = badges
        .iter()
        .map(|b| {
            serde_json::json!({
                "badge_type": b.badge_type,
                "earned_in_bot": b.earned_in_bot,
                "earned_at": b.earned_at.to_rfc3339(),
            })
        })
        .collect();

    let data = serde_json::json!({
        "external_id": user.external_id,
        "display_name": user.display_name(),
        "total_xp": user.total_xp,
        "level": user.level,
        "registered_at": user.registered_at.to_rfc3339(),
        "badges": badge_list,
    });
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}
