//! Access check and grant endpoints.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;

use salescoach_core::store::{AccessStore, UserStore};
use salescoach_types::access::{GrantKind, GrantSource};
use salescoach_types::user::UserProfile;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/users/{external_id}/access - Current access level.
///
/// Unknown users get `{"kind": "none"}` rather than 404; the frontend asks
/// before the user has ever started a run.
pub async fn check_access(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let check = match state.users.get_by_external_id(&external_id).await? {
        Some(user) => state.access.check(&user.id).await?,
        None => salescoach_types::access::AccessCheck::None,
    };

    let data = serde_json::to_value(&check)
        .map_err(|e| AppError::Internal(format!("failed to serialize access check: {e}")))?;
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}

/// Request body for granting access.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub kind: GrantKind,
    /// Counter for credits / free_trial grants.
    pub amount: Option<i64>,
    /// Subscription length in days.
    pub days: Option<i64>,
}

/// POST /api/v1/users/{external_id}/access/grants - Grant access directly.
pub async fn grant_access(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Json(body): Json<GrantRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let user = state
        .users
        .get_or_create(&external_id, &UserProfile::default())
        .await?;

    let grant = match body.kind {
        GrantKind::Subscription => {
            let days = body
                .days
                .filter(|d| *d > 0)
                .ok_or_else(|| AppError::Validation("'days' must be positive".to_string()))?;
            state
                .access
                .grant_subscription(&user.id, GrantSource::Admin, Utc::now() + Duration::days(days))
                .await?
        }
        GrantKind::Credits => {
            let amount = body
                .amount
                .filter(|a| *a > 0)
                .ok_or_else(|| AppError::Validation("'amount' must be positive".to_string()))?;
            state
                .access
                .grant_credits(&user.id, GrantSource::Admin, amount)
                .await?
        }
        GrantKind::FreeTrial => {
            let amount = body
                .amount
                .filter(|a| *a > 0)
                .ok_or_else(|| AppError::Validation("'amount' must be positive".to_string()))?;
            state
                .access
                .grant_free_trials(&user.id, GrantSource::Admin, amount)
                .await?
        }
    };

    let data = serde_json::json!({
        "grant_id": grant.id.to_string(),
        "kind": grant.kind.to_string(),
        "expires_at": grant.expires_at.map(|e| e.to_rfc3339()),
        "credits_left": grant.credits_left,
    });
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}

/// GET /api/v1/users/{external_id}/access/grants - Grant audit trail.
pub async fn list_grants(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let Some(user) = state.users.get_by_external_id(&external_id).await? else {
        return Err(AppError::NotFound(format!(
            "No user found for '{external_id}'"
        )));
    };

    let grants: Vec<serde_json::Value> = state
        .access
        .list(&user.id)
        .await?
        .iter()
        .map(|g| {
            serde_json::json!({
                "id": g.id.to_string(),
                "kind": g.kind.to_string(),
                "source": g.source.to_string(),
                "starts_at": g.starts_at.to_rfc3339(),
                "expires_at": g.expires_at.map(|e| e.to_rfc3339()),
                "credits_total": g.credits_total,
                "credits_left": g.credits_left,
                "revoked": g.revoked,
            })
        })
        .collect();

    Ok(Json(ApiResponse::success(
        serde_json::json!({ "grants": grants }),
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}
