//! Promo code endpoints: create (admin) and redeem.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use salescoach_core::store::{PromoStore, UserStore};
use salescoach_types::promo::{PromoCode, PromoKind};
use salescoach_types::user::UserProfile;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for creating a promo code.
#[derive(Debug, Deserialize)]
pub struct CreatePromoRequest {
    pub code: String,
    pub kind: PromoKind,
    pub value: i64,
    pub max_uses: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// POST /api/v1/promo/codes - Create a promo code.
pub async fn create_promo(
    State(state): State<AppState>,
    Json(body): Json<CreatePromoRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    if body.code.trim().is_empty() {
        return Err(AppError::Validation("'code' must not be empty".to_string()));
    }
    if body.value <= 0 {
        return Err(AppError::Validation("'value' must be positive".to_string()));
    }

    let promo = PromoCode::new(
        body.code.trim().to_string(),
        body.kind,
        body.value,
        body.max_uses,
        body.expires_at,
    );
    state.promo.create(&promo).await?;

    let data = serde_json::json!({
        "id": promo.id.to_string(),
        "code": promo.code,
        "kind": promo.kind.to_string(),
        "value": promo.value,
        "max_uses": promo.max_uses,
        "expires_at": promo.expires_at.map(|e| e.to_rfc3339()),
    });
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}

/// Request body for redeeming a promo code.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub external_id: String,
    #[serde(default)]
    pub profile: UserProfile,
    pub code: String,
}

/// POST /api/v1/promo/redeem - Redeem a code for the calling user.
///
/// Redemption is atomic in the store: the usage counter, the per-user
/// usage record, and the resulting access grant commit together.
pub async fn redeem_promo(
    State(state): State<AppState>,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let user = state
        .users
        .get_or_create(&body.external_id, &body.profile)
        .await?;
    let redemption = state.promo.redeem(&user.id, body.code.trim()).await?;

    let data = serde_json::json!({
        "code": redemption.code,
        "kind": redemption.kind.to_string(),
        "value": redemption.value,
    });
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}
