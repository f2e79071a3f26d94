//! Training run endpoints: start, turn, feedback, finalize.
//!
//! All four accept the trainee's external id plus optional display profile
//! fields, mirroring what a chat-platform frontend knows about the user.
//! Starting a run consumes one unit of access (subscription runs are
//! unmetered); the other operations work on the already-started run.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use salescoach_core::store::{AccessStore, UserStore};
use salescoach_core::training::coordinator::FeedbackReply;
use salescoach_types::user::UserProfile;

use crate::http::error::{training_error, AppError};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Common request body for run endpoints.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Stable identifier from the chat platform.
    pub external_id: String,
    /// Display fields; refreshed on every request.
    #[serde(default)]
    pub profile: UserProfile,
}

/// Request body for the turn endpoint.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub external_id: String,
    #[serde(default)]
    pub profile: UserProfile,
    /// The trainee's message to the simulated client.
    pub text: String,
}

/// Request body for the feedback endpoint.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub external_id: String,
    #[serde(default)]
    pub profile: UserProfile,
    /// Allow upstream streaming transport (the response is still JSON).
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

fn default_streaming() -> bool {
    true
}

/// POST /api/v1/runs/start - Begin a training run.
///
/// Consumes one access unit before starting; a user with no subscription,
/// credits, or free trials left gets 403 and no run.
pub async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let user = state
        .users
        .get_or_create(&body.external_id, &body.profile)
        .await?;
    if !state.access.consume(&user.id).await? {
        return Err(AppError::NoAccess);
    }

    let started = state
        .coordinator
        .start_run(&body.external_id, &body.profile)
        .await
        .map_err(|e| training_error(&state.scenario, e))?;

    let data = serde_json::json!({
        "greeting": started.greeting,
        "case_text": started.case_text,
    });
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}

/// POST /api/v1/runs/turn - Submit one trainee turn.
pub async fn handle_turn(
    State(state): State<AppState>,
    Json(body): Json<TurnRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let reply = state
        .coordinator
        .handle_turn(&body.external_id, &body.profile, &body.text)
        .await
        .map_err(|e| training_error(&state.scenario, e))?;

    let data = serde_json::json!({
        "client_reply": reply.client_reply,
        "turn_count": reply.turn_count,
        "progress": reply.progress,
        "completed": reply.completed,
        "completion_reason": reply.completion_reason,
    });
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}

/// POST /api/v1/runs/feedback - Coaching feedback on the last turn.
///
/// A cooldown rejection is not an error: the configured cooldown message
/// is returned with `cooling_down: true`.
pub async fn request_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let reply = state
        .coordinator
        .request_feedback(&body.external_id, &body.profile, body.streaming)
        .await
        .map_err(|e| training_error(&state.scenario, e))?;

    let data = match reply {
        FeedbackReply::CoolingDown => serde_json::json!({
            "cooling_down": true,
            "text": state.scenario.messages.feedback_cooldown,
            "cached": false,
        }),
        FeedbackReply::Text { text, cached } => serde_json::json!({
            "cooling_down": false,
            "text": text,
            "cached": cached,
        }),
    };
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}

/// POST /api/v1/runs/finalize - Collect rewards for a completed run.
pub async fn finalize_run(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let summary = state
        .coordinator
        .finalize_run(&body.external_id, &body.profile)
        .await
        .map_err(|e| training_error(&state.scenario, e))?;

    let data = serde_json::json!({
        "text": summary.text,
        "progress": summary.progress,
        "turns": summary.turns,
        "xp_awarded": summary.xp_awarded,
        "new_level": summary.new_level,
        "level_up": summary.level_up,
        "new_badges": summary.new_badges,
    });
    Ok(Json(ApiResponse::success(
        data,
        request_id,
        start.elapsed().as_millis() as u64,
    )))
}
