//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use salescoach_types::error::{PromoError, RepositoryError, TrainingError};
use salescoach_types::scenario::{render_template, ScenarioConfig};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Training flow errors.
    Training(TrainingError),
    /// Promo code errors.
    Promo(PromoError),
    /// Raw repository errors (from handlers talking to stores directly).
    Repository(RepositoryError),
    /// The user has no runs, credits, or subscription left.
    NoAccess,
    /// Validation error with a user-facing message.
    Validation(String),
    /// Temporary outage with a user-facing message.
    Unavailable(String),
    /// Resource not found.
    NotFound(String),
    /// Generic internal error.
    Internal(String),
}

impl From<TrainingError> for AppError {
    fn from(e: TrainingError) -> Self {
        AppError::Training(e)
    }
}

impl From<PromoError> for AppError {
    fn from(e: PromoError) -> Self {
        AppError::Promo(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

/// Map a [`TrainingError`] using the scenario's message templates where one
/// exists, so validation failures carry the configured user-facing text.
pub fn training_error(scenario: &ScenarioConfig, err: TrainingError) -> AppError {
    match err {
        TrainingError::TurnTooShort { min } => AppError::Validation(render_template(
            &scenario.messages.turn_too_short,
            &[("min", min.to_string().as_str())],
        )),
        TrainingError::ProvidersExhausted { .. } => {
            AppError::Unavailable(scenario.messages.providers_unavailable.clone())
        }
        other => AppError::Training(other),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Training(TrainingError::RunNotStarted) => (
                StatusCode::CONFLICT,
                "RUN_NOT_STARTED",
                "No training run in progress".to_string(),
            ),
            AppError::Training(TrainingError::RunNotCompleted) => (
                StatusCode::CONFLICT,
                "RUN_NOT_COMPLETED",
                "The current run is not completed yet".to_string(),
            ),
            AppError::Training(TrainingError::TurnTooShort { min }) => (
                StatusCode::BAD_REQUEST,
                "TURN_TOO_SHORT",
                format!("Turn must be at least {min} characters"),
            ),
            AppError::Training(TrainingError::NoTurnToReview) => (
                StatusCode::CONFLICT,
                "NO_TURN_TO_REVIEW",
                "No turn available for feedback yet".to_string(),
            ),
            AppError::Training(TrainingError::ProvidersExhausted { .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDERS_UNAVAILABLE",
                "All language model providers are unavailable".to_string(),
            ),
            AppError::Training(TrainingError::Storage(e)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                e.to_string(),
            ),
            AppError::Promo(PromoError::NotFound) => (
                StatusCode::NOT_FOUND,
                "PROMO_NOT_FOUND",
                "Unknown promo code".to_string(),
            ),
            AppError::Promo(PromoError::Expired) => (
                StatusCode::GONE,
                "PROMO_EXPIRED",
                "This promo code has expired".to_string(),
            ),
            AppError::Promo(PromoError::Exhausted) => (
                StatusCode::CONFLICT,
                "PROMO_EXHAUSTED",
                "This promo code has reached its usage cap".to_string(),
            ),
            AppError::Promo(PromoError::AlreadyRedeemed) => (
                StatusCode::CONFLICT,
                "PROMO_ALREADY_REDEEMED",
                "You have already redeemed this code".to_string(),
            ),
            AppError::Promo(PromoError::Storage(e)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                e.to_string(),
            ),
            AppError::Repository(RepositoryError::NotFound) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Resource not found".to_string(),
            ),
            AppError::Repository(RepositoryError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone())
            }
            AppError::Repository(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                e.to_string(),
            ),
            AppError::NoAccess => (
                StatusCode::FORBIDDEN,
                "NO_ACCESS",
                "No training runs left; redeem a promo code or subscribe".to_string(),
            ),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDERS_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
