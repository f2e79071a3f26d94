use thiserror::Error;

use crate::llm::TaskKind;

/// Errors from repository operations (used by trait definitions in salescoach-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether the failed operation is worth one more attempt.
    ///
    /// Connection drops and busy/locked query failures are; not-found and
    /// conflicts are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Connection | RepositoryError::Query(_))
    }
}

/// Errors related to training run operations.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("no training run in progress")]
    RunNotStarted,

    #[error("training run is not completed yet")]
    RunNotCompleted,

    #[error("turn too short: at least {min} characters required")]
    TurnTooShort { min: usize },

    #[error("no reviewed turn available for feedback")]
    NoTurnToReview,

    #[error("all providers exhausted for task '{task}'")]
    ProvidersExhausted { task: TaskKind },

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors related to promo code redemption.
#[derive(Debug, Error)]
pub enum PromoError {
    #[error("promo code not found")]
    NotFound,

    #[error("promo code expired")]
    Expired,

    #[error("promo code usage cap reached")]
    Exhausted,

    #[error("promo code already redeemed by this user")]
    AlreadyRedeemed,

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors from scenario configuration loading and validation.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid scenario: {0}")]
    Invalid(String),

    #[error("failed to read scenario file: {0}")]
    Io(String),

    #[error("failed to parse scenario file: {0}")]
    Parse(String),
}
