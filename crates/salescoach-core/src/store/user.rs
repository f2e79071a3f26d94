//! UserStore trait definition.

use salescoach_types::error::RepositoryError;
use salescoach_types::user::{User, UserProfile};
use uuid::Uuid;

/// Repository trait for cross-bot user identity and experience.
///
/// Implementations live in salescoach-infra (e.g., `SqliteUserStore`).
pub trait UserStore: Send + Sync {
    /// Get the user for an external id, creating it if absent.
    ///
    /// Idempotent under concurrency: two racing calls for the same
    /// external id both return the same row. Refreshes last_active_at and
    /// any changed profile fields on every call.
    fn get_or_create(
        &self,
        external_id: &str,
        profile: &UserProfile,
    ) -> impl std::future::Future<Output = Result<User, RepositoryError>> + Send;

    /// Get a user by external id without creating it.
    fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<User>, RepositoryError>> + Send;

    /// Atomically add experience points, returning the new lifetime total.
    fn add_experience(
        &self,
        user_id: &Uuid,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Persist a recomputed level.
    fn set_level(
        &self,
        user_id: &Uuid,
        level: i32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
