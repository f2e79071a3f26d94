//! BadgeStore trait definition.

use salescoach_types::error::RepositoryError;
use salescoach_types::user::Badge;
use uuid::Uuid;

/// Repository trait for cross-bot badges.
///
/// Badges are unique per (user, badge_type) regardless of which bot awarded
/// them, and immutable once earned.
pub trait BadgeStore: Send + Sync {
    /// Grant a badge. Returns true only when the badge was newly inserted;
    /// false when the user already holds it (from any bot).
    fn grant(
        &self,
        user_id: &Uuid,
        badge_type: &str,
        earned_in_bot: &str,
        metadata: Option<&serde_json::Value>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List a user's badges, newest first.
    fn list(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Badge>, RepositoryError>> + Send;
}
