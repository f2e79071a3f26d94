//! AccessStore trait definition.

use chrono::{DateTime, Utc};
use salescoach_types::access::{AccessCheck, AccessGrant, GrantSource};
use salescoach_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for training access grants.
///
/// Check priority is fixed: an active subscription wins over credits,
/// credits win over the free-trial counter. Counted grants never go
/// negative; grants are revoked or drained, never deleted.
pub trait AccessStore: Send + Sync {
    /// Evaluate the user's current access without consuming anything.
    fn check(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<AccessCheck, RepositoryError>> + Send;

    /// Consume one unit of access if available.
    ///
    /// Subscriptions consume nothing; counted grants are decremented with a
    /// conditional update so concurrent consumers cannot overdraw. Returns
    /// false when no access remains.
    fn consume(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Grant a subscription window ending at `expires_at`.
    fn grant_subscription(
        &self,
        user_id: &Uuid,
        source: GrantSource,
        expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<AccessGrant, RepositoryError>> + Send;

    /// Grant purchased training credits.
    fn grant_credits(
        &self,
        user_id: &Uuid,
        source: GrantSource,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<AccessGrant, RepositoryError>> + Send;

    /// Grant free trial runs.
    fn grant_free_trials(
        &self,
        user_id: &Uuid,
        source: GrantSource,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<AccessGrant, RepositoryError>> + Send;

    /// List a user's grants, newest first (audit view).
    fn list(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<AccessGrant>, RepositoryError>> + Send;
}
