//! PromoStore trait definition.

use salescoach_types::error::PromoError;
use salescoach_types::error::RepositoryError;
use salescoach_types::promo::{PromoCode, Redemption};
use uuid::Uuid;

/// Repository trait for promo codes.
///
/// Redemption is a single transaction: validation, the usage-counter
/// increment, the per-user usage record, and the resulting access grant
/// all commit or roll back together. Under a usage cap the first writer
/// wins; the loser sees `PromoError::Exhausted`.
pub trait PromoStore: Send + Sync {
    /// Create a promo code.
    fn create(
        &self,
        promo: &PromoCode,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Look up a promo code by its code string.
    fn get_by_code(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = Result<Option<PromoCode>, RepositoryError>> + Send;

    /// Redeem a code for a user.
    ///
    /// Fails with a typed error when the code is unknown, expired, at its
    /// usage cap, or already redeemed by this user. On success the matching
    /// access grant has been created atomically.
    fn redeem(
        &self,
        user_id: &Uuid,
        code: &str,
    ) -> impl std::future::Future<Output = Result<Redemption, PromoError>> + Send;
}
