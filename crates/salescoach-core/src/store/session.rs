//! SessionStore trait definition.

use salescoach_types::error::RepositoryError;
use salescoach_types::session::{BotSession, SessionState, StatsState};
use uuid::Uuid;

/// Repository trait for per-(user, bot) session documents.
///
/// The run state and lifetime stats are independent JSON documents,
/// replaced wholesale on update (last-writer-wins; a single coordinator
/// instance owns a user's live session).
pub trait SessionStore: Send + Sync {
    /// Get the session for (user, bot), creating a fresh one if absent.
    ///
    /// Idempotent under concurrency via the unique (user_id, bot_name) key.
    fn get_or_create(
        &self,
        user_id: &Uuid,
        bot_name: &str,
    ) -> impl std::future::Future<Output = Result<BotSession, RepositoryError>> + Send;

    /// Replace the run-state document.
    fn update_state(
        &self,
        session_id: &Uuid,
        state: &SessionState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace the stats document.
    fn update_stats(
        &self,
        session_id: &Uuid,
        stats: &StatsState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace both documents in one write.
    fn update_both(
        &self,
        session_id: &Uuid,
        state: &SessionState,
        stats: &StatsState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
