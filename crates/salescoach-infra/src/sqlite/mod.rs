//! SQLite implementations of the `salescoach-core` store traits.
//!
//! Conventions shared by every store:
//! - UUIDs and timestamps are stored as TEXT (RFC3339 for timestamps).
//! - Session/stats documents are JSON TEXT, replaced wholesale on update.
//! - Reads go to the reader pool, writes to the single-connection writer.

pub mod access;
pub mod badge;
pub mod pool;
pub mod promo;
pub mod session;
pub mod user;

pub use access::SqliteAccessStore;
pub use badge::SqliteBadgeStore;
pub use pool::DatabasePool;
pub use promo::SqlitePromoStore;
pub use session::SqliteSessionStore;
pub use user::SqliteUserStore;

use chrono::{DateTime, Utc};
use salescoach_types::error::RepositoryError;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_uuid(s: &str) -> Result<uuid::Uuid, RepositoryError> {
    uuid::Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid uuid: {e}")))
}
