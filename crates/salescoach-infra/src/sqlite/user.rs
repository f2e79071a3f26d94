//! SQLite user store.
//!
//! Implements `UserStore` from `salescoach-core`. Users are keyed by their
//! external platform id; `get_or_create` is idempotent under concurrency via
//! INSERT OR IGNORE on the unique external_id column.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use salescoach_core::store::UserStore;
use salescoach_types::error::RepositoryError;
use salescoach_types::user::{User, UserProfile};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `UserStore`.
pub struct SqliteUserStore {
    pool: DatabasePool,
}

impl SqliteUserStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct UserRow {
    id: String,
    external_id: String,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    total_xp: i64,
    level: i32,
    registered_at: String,
    last_active_at: String,
}

impl UserRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            total_xp: row.try_get("total_xp")?,
            level: row.try_get("level")?,
            registered_at: row.try_get("registered_at")?,
            last_active_at: row.try_get("last_active_at")?,
        })
    }

    fn into_user(self) -> Result<User, RepositoryError> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            external_id: self.external_id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            total_xp: self.total_xp,
            level: self.level,
            registered_at: parse_datetime(&self.registered_at)?,
            last_active_at: parse_datetime(&self.last_active_at)?,
        })
    }
}

impl UserStore for SqliteUserStore {
    async fn get_or_create(
        &self,
        external_id: &str,
        profile: &UserProfile,
    ) -> Result<User, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let candidate = User::new(external_id, profile.clone());

        // First writer wins; the loser's row is ignored and both callers
        // read back the same row below.
        sqlx::query(
            r#"INSERT INTO users
               (id, external_id, username, first_name, last_name, total_xp, level, registered_at, last_active_at)
               VALUES (?, ?, ?, ?, ?, 0, 1, ?, ?)
               ON CONFLICT (external_id) DO NOTHING"#,
        )
        .bind(candidate.id.to_string())
        .bind(external_id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Refresh activity and any profile fields the platform supplied.
        sqlx::query(
            r#"UPDATE users SET
               username = COALESCE(?, username),
               first_name = COALESCE(?, first_name),
               last_name = COALESCE(?, last_name),
               last_active_at = ?
               WHERE external_id = ?"#,
        )
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&now)
        .bind(external_id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        self.get_by_external_id(external_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let user_row =
                    UserRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(user_row.into_user()?))
            }
            None => Ok(None),
        }
    }

    async fn add_experience(&self, user_id: &Uuid, amount: i64) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "UPDATE users SET total_xp = total_xp + ? WHERE id = ? RETURNING total_xp",
        )
        .bind(amount)
        .bind(user_id.to_string())
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => row
                .try_get("total_xp")
                .map_err(|e| RepositoryError::Query(e.to_string())),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn set_level(&self, user_id: &Uuid, level: i32) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET level = ? WHERE id = ?")
            .bind(level)
            .bind(user_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
