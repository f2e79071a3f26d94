//! SQLite badge store.
//!
//! Badges are unique per (user, badge_type) across bots; the grant is an
//! INSERT OR IGNORE against that unique key so re-earning a badge in a
//! second bot is a no-op.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use salescoach_core::store::BadgeStore;
use salescoach_types::error::RepositoryError;
use salescoach_types::user::Badge;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `BadgeStore`.
pub struct SqliteBadgeStore {
    pool: DatabasePool,
}

impl SqliteBadgeStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct BadgeRow {
    id: String,
    user_id: String,
    badge_type: String,
    earned_in_bot: String,
    metadata: Option<String>,
    earned_at: String,
}

impl BadgeRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            badge_type: row.try_get("badge_type")?,
            earned_in_bot: row.try_get("earned_in_bot")?,
            metadata: row.try_get("metadata")?,
            earned_at: row.try_get("earned_at")?,
        })
    }

    fn into_badge(self) -> Result<Badge, RepositoryError> {
        let metadata = match self.metadata {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| RepositoryError::Query(format!("invalid metadata: {e}")))?,
            ),
            None => None,
        };

        Ok(Badge {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            badge_type: self.badge_type,
            earned_in_bot: self.earned_in_bot,
            metadata,
            earned_at: parse_datetime(&self.earned_at)?,
        })
    }
}

impl BadgeStore for SqliteBadgeStore {
    async fn grant(
        &self,
        user_id: &Uuid,
        badge_type: &str,
        earned_in_bot: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<bool, RepositoryError> {
        let metadata_str = match metadata {
            Some(value) => Some(
                serde_json::to_string(value)
                    .map_err(|e| RepositoryError::Query(format!("invalid metadata: {e}")))?,
            ),
            None => None,
        };

        let result = sqlx::query(
            r#"INSERT INTO user_badges (id, user_id, badge_type, earned_in_bot, metadata, earned_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (user_id, badge_type) DO NOTHING"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(user_id.to_string())
        .bind(badge_type)
        .bind(earned_in_bot)
        .bind(metadata_str)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, user_id: &Uuid) -> Result<Vec<Badge>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM user_badges WHERE user_id = ? ORDER BY earned_at DESC, id DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut badges = Vec::with_capacity(rows.len());
        for row in &rows {
            let badge_row =
                BadgeRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            badges.push(badge_row.into_badge()?);
        }
        Ok(badges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salescoach_core::store::UserStore;
    use salescoach_types::user::UserProfile;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    async fn setup_user(pool: &DatabasePool, external_id: &str) -> Uuid {
        let users = super::super::SqliteUserStore::new(pool.clone());
        users
            .get_or_create(external_id, &UserProfile::default())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_grant_new_badge() {
        let pool = test_pool().await;
        let store = SqliteBadgeStore::new(pool.clone());
        let user_id = setup_user(&pool, "tg:1").await;

        let granted = store
            .grant(&user_id, "first-deal", "spin-sales", None)
            .await
            .unwrap();
        assert!(granted);

        let badges = store.list(&user_id).await.unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].badge_type, "first-deal");
        assert_eq!(badges[0].earned_in_bot, "spin-sales");
    }

    #[tokio::test]
    async fn test_grant_duplicate_across_bots_is_noop() {
        let pool = test_pool().await;
        let store = SqliteBadgeStore::new(pool.clone());
        let user_id = setup_user(&pool, "tg:1").await;

        assert!(store
            .grant(&user_id, "first-deal", "spin-sales", None)
            .await
            .unwrap());
        // Same badge from a different bot: already held.
        assert!(!store
            .grant(&user_id, "first-deal", "cold-calls", None)
            .await
            .unwrap());

        let badges = store.list(&user_id).await.unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].earned_in_bot, "spin-sales");
    }

    #[tokio::test]
    async fn test_badges_isolated_per_user() {
        let pool = test_pool().await;
        let store = SqliteBadgeStore::new(pool.clone());
        let alice = setup_user(&pool, "tg:1").await;
        let bob = setup_user(&pool, "tg:2").await;

        store
            .grant(&alice, "first-deal", "spin-sales", None)
            .await
            .unwrap();

        assert_eq!(store.list(&alice).await.unwrap().len(), 1);
        assert!(store.list(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let pool = test_pool().await;
        let store = SqliteBadgeStore::new(pool.clone());
        let user_id = setup_user(&pool, "tg:1").await;

        let meta = serde_json::json!({"progress": 95});
        store
            .grant(&user_id, "closer", "spin-sales", Some(&meta))
            .await
            .unwrap();

        let badges = store.list(&user_id).await.unwrap();
        assert_eq!(badges[0].metadata, Some(meta));
    }
}
