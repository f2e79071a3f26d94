//! SQLite access-grant store.
//!
//! Grants are audit rows: revoked or drained, never deleted. `consume`
//! decrements counted grants with a conditional UPDATE so two concurrent
//! consumers cannot take the same last credit through the single-writer
//! pool.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use salescoach_core::store::AccessStore;
use salescoach_types::access::{AccessCheck, AccessGrant, GrantKind, GrantSource};
use salescoach_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `AccessStore`.
pub struct SqliteAccessStore {
    pool: DatabasePool,
}

impl SqliteAccessStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn insert_grant(&self, grant: &AccessGrant) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO access_grants
               (id, user_id, kind, source, starts_at, expires_at, credits_total, credits_left, revoked, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(grant.id.to_string())
        .bind(grant.user_id.to_string())
        .bind(grant.kind.to_string())
        .bind(grant.source.to_string())
        .bind(format_datetime(&grant.starts_at))
        .bind(grant.expires_at.as_ref().map(format_datetime))
        .bind(grant.credits_total)
        .bind(grant.credits_left)
        .bind(grant.revoked as i32)
        .bind(format_datetime(&grant.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    /// Subscription whose window covers now, ending last, if any.
    async fn active_subscription(
        &self,
        user_id: &Uuid,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT starts_at, expires_at FROM access_grants
               WHERE user_id = ? AND kind = 'subscription' AND revoked = 0 AND expires_at IS NOT NULL"#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let now = Utc::now();
        let mut best: Option<DateTime<Utc>> = None;
        for row in &rows {
            let starts_raw: String = row
                .try_get("starts_at")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let expires_raw: String = row
                .try_get("expires_at")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let starts_at = parse_datetime(&starts_raw)?;
            let expires_at = parse_datetime(&expires_raw)?;
            // A window that has not opened yet grants nothing.
            if starts_at <= now && expires_at > now && best.is_none_or(|b| expires_at > b) {
                best = Some(expires_at);
            }
        }
        Ok(best)
    }

    /// Remaining units across active counted grants of one kind.
    async fn remaining(&self, user_id: &Uuid, kind: GrantKind) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT COALESCE(SUM(credits_left), 0) AS remaining FROM access_grants
               WHERE user_id = ? AND kind = ? AND revoked = 0 AND credits_left > 0"#,
        )
        .bind(user_id.to_string())
        .bind(kind.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.try_get("remaining")
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    /// Take one unit from the oldest active grant of a counted kind.
    async fn consume_counted(&self, user_id: &Uuid, kind: GrantKind) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE access_grants
               SET credits_left = credits_left - 1
               WHERE id = (
                   SELECT id FROM access_grants
                   WHERE user_id = ? AND kind = ? AND revoked = 0 AND credits_left > 0
                   ORDER BY created_at, id LIMIT 1
               ) AND credits_left > 0"#,
        )
        .bind(user_id.to_string())
        .bind(kind.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}

struct GrantRow {
    id: String,
    user_id: String,
    kind: String,
    source: String,
    starts_at: String,
    expires_at: Option<String>,
    credits_total: Option<i64>,
    credits_left: Option<i64>,
    revoked: i32,
    created_at: String,
}

impl GrantRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: row.try_get("kind")?,
            source: row.try_get("source")?,
            starts_at: row.try_get("starts_at")?,
            expires_at: row.try_get("expires_at")?,
            credits_total: row.try_get("credits_total")?,
            credits_left: row.try_get("credits_left")?,
            revoked: row.try_get("revoked")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_grant(self) -> Result<AccessGrant, RepositoryError> {
        let kind: GrantKind = self.kind.parse().map_err(RepositoryError::Query)?;
        let source: GrantSource = self.source.parse().map_err(RepositoryError::Query)?;
        let expires_at = match self.expires_at {
            Some(raw) => Some(parse_datetime(&raw)?),
            None => None,
        };

        Ok(AccessGrant {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            kind,
            source,
            starts_at: parse_datetime(&self.starts_at)?,
            expires_at,
            credits_total: self.credits_total,
            credits_left: self.credits_left,
            revoked: self.revoked != 0,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn counted_grant(
    user_id: &Uuid,
    kind: GrantKind,
    source: GrantSource,
    amount: i64,
) -> AccessGrant {
    let now = Utc::now();
    AccessGrant {
        id: Uuid::now_v7(),
        user_id: *user_id,
        kind,
        source,
        starts_at: now,
        expires_at: None,
        credits_total: Some(amount),
        credits_left: Some(amount),
        revoked: false,
        created_at: now,
    }
}

impl AccessStore for SqliteAccessStore {
    async fn check(&self, user_id: &Uuid) -> Result<AccessCheck, RepositoryError> {
        if let Some(expires_at) = self.active_subscription(user_id).await? {
            return Ok(AccessCheck::Subscription { expires_at });
        }

        let credits = self.remaining(user_id, GrantKind::Credits).await?;
        if credits > 0 {
            return Ok(AccessCheck::Credits { remaining: credits });
        }

        let trials = self.remaining(user_id, GrantKind::FreeTrial).await?;
        if trials > 0 {
            return Ok(AccessCheck::FreeTrial { remaining: trials });
        }

        Ok(AccessCheck::None)
    }

    async fn consume(&self, user_id: &Uuid) -> Result<bool, RepositoryError> {
        // Subscriptions are unmetered while active.
        if self.active_subscription(user_id).await?.is_some() {
            return Ok(true);
        }
        if self.consume_counted(user_id, GrantKind::Credits).await? {
            return Ok(true);
        }
        self.consume_counted(user_id, GrantKind::FreeTrial).await
    }

    async fn grant_subscription(
        &self,
        user_id: &Uuid,
        source: GrantSource,
        expires_at: DateTime<Utc>,
    ) -> Result<AccessGrant, RepositoryError> {
        let now = Utc::now();
        let grant = AccessGrant {
            id: Uuid::now_v7(),
            user_id: *user_id,
            kind: GrantKind::Subscription,
            source,
            starts_at: now,
            expires_at: Some(expires_at),
            credits_total: None,
            credits_left: None,
            revoked: false,
            created_at: now,
        };
        self.insert_grant(&grant).await?;
        Ok(grant)
    }

    async fn grant_credits(
        &self,
        user_id: &Uuid,
        source: GrantSource,
        amount: i64,
    ) -> Result<AccessGrant, RepositoryError> {
        let grant = counted_grant(user_id, GrantKind::Credits, source, amount);
        self.insert_grant(&grant).await?;
        Ok(grant)
    }

    async fn grant_free_trials(
        &self,
        user_id: &Uuid,
        source: GrantSource,
        amount: i64,
    ) -> Result<AccessGrant, RepositoryError> {
        let grant = counted_grant(user_id, GrantKind::FreeTrial, source, amount);
        self.insert_grant(&grant).await?;
        Ok(grant)
    }

    async fn list(&self, user_id: &Uuid) -> Result<Vec<AccessGrant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM access_grants WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in &rows {
            let grant_row =
                GrantRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            grants.push(grant_row.into_grant()?);
        }
        Ok(grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use salescoach_core::store::UserStore;
    use salescoach_types::user::UserProfile;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    async fn setup_user(pool: &DatabasePool) -> Uuid {
        let users = super::super::SqliteUserStore::new(pool.clone());
        users
            .get_or_create("tg:42", &UserProfile::default())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_check_without_grants() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        let check = store.check(&user_id).await.unwrap();
        assert_eq!(check, AccessCheck::None);
        assert!(!check.is_allowed());
    }

    #[tokio::test]
    async fn test_subscription_beats_credits() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        store
            .grant_credits(&user_id, GrantSource::Admin, 5)
            .await
            .unwrap();
        let until = Utc::now() + Duration::days(30);
        store
            .grant_subscription(&user_id, GrantSource::Admin, until)
            .await
            .unwrap();

        let check = store.check(&user_id).await.unwrap();
        assert!(matches!(check, AccessCheck::Subscription { .. }));

        // Consuming under a subscription leaves the credits untouched.
        assert!(store.consume(&user_id).await.unwrap());
        let grants = store.list(&user_id).await.unwrap();
        let credits = grants
            .iter()
            .find(|g| g.kind == GrantKind::Credits)
            .unwrap();
        assert_eq!(credits.credits_left, Some(5));
    }

    #[tokio::test]
    async fn test_expired_subscription_falls_through_to_credits() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        let past = Utc::now() - Duration::days(1);
        store
            .grant_subscription(&user_id, GrantSource::Admin, past)
            .await
            .unwrap();
        store
            .grant_credits(&user_id, GrantSource::Admin, 3)
            .await
            .unwrap();

        let check = store.check(&user_id).await.unwrap();
        assert_eq!(check, AccessCheck::Credits { remaining: 3 });
    }

    #[tokio::test]
    async fn test_future_dated_subscription_not_active_yet() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        let now = Utc::now();
        let grant = AccessGrant {
            id: Uuid::now_v7(),
            user_id,
            kind: GrantKind::Subscription,
            source: GrantSource::Admin,
            starts_at: now + Duration::days(7),
            expires_at: Some(now + Duration::days(37)),
            credits_total: None,
            credits_left: None,
            revoked: false,
            created_at: now,
        };
        store.insert_grant(&grant).await.unwrap();
        store
            .grant_credits(&user_id, GrantSource::Admin, 3)
            .await
            .unwrap();

        // The window has not opened; credits carry the user until it does.
        assert_eq!(
            store.check(&user_id).await.unwrap(),
            AccessCheck::Credits { remaining: 3 }
        );
        assert!(store.consume(&user_id).await.unwrap());
        assert_eq!(
            store.check(&user_id).await.unwrap(),
            AccessCheck::Credits { remaining: 2 }
        );
    }

    #[tokio::test]
    async fn test_credits_beat_free_trials() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        store
            .grant_free_trials(&user_id, GrantSource::Signup, 3)
            .await
            .unwrap();
        store
            .grant_credits(&user_id, GrantSource::Admin, 2)
            .await
            .unwrap();

        // Credits drain first.
        assert!(store.consume(&user_id).await.unwrap());
        assert!(store.consume(&user_id).await.unwrap());
        assert_eq!(
            store.check(&user_id).await.unwrap(),
            AccessCheck::FreeTrial { remaining: 3 }
        );
    }

    #[tokio::test]
    async fn test_consume_never_overdraws() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        store
            .grant_free_trials(&user_id, GrantSource::Signup, 1)
            .await
            .unwrap();

        assert!(store.consume(&user_id).await.unwrap());
        assert!(!store.consume(&user_id).await.unwrap());

        let grants = store.list(&user_id).await.unwrap();
        assert_eq!(grants[0].credits_left, Some(0));
        assert_eq!(store.check(&user_id).await.unwrap(), AccessCheck::None);
    }

    #[tokio::test]
    async fn test_remaining_sums_multiple_grants() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        store
            .grant_credits(&user_id, GrantSource::Admin, 2)
            .await
            .unwrap();
        store
            .grant_credits(&user_id, GrantSource::PromoCode, 3)
            .await
            .unwrap();

        assert_eq!(
            store.check(&user_id).await.unwrap(),
            AccessCheck::Credits { remaining: 5 }
        );
    }

    #[tokio::test]
    async fn test_list_is_audit_trail() {
        let pool = test_pool().await;
        let store = SqliteAccessStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        store
            .grant_free_trials(&user_id, GrantSource::Signup, 3)
            .await
            .unwrap();
        store.consume(&user_id).await.unwrap();
        store.consume(&user_id).await.unwrap();
        store.consume(&user_id).await.unwrap();

        // Drained grants stay on record.
        let grants = store.list(&user_id).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].credits_total, Some(3));
        assert_eq!(grants[0].credits_left, Some(0));
    }
}
