//! SQLite promo code store.
//!
//! `redeem` runs as a single transaction on the writer pool: the usage-cap
//! increment is a conditional UPDATE (first writer wins), the per-user usage
//! record rides the (user, code) unique key, and the resulting access grant
//! commits with them or not at all.

use chrono::{Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

use salescoach_core::store::PromoStore;
use salescoach_types::access::{GrantKind, GrantSource};
use salescoach_types::error::{PromoError, RepositoryError};
use salescoach_types::promo::{PromoCode, PromoKind, Redemption};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `PromoStore`.
pub struct SqlitePromoStore {
    pool: DatabasePool,
}

impl SqlitePromoStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct PromoRow {
    id: String,
    code: String,
    kind: String,
    value: i64,
    max_uses: Option<i64>,
    current_uses: i64,
    expires_at: Option<String>,
    created_at: String,
}

impl PromoRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            kind: row.try_get("kind")?,
            value: row.try_get("value")?,
            max_uses: row.try_get("max_uses")?,
            current_uses: row.try_get("current_uses")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_promo(self) -> Result<PromoCode, RepositoryError> {
        let kind: PromoKind = self.kind.parse().map_err(RepositoryError::Query)?;
        let expires_at = match self.expires_at {
            Some(raw) => Some(parse_datetime(&raw)?),
            None => None,
        };

        Ok(PromoCode {
            id: parse_uuid(&self.id)?,
            code: self.code,
            kind,
            value: self.value,
            max_uses: self.max_uses,
            current_uses: self.current_uses,
            expires_at,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE"))
}

impl PromoStore for SqlitePromoStore {
    async fn create(&self, promo: &PromoCode) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO promo_codes
               (id, code, kind, value, max_uses, current_uses, expires_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(promo.id.to_string())
        .bind(&promo.code)
        .bind(promo.kind.to_string())
        .bind(promo.value)
        .bind(promo.max_uses)
        .bind(promo.current_uses)
        .bind(promo.expires_at.as_ref().map(format_datetime))
        .bind(format_datetime(&promo.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("promo code '{}' already exists", promo.code))
            } else {
                query_error(e)
            }
        })?;

        Ok(())
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<PromoCode>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM promo_codes WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let promo_row = PromoRow::from_row(&row).map_err(query_error)?;
                Ok(Some(promo_row.into_promo()?))
            }
            None => Ok(None),
        }
    }

    async fn redeem(&self, user_id: &Uuid, code: &str) -> Result<Redemption, PromoError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|_| PromoError::Storage(RepositoryError::Connection))?;

        let row = sqlx::query("SELECT * FROM promo_codes WHERE code = ?")
            .bind(code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| PromoError::Storage(query_error(e)))?;
        let promo = match row {
            Some(row) => PromoRow::from_row(&row)
                .map_err(query_error)
                .and_then(PromoRow::into_promo)
                .map_err(PromoError::Storage)?,
            None => return Err(PromoError::NotFound),
        };

        let now = Utc::now();
        if promo.expires_at.is_some_and(|exp| exp <= now) {
            return Err(PromoError::Expired);
        }

        // Usage cap: conditional increment, first writer wins.
        let capped = sqlx::query(
            r#"UPDATE promo_codes SET current_uses = current_uses + 1
               WHERE id = ? AND (max_uses IS NULL OR current_uses < max_uses)"#,
        )
        .bind(promo.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| PromoError::Storage(query_error(e)))?;
        if capped.rows_affected() == 0 {
            return Err(PromoError::Exhausted);
        }

        // One redemption per user per code; the rollback on conflict undoes
        // the counter increment above.
        sqlx::query(
            "INSERT INTO promo_code_usages (id, promo_code_id, user_id, used_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(promo.id.to_string())
        .bind(user_id.to_string())
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PromoError::AlreadyRedeemed
            } else {
                PromoError::Storage(query_error(e))
            }
        })?;

        let (kind, source, expires_at, credits) = match promo.kind {
            PromoKind::FreeTrainings => (
                GrantKind::FreeTrial,
                GrantSource::PromoCode,
                None,
                Some(promo.value),
            ),
            PromoKind::Credits => (
                GrantKind::Credits,
                GrantSource::PromoCode,
                None,
                Some(promo.value),
            ),
            PromoKind::SubscriptionDays => (
                GrantKind::Subscription,
                GrantSource::PromoCode,
                Some(now + Duration::days(promo.value)),
                None,
            ),
        };

        sqlx::query(
            r#"INSERT INTO access_grants
               (id, user_id, kind, source, starts_at, expires_at, credits_total, credits_left, revoked, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(user_id.to_string())
        .bind(kind.to_string())
        .bind(source.to_string())
        .bind(format_datetime(&now))
        .bind(expires_at.as_ref().map(format_datetime))
        .bind(credits)
        .bind(credits)
        .bind(format_datetime(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| PromoError::Storage(query_error(e)))?;

        tx.commit()
            .await
            .map_err(|e| PromoError::Storage(query_error(e)))?;

        Ok(Redemption {
            code: promo.code,
            kind: promo.kind,
            value: promo.value,
        })
    }
}
