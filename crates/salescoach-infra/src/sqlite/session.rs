//! SQLite session store.
//!
//! Implements `SessionStore` from `salescoach-core`. The run-state and stats
//! documents are serialized to JSON TEXT and replaced wholesale on update;
//! per-(user, bot) uniqueness is enforced by the schema.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use salescoach_core::store::SessionStore;
use salescoach_types::error::RepositoryError;
use salescoach_types::session::{BotSession, SessionState, StatsState};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `SessionStore`.
pub struct SqliteSessionStore {
    pool: DatabasePool,
}

impl SqliteSessionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct SessionRow {
    id: String,
    user_id: String,
    bot_name: String,
    session_data: String,
    stats_data: String,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            bot_name: row.try_get("bot_name")?,
            session_data: row.try_get("session_data")?,
            stats_data: row.try_get("stats_data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_session(self) -> Result<BotSession, RepositoryError> {
        let state: SessionState = serde_json::from_str(&self.session_data)
            .map_err(|e| RepositoryError::Query(format!("invalid session_data: {e}")))?;
        let stats: StatsState = serde_json::from_str(&self.stats_data)
            .map_err(|e| RepositoryError::Query(format!("invalid stats_data: {e}")))?;

        Ok(BotSession {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            bot_name: self.bot_name,
            state,
            stats,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Query(format!("failed to serialize document: {e}")))
}

impl SessionStore for SqliteSessionStore {
    async fn get_or_create(
        &self,
        user_id: &Uuid,
        bot_name: &str,
    ) -> Result<BotSession, RepositoryError> {
        let fresh = BotSession::new(*user_id, bot_name);
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO bot_sessions
               (id, user_id, bot_name, session_data, stats_data, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (user_id, bot_name) DO NOTHING"#,
        )
        .bind(fresh.id.to_string())
        .bind(user_id.to_string())
        .bind(bot_name)
        .bind(to_json(&fresh.state)?)
        .bind(to_json(&fresh.stats)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM bot_sessions WHERE user_id = ? AND bot_name = ?")
            .bind(user_id.to_string())
            .bind(bot_name)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let session_row =
            SessionRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        session_row.into_session()
    }

    async fn update_state(
        &self,
        session_id: &Uuid,
        state: &SessionState,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE bot_sessions SET session_data = ?, updated_at = ? WHERE id = ?")
                .bind(to_json(state)?)
                .bind(format_datetime(&Utc::now()))
                .bind(session_id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_stats(
        &self,
        session_id: &Uuid,
        stats: &StatsState,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE bot_sessions SET stats_data = ?, updated_at = ? WHERE id = ?")
                .bind(to_json(stats)?)
                .bind(format_datetime(&Utc::now()))
                .bind(session_id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_both(
        &self,
        session_id: &Uuid,
        state: &SessionState,
        stats: &StatsState,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE bot_sessions SET session_data = ?, stats_data = ?, updated_at = ? WHERE id = ?",
        )
        .bind(to_json(state)?)
        .bind(to_json(stats)?)
        .bind(format_datetime(&Utc::now()))
        .bind(session_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salescoach_core::store::UserStore;
    use salescoach_types::session::RunPhase;
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
    async fn test_get_or_create_fresh_session() {
        let pool = test_pool().await;
        let store = SqliteSessionStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        let session = store.get_or_create(&user_id, "spin-sales").await.unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.bot_name, "spin-sales");
        assert_eq!(session.state.phase, RunPhase::AwaitingStart);
        assert_eq!(session.stats.total_runs, 0);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing() {
        let pool = test_pool().await;
        let store = SqliteSessionStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        let first = store.get_or_create(&user_id, "spin-sales").await.unwrap();
        let second = store.get_or_create(&user_id, "spin-sales").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_single_row() {
        let pool = test_pool().await;
        let a = SqliteSessionStore::new(pool.clone());
        let b = SqliteSessionStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        let (left, right) = tokio::join!(
            a.get_or_create(&user_id, "spin-sales"),
            b.get_or_create(&user_id, "spin-sales"),
        );
        assert_eq!(left.unwrap().id, right.unwrap().id);
    }

    #[tokio::test]
    async fn test_sessions_isolated_per_bot() {
        let pool = test_pool().await;
        let store = SqliteSessionStore::new(pool.clone());
        let user_id = setup_user(&pool).await;

        let spin = store.get_or_create(&user_id, "spin-sales").await.unwrap();
        let cold = store.get_or_create(&user_id, "cold-calls").await.unwrap();
        assert_ne!(spin.id, cold.id);

        let mut state = spin.state.clone();
        state.phase = RunPhase::InProgress;
        state.turn_count = 3;
        store.update_state(&spin.id, &state).await.unwrap();

        let cold_reloaded = store.get_or_create(&user_id, "cold-calls").await.unwrap();
        assert_eq!(cold_reloaded.state.turn_count, 0);
    }

    #[tokio::test]
    async fn test_update_state_roundtrip() {
        let pool = test_pool().await;
        let store = SqliteSessionStore::new(pool.clone());
        let user_id = setup_user(&pool).await;
        let session = store.get_or_create(&user_id, "spin-sales").await.unwrap();

        let mut state = SessionState::start(1, "A retail chain.".to_string());
        state.turn_count = 2;
        state.progress = 45;
        state.turn_type_counts.insert("problem".into(), 2);
        store.update_state(&session.id, &state).await.unwrap();

        let reloaded = store.get_or_create(&user_id, "spin-sales").await.unwrap();
        assert_eq!(reloaded.state.phase, RunPhase::InProgress);
        assert_eq!(reloaded.state.turn_count, 2);
        assert_eq!(reloaded.state.progress, 45);
        assert_eq!(reloaded.state.turn_type_counts.get("problem"), Some(&2));
        assert_eq!(reloaded.state.case_text.as_deref(), Some("A retail chain."));
    }

    #[tokio::test]
    async fn test_update_both_roundtrip() {
        let pool = test_pool().await;
        let store = SqliteSessionStore::new(pool.clone());
        let user_id = setup_user(&pool).await;
        let session = store.get_or_create(&user_id, "spin-sales").await.unwrap();

        let stats = StatsState {
            total_runs: 3,
            total_turns: 21,
            best_progress: 90,
            total_contextual_turns: 5,
            last_run_at: Some(Utc::now()),
        };
        store
            .update_both(&session.id, &SessionState::default(), &stats)
            .await
            .unwrap();

        let reloaded = store.get_or_create(&user_id, "spin-sales").await.unwrap();
        assert_eq!(reloaded.stats.total_runs, 3);
        assert_eq!(reloaded.stats.best_progress, 90);
        assert_eq!(reloaded.state.phase, RunPhase::AwaitingStart);
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let pool = test_pool().await;
        let store = SqliteSessionStore::new(pool);

        let err = store
            .update_state(&Uuid::now_v7(), &SessionState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
