//! Application state wiring all services together.
//!
//! AppState holds the concrete store and coordinator instances used by both
//! the CLI commands and the REST API. The coordinator is generic over the
//! store traits, but AppState pins it to the SQLite implementations.

use std::sync::Arc;

use salescoach_core::llm::TaskRouter;
use salescoach_core::training::TrainingCoordinator;
use salescoach_infra::config::{load_scenario, AppConfig};
use salescoach_infra::llm::build_router;
use salescoach_infra::sqlite::pool::DatabasePool;
use salescoach_infra::sqlite::{
    SqliteAccessStore, SqliteBadgeStore, SqlitePromoStore, SqliteSessionStore, SqliteUserStore,
};
use salescoach_types::scenario::ScenarioConfig;

/// Concrete coordinator type pinned to the SQLite stores.
pub type ConcreteCoordinator =
    TrainingCoordinator<SqliteUserStore, SqliteSessionStore, SqliteBadgeStore>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ConcreteCoordinator>,
    pub users: Arc<SqliteUserStore>,
    pub access: Arc<SqliteAccessStore>,
    pub promo: Arc<SqlitePromoStore>,
    pub router: Arc<TaskRouter>,
    pub scenario: Arc<ScenarioConfig>,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: connect to the DB, build the LLM
    /// router from environment keys, load and validate the scenario.
    pub async fn init(config: &AppConfig) -> anyhow::Result<Self> {
        // The default database lives under the data directory; make sure it
        // exists before the pool tries to create the file.
        if config.database.url.is_none() {
            tokio::fs::create_dir_all(salescoach_infra::sqlite::pool::default_data_dir()).await?;
        }
        let db_pool = DatabasePool::new(&config.database.url_or_default()).await?;

        let scenario = Arc::new(load_scenario(&config.scenario_path).await?);
        let router = Arc::new(build_router(&config.llm)?);

        let coordinator = TrainingCoordinator::new(
            SqliteUserStore::new(db_pool.clone()),
            SqliteSessionStore::new(db_pool.clone()),
            SqliteBadgeStore::new(db_pool.clone()),
            router.clone(),
            scenario.clone(),
        );

        Ok(Self {
            coordinator: Arc::new(coordinator),
            users: Arc::new(SqliteUserStore::new(db_pool.clone())),
            access: Arc::new(SqliteAccessStore::new(db_pool.clone())),
            promo: Arc::new(SqlitePromoStore::new(db_pool.clone())),
            router,
            scenario,
            db_pool,
        })
    }
}
