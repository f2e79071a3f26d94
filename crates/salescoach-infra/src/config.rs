//! Application configuration loader.
//!
//! Reads a TOML config file describing the HTTP server, database, scenario
//! file location, and the per-task LLM route table. Unlike the scenario
//! file, the app config has usable defaults for everything except the LLM
//! routes, which must name at least one candidate per task.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use salescoach_types::llm::RouteTable;
use salescoach_types::scenario::ScenarioConfig;
use salescoach_types::error::ScenarioError;

/// Errors from loading the application config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Path to the scenario TOML file.
    pub scenario_path: PathBuf,
    /// Per-task LLM candidate routes.
    pub llm: RouteTable,
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL. When absent, a file under the data directory is used.
    pub url: Option<String>,
}

impl DatabaseConfig {
    /// The configured URL, or the default data-directory location.
    pub fn url_or_default(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(crate::sqlite::pool::default_database_url)
    }
}

impl AppConfig {
    /// Load the application config from a TOML file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&content)?)
    }
}

/// Load and validate a scenario file.
pub async fn load_scenario(path: &Path) -> Result<ScenarioConfig, ScenarioError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ScenarioError::Io(format!("{}: {e}", path.display())))?;

    let scenario: ScenarioConfig =
        toml::from_str(&content).map_err(|e| ScenarioError::Parse(e.to_string()))?;

    scenario.validate()?;
    Ok(scenario)
}
