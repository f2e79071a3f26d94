//! Concrete LLM providers and the router factory.
//!
//! Two provider backends cover every configured candidate: the native
//! Anthropic Messages API and a unified OpenAI-compatible client (OpenAI,
//! Gemini, Mistral, and any other endpoint speaking the chat completions
//! protocol via `base_url`).

pub mod anthropic;
pub mod openai_compat;

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use salescoach_core::llm::router::{Candidate, TaskRoute};
use salescoach_core::llm::{BoxLlmProvider, TaskRouter};
use salescoach_types::llm::{CandidateConfig, ProviderType, RouteTable, TaskKind};

use self::anthropic::AnthropicProvider;
use self::openai_compat::{OpenAiCompatConfig, OpenAiCompatibleProvider};

/// Errors while constructing providers from configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ProviderSetupError {
    #[error("candidate '{candidate}': environment variable '{env}' is not set")]
    MissingApiKey { candidate: String, env: String },
}

/// Build the task router from the configured route table.
///
/// API keys are read from the environment variables the candidates name;
/// a missing key for any configured candidate is a startup error, not a
/// runtime failover.
pub fn build_router(table: &RouteTable) -> Result<TaskRouter, ProviderSetupError> {
    let mut routes = HashMap::new();
    for task in TaskKind::ALL {
        let config = table.route(task);
        let mut candidates = Vec::with_capacity(config.candidates.len());
        for candidate in &config.candidates {
            candidates.push(build_candidate(candidate)?);
        }
        routes.insert(
            task,
            TaskRoute {
                candidates,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                max_transient_retries: config.max_transient_retries,
            },
        );
    }
    Ok(TaskRouter::new(
        routes,
        Duration::from_secs(table.attempt_timeout_secs),
    ))
}

fn build_candidate(config: &CandidateConfig) -> Result<Candidate, ProviderSetupError> {
    let api_key =
        std::env::var(&config.api_key_env).map_err(|_| ProviderSetupError::MissingApiKey {
            candidate: config.name.clone(),
            env: config.api_key_env.clone(),
        })?;

    let provider = match config.provider_type {
        ProviderType::Anthropic => {
            let mut provider =
                AnthropicProvider::new(SecretString::from(api_key), config.model.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            BoxLlmProvider::new(provider)
        }
        ProviderType::OpenAiCompatible => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            BoxLlmProvider::new(OpenAiCompatibleProvider::new(OpenAiCompatConfig {
                provider_name: config.name.clone(),
                base_url,
                api_key,
                model: config.model.clone(),
                capabilities: openai_compat::default_capabilities(),
            }))
        }
    };

    Ok(Candidate::new(provider, config.model.clone()))
}
