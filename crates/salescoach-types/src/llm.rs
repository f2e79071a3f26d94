//! LLM request/response types for Salescoach.
//!
//! These types model the data shapes for LLM provider interactions:
//! completion requests, streaming events, task routing configuration,
//! and error handling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of LLM task being routed.
///
/// Each kind has its own candidate chain and sampling parameters: replies
/// are creative, feedback is longer-form, classification is short and
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// In-character client reply during a training run.
    ConversationalReply,
    /// Coaching feedback on the trainee's last turn.
    CoachingFeedback,
    /// Turn-type classification of trainee input.
    InputClassification,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::ConversationalReply,
        TaskKind::CoachingFeedback,
        TaskKind::InputClassification,
    ];
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::ConversationalReply => write!(f, "conversational-reply"),
            TaskKind::CoachingFeedback => write!(f, "coaching-feedback"),
            TaskKind::InputClassification => write!(f, "input-classification"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conversational-reply" => Ok(TaskKind::ConversationalReply),
            "coaching-feedback" => Ok(TaskKind::CoachingFeedback),
            "input-classification" => Ok(TaskKind::InputClassification),
            other => Err(format!("invalid task kind: '{other}'")),
        }
    }
}

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A single message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request to an LLM provider for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

/// Response from an LLM provider for a non-streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub content: String,
    pub model: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// Reason why the LLM stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
        }
    }
}

impl FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "end_turn" => Ok(StopReason::EndTurn),
            "max_tokens" => Ok(StopReason::MaxTokens),
            "stop_sequence" => Ok(StopReason::StopSequence),
            other => Err(format!("invalid stop reason: '{other}'")),
        }
    }
}

/// Token usage for a completion request/response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Events emitted during a streaming LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Connection established with the provider.
    Connected,

    /// A delta of text content.
    TextDelta { text: String },

    /// The message is finishing with a stop reason.
    MessageDelta { stop_reason: StopReason },

    /// Token usage information.
    Usage(Usage),

    /// The stream has completed.
    Done,
}

/// Errors from LLM provider operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("completion returned no usable text")]
    EmptyCompletion,

    #[error("attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("all candidate providers exhausted for task '{task}'")]
    Exhausted { task: TaskKind },
}

impl LlmError {
    /// Whether the error is a transient transport failure worth a bounded
    /// retry on the same candidate. Everything else advances the chain.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Provider { .. }
                | LlmError::Stream(_)
                | LlmError::RateLimited { .. }
                | LlmError::Overloaded(_)
        )
    }
}

/// Capabilities of an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub max_context_tokens: u32,
    pub max_output_tokens: u32,
}

/// Type of LLM provider backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Anthropic,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Anthropic => write!(f, "anthropic"),
            ProviderType::OpenAiCompatible => write!(f, "openai_compatible"),
        }
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderType::Anthropic),
            "openai_compatible" => Ok(ProviderType::OpenAiCompatible),
            other => Err(format!("invalid provider type: '{other}'")),
        }
    }
}

/// Configuration for a single candidate provider in a task route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateConfig {
    /// Human-readable name (e.g., "anthropic-primary", "gemini-fallback").
    pub name: String,
    /// Backend type for this candidate.
    pub provider_type: ProviderType,
    /// Model identifier to use.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Override the default base URL for the provider.
    pub base_url: Option<String>,
}

/// Per-task routing configuration: ordered candidates and sampling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Candidates tried strictly in this order.
    pub candidates: Vec<CandidateConfig>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Same-candidate retries allowed for transient transport errors.
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
}

fn default_max_transient_retries() -> u32 {
    1
}

/// Top-level LLM routing configuration across all task kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTable {
    pub reply: RouteConfig,
    pub feedback: RouteConfig,
    pub classification: RouteConfig,
    /// Wall-clock budget for a single candidate attempt.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

impl RouteTable {
    pub fn route(&self, task: TaskKind) -> &RouteConfig {
        match task {
            TaskKind::ConversationalReply => &self.reply,
            TaskKind::CoachingFeedback => &self.feedback,
            TaskKind::InputClassification => &self.classification,
        }
    }
}

/// Per-candidate attempt statistics (for the status endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateStatusInfo {
    pub name: String,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
}
