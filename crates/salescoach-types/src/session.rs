use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A per-(user, bot) training session row.
///
/// The live run state and the lifetime statistics are independent JSON
/// documents. Updates replace a whole document at a time, so resetting the
/// run never touches the stats and vice versa. The replace is
/// last-writer-wins; a single coordinator instance is expected to own a
/// user's live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bot_name: String,
    pub state: SessionState,
    pub stats: StatsState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    AwaitingStart,
    InProgress,
    Completed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::AwaitingStart => write!(f, "awaiting-start"),
            RunPhase::InProgress => write!(f, "in-progress"),
            RunPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Why a run completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionReason {
    TargetReached,
    MaxTurnsReached,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::TargetReached => write!(f, "target-reached"),
            CompletionReason::MaxTurnsReached => write!(f, "max-turns-reached"),
        }
    }
}

/// Cached coaching feedback, keyed by a hash of the prompt it answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackCache {
    /// Hex SHA-256 of the feedback prompt.
    pub prompt_hash: String,
    pub text: String,
    pub cached_at: DateTime<Utc>,
}

/// The live run state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: RunPhase,
    /// Turns counted this run (only turns that produced a client reply).
    pub turn_count: u32,
    /// Deal clarity progress, 0..=100.
    pub progress: u32,
    /// Per turn-type counts for this run, keyed by turn-type id.
    #[serde(default)]
    pub turn_type_counts: BTreeMap<String, u32>,
    /// Turns that referenced the client's previous reply.
    #[serde(default)]
    pub contextual_turns: u32,
    /// Index of the client case being played.
    pub case_index: Option<usize>,
    /// Text of the client case being played.
    pub case_text: Option<String>,
    /// Turn-type id of the last classified turn.
    pub last_turn_type: Option<String>,
    /// The trainee's last turn (feedback prompt input).
    pub last_turn_text: Option<String>,
    /// The client's last reply.
    pub last_client_reply: Option<String>,
    pub completion_reason: Option<CompletionReason>,
    #[serde(default)]
    pub feedback_cache: Option<FeedbackCache>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: RunPhase::AwaitingStart,
            turn_count: 0,
            progress: 0,
            turn_type_counts: BTreeMap::new(),
            contextual_turns: 0,
            case_index: None,
            case_text: None,
            last_turn_type: None,
            last_turn_text: None,
            last_client_reply: None,
            completion_reason: None,
            feedback_cache: None,
            started_at: None,
        }
    }
}

impl SessionState {
    /// A fresh in-progress run over the given case.
    pub fn start(case_index: usize, case_text: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::InProgress,
            case_index: Some(case_index),
            case_text: Some(case_text.into()),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Lifetime per-bot statistics document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsState {
    pub total_runs: u32,
    pub total_turns: u64,
    pub best_progress: u32,
    /// Lifetime contextual-turn count (feeds badge rules).
    #[serde(default)]
    pub total_contextual_turns: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl BotSession {
    pub fn new(user_id: Uuid, bot_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            bot_name: bot_name.into(),
            state: SessionState::default(),
            stats: StatsState::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
