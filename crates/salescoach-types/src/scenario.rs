//! Typed scenario configuration for a training bot.
//!
//! A scenario document defines everything bot-specific: game rules, turn
//! types with keyword hints, level thresholds, badge rules, client cases,
//! LLM system prompts, and user-facing message templates. It is parsed and
//! validated once at startup; an invalid scenario refuses to start the
//! process rather than failing mid-conversation.

use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;

/// Root scenario document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Identifier for this bot (session isolation key).
    pub bot_name: String,
    pub game_rules: GameRules,
    /// Turn types the classifier can assign, in scoring priority order.
    pub turn_types: Vec<TurnType>,
    /// Level thresholds, ascending by min_xp. Level 1 must start at 0 XP.
    pub levels: Vec<LevelThreshold>,
    #[serde(default)]
    pub badges: Vec<BadgeSpec>,
    /// Client cases played during runs.
    pub cases: Vec<ClientCase>,
    pub prompts: Prompts,
    pub messages: Messages,
}

/// Gameplay tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRules {
    /// Hard cap on counted turns per run.
    pub max_turns: u32,
    /// Progress needed for early completion, 0..=100.
    pub target_progress: u32,
    /// Early completion also requires at least this many turns.
    pub min_turns_for_completion: u32,
    /// Turns shorter than this (chars) are rejected before any LLM call.
    pub min_turn_length: usize,
    /// Extra XP on top of progress when a run completes.
    #[serde(default = "default_completion_bonus_xp")]
    pub completion_bonus_xp: i64,
    /// Progress bonus for a turn referencing the client's previous reply.
    #[serde(default = "default_contextual_bonus")]
    pub contextual_bonus: u32,
    #[serde(default = "default_feedback_cooldown_secs")]
    pub feedback_cooldown_secs: u64,
    #[serde(default = "default_feedback_cache_ttl_secs")]
    pub feedback_cache_ttl_secs: u64,
}

fn default_completion_bonus_xp() -> i64 {
    50
}

fn default_contextual_bonus() -> u32 {
    3
}

fn default_feedback_cooldown_secs() -> u64 {
    5
}

fn default_feedback_cache_ttl_secs() -> u64 {
    1200
}

/// A turn type the classifier can assign (e.g., situational question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnType {
    /// Stable id the classifier answers with.
    pub id: String,
    pub name: String,
    /// Keyword hints for the non-LLM fallback classifier.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Progress points this turn type earns.
    pub points: u32,
}

/// One row of the level table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelThreshold {
    pub level: i32,
    pub min_xp: i64,
}

/// A badge definition with a typed earning rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeSpec {
    /// Stable id, unique per user across bots once earned.
    pub id: String,
    pub name: String,
    pub rule: BadgeRule,
}

/// When a badge is earned. Evaluated at run finalization against lifetime
/// stats for this bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BadgeRule {
    RunsCompleted { at_least: u32 },
    ProgressReached { at_least: u32 },
    ContextualTurns { at_least: u64 },
}

/// A client case the trainee works through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCase {
    pub id: String,
    pub text: String,
}

/// System prompts per LLM task. `{case}`, `{history}`, `{turn}` and
/// `{reply}` placeholders are rendered at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompts {
    pub reply_system: String,
    pub feedback_system: String,
    pub classification_system: String,
}

/// User-facing message templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messages {
    /// Greeting at run start; `{name}` and `{case}` placeholders.
    pub greeting: String,
    /// Shown when a turn is below min_turn_length; `{min}` placeholder.
    pub turn_too_short: String,
    /// Shown when feedback is requested during cooldown.
    pub feedback_cooldown: String,
    /// Run summary; `{progress}`, `{turns}`, `{xp}` placeholders.
    pub run_summary: String,
    /// Appended to the summary on level-up; `{level}` placeholder.
    pub level_up: String,
    /// Appended per new badge; `{badge}` placeholder.
    pub badge_earned: String,
    /// Generic reply when every provider failed.
    pub providers_unavailable: String,
}

impl ScenarioConfig {
    /// Validate the document. Called once at startup; any violation is fatal.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.bot_name.trim().is_empty() {
            return Err(ScenarioError::Invalid("bot_name is empty".into()));
        }
        if self.cases.is_empty() {
            return Err(ScenarioError::Invalid("at least one case is required".into()));
        }
        if self.turn_types.is_empty() {
            return Err(ScenarioError::Invalid(
                "at least one turn type is required".into(),
            ));
        }
        let rules = &self.game_rules;
        if rules.max_turns == 0 {
            return Err(ScenarioError::Invalid("max_turns must be positive".into()));
        }
        if rules.target_progress == 0 || rules.target_progress > 100 {
            return Err(ScenarioError::Invalid(
                "target_progress must be in 1..=100".into(),
            ));
        }
        if rules.min_turns_for_completion > rules.max_turns {
            return Err(ScenarioError::Invalid(
                "min_turns_for_completion exceeds max_turns".into(),
            ));
        }
        if self.levels.is_empty() {
            return Err(ScenarioError::Invalid("level table is empty".into()));
        }
        match self.levels.first() {
            Some(first) if first.min_xp == 0 => {}
            _ => {
                return Err(ScenarioError::Invalid(
                    "first level must start at 0 XP".into(),
                ))
            }
        }
        if self.levels.windows(2).any(|w| w[1].min_xp <= w[0].min_xp) {
            return Err(ScenarioError::Invalid(
                "level thresholds must be strictly ascending".into(),
            ));
        }
        let mut type_ids: Vec<&str> = self.turn_types.iter().map(|t| t.id.as_str()).collect();
        type_ids.sort_unstable();
        if type_ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(ScenarioError::Invalid("duplicate turn type id".into()));
        }
        let mut badge_ids: Vec<&str> = self.badges.iter().map(|b| b.id.as_str()).collect();
        badge_ids.sort_unstable();
        if badge_ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(ScenarioError::Invalid("duplicate badge id".into()));
        }
        Ok(())
    }

    pub fn turn_type(&self, id: &str) -> Option<&TurnType> {
        self.turn_types.iter().find(|t| t.id == id)
    }
}

/// Render a `{placeholder}` template. Unknown placeholders are left as-is.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
