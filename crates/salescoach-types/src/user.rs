use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A trainee identity shared by every training bot.
///
/// Users are keyed by an external messenger/platform id. Experience and
/// level are cross-bot; per-bot run state lives in [`crate::session::BotSession`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Stable identifier from the chat platform (unique).
    pub external_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Lifetime experience points across all bots.
    pub total_xp: i64,
    /// Current level, derived from total_xp via the scenario level table.
    pub level: i32,
    pub registered_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Display fields supplied when a user first appears or updates their profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    pub fn new(external_id: impl Into<String>, profile: UserProfile) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            external_id: external_id.into(),
            username: profile.username,
            first_name: profile.first_name,
            last_name: profile.last_name,
            total_xp: 0,
            level: 1,
            registered_at: now,
            last_active_at: now,
        }
    }

    /// Best available display name for message templates.
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("trainee")
    }
}

/// A badge earned by a user. Unique per (user, badge_type) across all bots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub badge_type: String,
    /// The bot in which the badge was first earned.
    pub earned_in_bot: String,
    pub metadata: Option<serde_json::Value>,
    pub earned_at: DateTime<Utc>,
}
