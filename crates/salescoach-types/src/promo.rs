use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What redeeming a promo code grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    /// Adds free training runs.
    FreeTrainings,
    /// Extends or creates a subscription by N days.
    SubscriptionDays,
    /// Adds training credits.
    Credits,
}

impl fmt::Display for PromoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromoKind::FreeTrainings => write!(f, "free_trainings"),
            PromoKind::SubscriptionDays => write!(f, "subscription_days"),
            PromoKind::Credits => write!(f, "credits"),
        }
    }
}

impl FromStr for PromoKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free_trainings" => Ok(PromoKind::FreeTrainings),
            "subscription_days" => Ok(PromoKind::SubscriptionDays),
            "credits" => Ok(PromoKind::Credits),
            other => Err(format!("invalid promo kind: '{other}'")),
        }
    }
}

/// A promo code. `max_uses == None` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub kind: PromoKind,
    /// Meaning depends on kind: run count, day count, or credit count.
    pub value: i64,
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn new(
        code: impl Into<String>,
        kind: PromoKind,
        value: i64,
        max_uses: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            code: code.into(),
            kind,
            value,
            max_uses,
            current_uses: 0,
            expires_at,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a successful redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redemption {
    pub code: String,
    pub kind: PromoKind,
    pub value: i64,
}
