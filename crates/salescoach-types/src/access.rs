use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of access a grant provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Time-window subscription; unlimited runs while active.
    Subscription,
    /// Purchased training credits, decremented per run.
    Credits,
    /// Free trial counter, decremented per run.
    FreeTrial,
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantKind::Subscription => write!(f, "subscription"),
            GrantKind::Credits => write!(f, "credits"),
            GrantKind::FreeTrial => write!(f, "free_trial"),
        }
    }
}

impl FromStr for GrantKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subscription" => Ok(GrantKind::Subscription),
            "credits" => Ok(GrantKind::Credits),
            "free_trial" => Ok(GrantKind::FreeTrial),
            other => Err(format!("invalid grant kind: '{other}'")),
        }
    }
}

/// Where a grant came from (audit trail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Admin,
    PromoCode,
    Signup,
}

impl fmt::Display for GrantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantSource::Admin => write!(f, "admin"),
            GrantSource::PromoCode => write!(f, "promo_code"),
            GrantSource::Signup => write!(f, "signup"),
        }
    }
}

impl FromStr for GrantSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(GrantSource::Admin),
            "promo_code" => Ok(GrantSource::PromoCode),
            "signup" => Ok(GrantSource::Signup),
            other => Err(format!("invalid grant source: '{other}'")),
        }
    }
}

/// An access grant row. Grants are audit records; they are revoked or
/// drained, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: GrantKind,
    pub source: GrantSource,
    pub starts_at: DateTime<Utc>,
    /// Subscription end; None for counted grants.
    pub expires_at: Option<DateTime<Utc>>,
    /// Initial counter for counted grants; None for subscriptions.
    pub credits_total: Option<i64>,
    /// Remaining counter for counted grants; never negative.
    pub credits_left: Option<i64>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of an access check, in priority order: an active subscription wins
/// over credits, credits win over the free trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessCheck {
    Subscription { expires_at: DateTime<Utc> },
    Credits { remaining: i64 },
    FreeTrial { remaining: i64 },
    None,
}

impl AccessCheck {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AccessCheck::None)
    }
}
