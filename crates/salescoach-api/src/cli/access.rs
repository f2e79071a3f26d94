//! `scoach access` administrative commands.

use std::path::Path;

use chrono::{Duration, Utc};

use salescoach_core::store::{AccessStore, UserStore};
use salescoach_infra::config::AppConfig;
use salescoach_infra::sqlite::pool::DatabasePool;
use salescoach_infra::sqlite::{SqliteAccessStore, SqliteUserStore};
use salescoach_types::access::{AccessCheck, GrantKind, GrantSource};
use salescoach_types::user::UserProfile;

/// Grant access to a user identified by external id.
pub async fn grant_access(
    config_path: &Path,
    external_id: &str,
    kind: GrantKind,
    amount: Option<i64>,
    days: Option<i64>,
) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).await?;
    let pool = DatabasePool::new(&config.database.url_or_default()).await?;
    let users = SqliteUserStore::new(pool.clone());
    let access = SqliteAccessStore::new(pool.clone());

    let user = users
        .get_or_create(external_id, &UserProfile::default())
        .await?;

    let grant = match kind {
        GrantKind::Subscription => {
            let days = days.ok_or_else(|| anyhow::anyhow!("--days is required for subscription"))?;
            if days <= 0 {
                anyhow::bail!("--days must be positive");
            }
            access
                .grant_subscription(&user.id, GrantSource::Admin, Utc::now() + Duration::days(days))
                .await?
        }
        GrantKind::Credits => {
            let amount = amount.ok_or_else(|| anyhow::anyhow!("--amount is required for credits"))?;
            if amount <= 0 {
                anyhow::bail!("--amount must be positive");
            }
            access.grant_credits(&user.id, GrantSource::Admin, amount).await?
        }
        GrantKind::FreeTrial => {
            let amount =
                amount.ok_or_else(|| anyhow::anyhow!("--amount is required for free_trial"))?;
            if amount <= 0 {
                anyhow::bail!("--amount must be positive");
            }
            access
                .grant_free_trials(&user.id, GrantSource::Admin, amount)
                .await?
        }
    };

    println!("Granted {} to '{external_id}' (grant {})", grant.kind, grant.id);
    if let Some(exp) = grant.expires_at {
        println!("  expires: {}", exp.to_rfc3339());
    }
    if let Some(left) = grant.credits_left {
        println!("  counter: {left}");
    }

    pool.close().await;
    Ok(())
}

/// Print a user's current access level and their grant history.
pub async fn check_access(config_path: &Path, external_id: &str) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).await?;
    let pool = DatabasePool::new(&config.database.url_or_default()).await?;
    let users = SqliteUserStore::new(pool.clone());
    let access = SqliteAccessStore::new(pool.clone());

    let Some(user) = users.get_by_external_id(external_id).await? else {
        println!("No user found for '{external_id}'");
        pool.close().await;
        return Ok(());
    };

    match access.check(&user.id).await? {
        AccessCheck::Subscription { expires_at } => {
            println!("subscription active until {}", expires_at.to_rfc3339());
        }
        AccessCheck::Credits { remaining } => println!("credits: {remaining}"),
        AccessCheck::FreeTrial { remaining } => println!("free trials: {remaining}"),
        AccessCheck::None => println!("no access"),
    }

    for grant in access.list(&user.id).await? {
        println!(
            "  {} {} source={} revoked={} left={:?}",
            grant.created_at.to_rfc3339(),
            grant.kind,
            grant.source,
            grant.revoked,
            grant.credits_left,
        );
    }

    pool.close().await;
    Ok(())
}
