//! `scoach promo` administrative commands.

use std::path::Path;

use chrono::{Duration, Utc};

use salescoach_core::store::PromoStore;
use salescoach_infra::config::AppConfig;
use salescoach_infra::sqlite::pool::DatabasePool;
use salescoach_infra::sqlite::SqlitePromoStore;
use salescoach_types::promo::{PromoCode, PromoKind};

/// Create a promo code and print a short confirmation.
pub async fn create_promo(
    config_path: &Path,
    code: String,
    kind: PromoKind,
    value: i64,
    max_uses: Option<i64>,
    expires_in_days: Option<i64>,
) -> anyhow::Result<()> {
    if value <= 0 {
        anyhow::bail!("--value must be positive");
    }

    let config = AppConfig::load(config_path).await?;
    let pool = DatabasePool::new(&config.database.url_or_default()).await?;
    let store = SqlitePromoStore::new(pool.clone());

    let expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));
    let promo = PromoCode::new(code, kind, value, max_uses, expires_at);
    store.create(&promo).await?;

    println!("Created promo code '{}' ({kind}, value {value})", promo.code);
    if let Some(cap) = promo.max_uses {
        println!("  usage cap: {cap}");
    }
    if let Some(exp) = promo.expires_at {
        println!("  expires:   {}", exp.to_rfc3339());
    }

    pool.close().await;
    Ok(())
}
