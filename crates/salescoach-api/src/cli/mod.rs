//! CLI command definitions and dispatch for the `scoach` binary.
//!
//! Uses clap derive macros for argument parsing. The server runs via
//! `scoach serve`; promo codes and access grants are administered via
//! `scoach promo ...` and `scoach access ...`.

pub mod access;
pub mod promo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use salescoach_types::access::GrantKind;
use salescoach_types::promo::PromoKind;

/// Run and administer the sales-training API.
#[derive(Parser)]
#[command(name = "scoach", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the application config file.
    #[arg(long, global = true, default_value = "config.toml", env = "SALESCOACH_CONFIG")]
    pub config: PathBuf,

    /// Export spans via OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve,

    /// Promo code administration.
    Promo {
        #[command(subcommand)]
        command: PromoCommands,
    },

    /// Access grant administration.
    Access {
        #[command(subcommand)]
        command: AccessCommands,
    },
}

#[derive(Subcommand)]
pub enum PromoCommands {
    /// Create a promo code.
    Create {
        /// The code string users will redeem.
        code: String,

        /// What redeeming grants: free_trainings, subscription_days, or credits.
        #[arg(long)]
        kind: PromoKind,

        /// Run count, day count, or credit count depending on kind.
        #[arg(long)]
        value: i64,

        /// Total redemption cap across all users (unlimited when absent).
        #[arg(long)]
        max_uses: Option<i64>,

        /// Code validity window in days from now (no expiry when absent).
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum AccessCommands {
    /// Grant access to a user directly.
    Grant {
        /// The user's external (platform) id.
        external_id: String,

        /// Grant kind: subscription, credits, or free_trial.
        #[arg(long)]
        kind: GrantKind,

        /// Counter for credits / free_trial grants.
        #[arg(long)]
        amount: Option<i64>,

        /// Subscription length in days (subscription grants only).
        #[arg(long)]
        days: Option<i64>,
    },

    /// Show a user's current access level and grants.
    Check {
        /// The user's external (platform) id.
        external_id: String,
    },
}
