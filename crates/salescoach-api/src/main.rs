//! Salescoach CLI and REST API entry point.
//!
//! Binary name: `scoach`
//!
//! Parses CLI arguments, initializes the database and services, then either
//! starts the REST API server or runs an administrative command.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{AccessCommands, Cli, Commands, PromoCommands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    salescoach_observe::tracing_setup::init_tracing(cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    match cli.command {
        Commands::Serve => {
            let config = salescoach_infra::config::AppConfig::load(&cli.config).await?;
            let state = AppState::init(&config).await?;
            let db_pool = state.db_pool.clone();

            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, bot = %state.scenario.bot_name, "Salescoach API listening");

            let router = http::router::build_router(state);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            // Flush pending SQLite writes before exit.
            db_pool.close().await;
            salescoach_observe::tracing_setup::shutdown_tracing();
        }

        Commands::Promo { command } => match command {
            PromoCommands::Create {
                code,
                kind,
                value,
                max_uses,
                expires_in_days,
            } => {
                cli::promo::create_promo(&cli.config, code, kind, value, max_uses, expires_in_days)
                    .await?;
            }
        },

        Commands::Access { command } => match command {
            AccessCommands::Grant {
                external_id,
                kind,
                amount,
                days,
            } => {
                cli::access::grant_access(&cli.config, &external_id, kind, amount, days).await?;
            }
            AccessCommands::Check { external_id } => {
                cli::access::check_access(&cli.config, &external_id).await?;
            }
        },
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
