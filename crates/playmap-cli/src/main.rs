use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use playmap_storage::{PgStore, Stores};
use playmap_sync::{SyncConfig, SyncService};

#[derive(Debug, Parser)]
#[command(name = "playmap-cli")]
#[command(about = "Playmap command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one collection sweep over every registered source.
    Collect,
    /// Recompute popularity scores and district display eligibility.
    Score,
    /// Promote trusted-source records and deactivate stale ones.
    Lifecycle,
    /// Apply pending database migrations.
    Migrate,
    /// Serve the JSON API (with the cron scheduler if enabled).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Collect => {
            let service = connect_service(&config).await?;
            let logs = service.collect_once().await?;
            for log in logs {
                println!(
                    "{}: fetched={} new={} duplicates={} errors={} status={:?}",
                    log.collector, log.fetched, log.new_records, log.duplicates, log.errors, log.status
                );
            }
        }
        Commands::Score => {
            let service = connect_service(&config).await?;
            let summary = service.score_once().await?;
            println!("scored {} places", summary.scored);
        }
        Commands::Lifecycle => {
            let service = connect_service(&config).await?;
            let summary = service.lifecycle_once().await?;
            println!(
                "lifecycle pass: promoted={} deactivated={}",
                summary.promoted, summary.deactivated
            );
        }
        Commands::Migrate => {
            let pool = connect_pool(&config).await?;
            PgStore::new(pool).migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let service = Arc::new(connect_service(&config).await?);
            if let Some(scheduler) = service.maybe_build_scheduler().await? {
                scheduler.start().await.context("starting scheduler")?;
            }
            playmap_web::serve_from_env(service.stores().clone()).await?;
        }
    }

    Ok(())
}

async fn connect_pool(config: &SyncConfig) -> Result<sqlx::PgPool> {
    sqlx::PgPool::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))
}

async fn connect_service(config: &SyncConfig) -> Result<SyncService> {
    let pool = connect_pool(config).await?;
    SyncService::new(config.clone(), Stores::postgres(pool))
}
