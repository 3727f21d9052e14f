use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use salesops_storage::PgOrderStore;
use salesops_sync::SyncConfig;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "salesops-cli")]
#[command(about = "Sales-ops order reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull every provider order and reconcile it into the local table.
    Sync,
    /// Apply pending database migrations.
    Migrate,
    /// Run the JSON API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let result = salesops_sync::run_sync_once_from_env()
                .await
                .context("order sync failed")?;
            println!("{} (total={})", result.message(), result.total);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgOrderStore::connect(&config.database_url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            store.migrate().await?;
            info!("migrations complete");
        }
        Commands::Serve => {
            salesops_web::serve_from_env().await?;
        }
    }

    Ok(())
}
