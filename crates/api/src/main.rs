//! GARL reputation ledger API server.
//!
//! This binary provides:
//! - The HTTP intake and query surface (`serve`, the default)
//! - Database initialization (`init-db`)
//! - Signing key generation (`keygen`)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use garl_api::config::RuntimeConfig;
use garl_api::server;

#[derive(Parser)]
#[command(name = "garl-api")]
#[command(version, about = "GARL reputation ledger API server", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server (default)
    Serve,

    /// Initialize the database and run migrations
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://garl.db")]
        database_url: String,
    },

    /// Generate a fresh signing key and print it as hex
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
        Commands::Keygen => keygen(),
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("garl_api=debug,garl_storage=debug,tower_http=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("garl_api=info,garl_storage=info,tower_http=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(())
}

async fn serve() -> Result<()> {
    info!("GARL ledger starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    server::run_with_config(config).await
}

async fn init_database(database_url: &str) -> Result<()> {
    use garl_storage::Storage;

    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Agents: {}", stats.agent_count);
    info!("  Traces: {}", stats.trace_count);
    info!("  Endorsements: {}", stats.endorsement_count);

    storage.close().await;

    Ok(())
}

fn keygen() {
    let (signer, private_hex) = garl_core::Signer::generate();
    println!("SIGNING_PRIVATE_KEY_HEX={private_hex}");
    println!("public_key={}", signer.public_key_hex());
}
