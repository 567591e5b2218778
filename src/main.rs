use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use autodm::config::Config;
use autodm::db::DeliveryLog;
use autodm::dispatch::graph::GraphDispatcher;
use autodm::web::AppState;

/// Error recorded for reservations left `queued` by a previous process.
const ABANDONED_AT_EXIT: &str = "abandoned: process exited before dispatch";

/// autodm: automatic DMs for Instagram comments.
///
/// Receives comment webhooks, matches keywords and sends each commenter one
/// private message per post.
#[derive(Parser)]
#[command(name = "autodm", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the delivery log database
    Init,

    /// Run the webhook server and delivery worker
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (overrides BIND)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show delivery counts and recent deliveries
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("autodm=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing autodm database...");
            let config = Config::load()?;
            let db = init_database(&config).await?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_display());
            println!("Tables created: {table_count}");
            println!("\nautodm is ready. Next step: set up your .env file");
            println!("  (see .env.example for required variables)");
            println!("\nThen run: cargo run -- serve");
        }

        Commands::Serve { port, bind } => {
            let mut config = Config::load()?;
            config.require_serve()?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind = bind;
            }
            serve(config).await?;
        }

        Commands::Status => {
            let config = Config::load()?;
            if !config.uses_postgres() && autodm::status::report_missing_sqlite(&config.db_path) {
                return Ok(());
            }
            let db = open_database(&config).await?;
            autodm::status::show(&db, &config.db_display()).await?;
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let db = init_database(&config).await?;

    let recovered = db.abandon_queued(ABANDONED_AT_EXIT).await?;
    if recovered > 0 {
        warn!(recovered, "Marked leftover queued deliveries from a previous run as failed");
    }

    if config.pipeline.keywords.is_empty() {
        warn!("KEYWORDS is empty, no comment will trigger a DM");
    }

    let dispatcher = Arc::new(GraphDispatcher::new(&config.pipeline)?);
    let shutdown = CancellationToken::new();
    let (pipeline, worker) = autodm::pipeline::start(
        &config.pipeline,
        config.queue_capacity,
        db.clone(),
        dispatcher,
        shutdown.clone(),
    );

    info!(
        keywords = ?pipeline.keywords(),
        delay_secs = config.pipeline.pre_send_delay.as_secs(),
        max_retries = config.pipeline.max_retries,
        queue_capacity = config.queue_capacity,
        "Pipeline started"
    );
    println!(
        "{}",
        format!(
            "autodm serving on {}:{} ({})",
            config.bind,
            config.port,
            config.db_display()
        )
        .bold()
    );

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let state = AppState {
        pipeline,
        log: db,
        config: Arc::new(config),
    };
    let server_result = autodm::web::run_server(state, shutdown.clone()).await;
    if let Err(e) = &server_result {
        error!(error = %e, "Webhook server exited with error");
    }
    // Server gone (signal or bind failure): stop the worker too
    shutdown.cancel();

    match worker.await {
        Ok(summary) => info!(
            delivered = summary.delivered,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "Shutdown complete"
        ),
        Err(e) => error!(error = %e, "Delivery worker panicked"),
    }

    server_result
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => return,
    }
    info!("Shutdown signal received, draining");
    shutdown.cancel();
}

/// Open an existing database.
async fn open_database(config: &Config) -> Result<Arc<dyn DeliveryLog>> {
    select_database(config, open_sqlite).await
}

/// Initialize the database (create if needed).
async fn init_database(config: &Config) -> Result<Arc<dyn DeliveryLog>> {
    select_database(config, initialize_sqlite).await
}

/// Connect to PostgreSQL when DATABASE_URL names it, otherwise hand the
/// config to the given SQLite opener.
async fn select_database(
    config: &Config,
    sqlite: fn(&Config) -> Result<Arc<dyn DeliveryLog>>,
) -> Result<Arc<dyn DeliveryLog>> {
    if let Some(ref url) = config.database_url {
        if config.uses_postgres() {
            #[cfg(feature = "postgres")]
            {
                info!("Using PostgreSQL backend");
                return autodm::db::connect_postgres(url).await;
            }
            #[cfg(not(feature = "postgres"))]
            {
                let _ = url;
                anyhow::bail!(
                    "DATABASE_URL points to PostgreSQL but the 'postgres' feature is not compiled in.\n\
                     Rebuild with: cargo build --features postgres"
                );
            }
        }
    }
    sqlite(config)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &Config) -> Result<Arc<dyn DeliveryLog>> {
    autodm::db::open_sqlite(&config.db_path)
}

#[cfg(feature = "sqlite")]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn DeliveryLog>> {
    autodm::db::initialize_sqlite(&config.db_path)
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &Config) -> Result<Arc<dyn DeliveryLog>> {
    anyhow::bail!("Built without the 'sqlite' feature; set DATABASE_URL to a postgres:// URL")
}

#[cfg(not(feature = "sqlite"))]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn DeliveryLog>> {
    open_sqlite(config)
}
