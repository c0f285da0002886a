//! # Sitewatch Server
//!
//! Website audit service: scans are accepted over HTTP, analyzed on a
//! bounded worker pool and folded into deduplicated issues and a per-project
//! severity snapshot.
//!
//! Storage is PostgreSQL when `DATABASE_URL` is configured and an in-memory
//! store otherwise.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use sitewatch_config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings};
use sitewatch_core::{
    AnalyzerRegistry, AuditStore, HttpReachabilityProbe, InMemoryAuditStore,
    PostgresAuditStore, ScanOrchestrator,
};
use sitewatch_server::{AppState, create_router};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "sitewatch-server")]
#[command(about = "Website audit service with deduplicated issue tracking")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to sitewatch.toml (overrides discovery)
    #[arg(short, long, env = "SITEWATCH_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;

    match cli.command {
        Some(Command::Migrate) => run_migrate(&config).await,
        None => run_server(config).await,
    }
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Scan outcomes stay visible; override via RUST_LOG.
                "info,scan::orchestrator=info,scan::coordinator=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    log_warnings(&warnings);
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    Ok(config)
}

fn log_warnings(warnings: &ConfigWarnings) {
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

async fn connect_postgres(url: &str) -> anyhow::Result<PostgresAuditStore> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;
    Ok(PostgresAuditStore::new(pool))
}

async fn run_migrate(config: &Config) -> anyhow::Result<()> {
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be set to run migrations")?;
    let store = connect_postgres(url).await?;
    store.migrate().await.context("database migration failed")?;
    info!("Database migrations applied");
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("sitewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let registry = AnalyzerRegistry::from_config(&config.analyzers, client.clone())
        .context("invalid analyzer configuration")?;
    let probe = HttpReachabilityProbe::new(client, config.orchestrator.reachability_timeout());

    match config.database.url.clone() {
        Some(url) => {
            let store = connect_postgres(&url).await?;
            store.migrate().await.context("database migration failed")?;
            info!("Using PostgreSQL audit store");
            serve(config, Arc::new(store), registry, probe).await
        }
        None => {
            warn!("DATABASE_URL not set; results are kept in memory and lost on restart");
            serve(config, Arc::new(InMemoryAuditStore::new()), registry, probe).await
        }
    }
}

async fn serve<S: AuditStore>(
    config: Config,
    store: Arc<S>,
    registry: AnalyzerRegistry,
    probe: HttpReachabilityProbe,
) -> anyhow::Result<()> {
    let orchestrator = Arc::new(ScanOrchestrator::start(
        config.orchestrator.clone(),
        store,
        registry,
        Arc::new(probe),
    ));

    let router = create_router(AppState::new(Arc::clone(&orchestrator)))
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining scan workers");
    orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}
