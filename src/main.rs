use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use tenantd::{
    background::{self, BackgroundCoordinator},
    config::{self, PlatformConfig},
    db::{self, pool::DbPool},
    lifecycle::{Operation, ReconciliationEngine},
    runtime::{ContainerRuntime, DockerRuntime, InMemoryRuntime},
    state::AppState,
    store::SqliteTenantStore,
    tenant::{register, NewTenant},
};
use tracing::info;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tenantd", about = "Tenant container lifecycle manager", version)]
struct Cli {
    /// Path to TOML config file
    #[arg(short, long, default_value = "platform.toml")]
    config: String,

    /// Container engine to drive
    #[arg(long, value_enum, default_value_t = RuntimeKind::Docker, global = true)]
    runtime: RuntimeKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeKind {
    Docker,
    /// In-process engine; nothing touches the host
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server and the background sync sweep
    Serve,
    /// Apply database migrations
    Migrate,
    /// Register a tenant
    Register {
        #[arg(long)]
        subdomain: Option<String>,
        #[arg(long, default_value = "basic")]
        plan: String,
        #[arg(long)]
        tenant_id: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
    /// Run one lifecycle operation and print the result envelope
    Run {
        /// recreate, sync, restart, start, stop or delete
        operation: Operation,
        tenant_id: String,
    },
    /// Show one tenant
    Status { tenant_id: String },
    /// List all tenants
    List,
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging from RUST_LOG (default: info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenantd=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(cfg, cli.runtime).await,
        Commands::Migrate => {
            open_db(&cfg, 1)?;
            info!("Database migrations applied");
            Ok(())
        }
        Commands::Register {
            subdomain,
            plan,
            tenant_id,
            image,
        } => {
            let engine = build_engine(&cfg, cli.runtime, 1)?;
            let request = NewTenant {
                tenant_id,
                subdomain,
                plan: Some(plan),
                image,
            };
            let tenant = register(engine.store().as_ref(), &cfg, request)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            print_json(&engine.status(&tenant.tenant_id)?)
        }
        Commands::Run {
            operation,
            tenant_id,
        } => {
            let engine = build_engine(&cfg, cli.runtime, 1)?;
            let envelope = engine.run(operation, &tenant_id).await;
            print_json(&envelope)?;
            if !envelope.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Status { tenant_id } => {
            let engine = build_engine(&cfg, cli.runtime, 1)?;
            let view = engine
                .status(&tenant_id)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            print_json(&view)
        }
        Commands::List => {
            let engine = build_engine(&cfg, cli.runtime, 1)?;
            print_json(&engine.list()?)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Wiring ─────────────────────────────────────────────────────────────────

fn open_db(cfg: &PlatformConfig, readers: usize) -> anyhow::Result<DbPool> {
    if let Some(parent) = cfg.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create db dir: {}", parent.display()))?;
        }
    }
    let db_path = cfg
        .database_path
        .to_str()
        .context("database_path is not valid UTF-8")?;
    let db = DbPool::open(db_path, readers).context("failed to open database")?;
    db::run_migrations(&db).context("failed to run database migrations")?;
    Ok(db)
}

fn build_engine(
    cfg: &PlatformConfig,
    kind: RuntimeKind,
    readers: usize,
) -> anyhow::Result<ReconciliationEngine> {
    let db = open_db(cfg, readers)?;
    let store = Arc::new(SqliteTenantStore::new(Arc::new(db), cfg.ports.clone()));
    let runtime: Arc<dyn ContainerRuntime> = match kind {
        RuntimeKind::Docker => Arc::new(
            DockerRuntime::new(cfg.runtime.call_timeout(), cfg.runtime.stop_grace_secs)
                .with_binary(&cfg.runtime.binary),
        ),
        RuntimeKind::Memory => Arc::new(InMemoryRuntime::new()),
    };
    Ok(ReconciliationEngine::from_config(runtime, store, cfg))
}

// ── Serve ──────────────────────────────────────────────────────────────────

async fn serve(cfg: PlatformConfig, kind: RuntimeKind) -> anyhow::Result<()> {
    info!("Opening database (4 reader connections)...");
    let engine = Arc::new(build_engine(&cfg, kind, 4)?);

    match engine.ping_runtime().await {
        Ok(()) => info!("Container runtime '{}' is reachable", engine.runtime_name()),
        Err(e) => tracing::warn!(
            "Container runtime '{}' check failed: {}; operations will fail until it is available",
            engine.runtime_name(),
            e
        ),
    }

    let state = AppState::new(cfg.clone(), engine.clone());

    // Background task coordinator
    let coordinator = BackgroundCoordinator::new();

    let sweep_engine = engine.clone();
    let every = cfg.sync_interval();
    coordinator.spawn("sync_sweeper", move |shutdown_rx| {
        background::sync_sweeper::run(sweep_engine, every, shutdown_rx)
    });
    info!(
        "Background: sync sweeper started ({}s interval)",
        every.as_secs()
    );

    let app = tenantd::routes::app(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid bind address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Let an in-flight sweep finish before the runtime goes away
    coordinator.shutdown().await;
    info!("Background tasks stopped.");

    info!("Server stopped.");
    Ok(())
}

// ── Graceful shutdown ──────────────────────────────────────────────────────

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping server...");
}
