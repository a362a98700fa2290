use std::net::SocketAddr;
use std::sync::Arc;

use blaster_core::config::BlasterConfig;
use blaster_delivery::{
    AttachmentResolver, DeliveryExecutor, DeliveryWorker, FsStorage, HttpTransport, TransportSlot,
};
use blaster_scheduler::{JobScheduler, JobStore, ResultReporter, SqliteJobStore};
use clap::Parser;
use tracing::{info, warn};

mod app;
mod http;
mod ws;

#[derive(Parser)]
#[command(name = "blaster-gateway", version, about = "Scheduled WhatsApp broadcast delivery")]
struct Cli {
    /// Path to blaster.toml (falls back to $BLASTER_CONFIG, then ~/.blaster/blaster.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "blaster_gateway=info,blaster_scheduler=info,blaster_delivery=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > BLASTER_CONFIG env > ~/.blaster/blaster.toml
    let config_path = cli.config.or_else(|| std::env::var("BLASTER_CONFIG").ok());
    let config = BlasterConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        BlasterConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db)?);

    std::fs::create_dir_all(&config.storage.root)?;
    let storage = Arc::new(FsStorage::new(&config.storage.root));

    let transport = TransportSlot::empty();
    match &config.transport {
        Some(cfg) => match HttpTransport::new(cfg) {
            Ok(client) => transport.set(Arc::new(client)),
            Err(e) => warn!(error = %e, "transport client could not be built; jobs will fail"),
        },
        None => warn!("no [transport] configured; jobs will fail until one is"),
    }

    let broadcaster = Arc::new(ws::broadcast::EventBroadcaster::new());
    let reporter = Arc::new(ResultReporter::new(store.clone(), broadcaster.clone()));

    // fired-job queue: scheduler timers → single delivery worker
    let (fired_tx, fired_rx) = tokio::sync::mpsc::channel(config.scheduler.queue_capacity.max(1));
    let sweeper = Arc::new(AttachmentResolver::new(storage.clone()));
    let scheduler = Arc::new(
        JobScheduler::new(
            store.clone(),
            reporter.clone(),
            app::grace(&config),
            fired_tx,
        )
        .with_sweeper(sweeper),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let executor = DeliveryExecutor::assemble(
        transport.clone(),
        storage,
        blaster_core::PhoneRules::new(&config.phone),
        config.throttle.clone(),
    )
    .with_shutdown(shutdown_rx.clone());
    let worker = DeliveryWorker::new(store.clone(), scheduler.clone(), reporter, executor);
    let worker_handle = tokio::spawn(worker.run(fired_rx, shutdown_rx));

    let recovery = scheduler.recover_pending()?;
    info!(
        armed = recovery.armed,
        missed = recovery.missed,
        "scheduler ready"
    );

    let state = Arc::new(app::AppState::new(
        config,
        store,
        scheduler.clone(),
        broadcaster,
        transport,
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Blaster gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop timers first so nothing new is queued; the running job skips its
    // remaining pauses and records a partial result
    scheduler.shutdown();
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "delivery worker ended abnormally");
    }
    info!("Blaster gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
