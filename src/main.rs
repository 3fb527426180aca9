use anyhow::Result;
use holder_ledger::api::{self, AppState};
use holder_ledger::config::Config;
use holder_ledger::gate::SyncGate;
use holder_ledger::reconcile::Reconciler;
use holder_ledger::repository::Database;
use holder_ledger::resolver::BalanceResolver;
use holder_ledger::scheduler::{self, Schedules};
use holder_ledger::source;
use holder_ledger::sync::SyncEngine;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    info!("Starting token holder ledger");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("Token address: {:?}", config.token_address);
    info!("Data source: {:?}", config.source_kind);

    let db = Database::new(&config.database_url)?;
    info!("Database initialized");

    let chain = source::from_config(&config)?;
    let gate = Arc::new(SyncGate::new());

    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&chain),
        db.clone(),
        Arc::clone(&gate),
        config.sync.clone(),
    ));
    let resolver = BalanceResolver::new(Arc::clone(&chain), config.resolver.clone());
    let reconciler = Arc::new(Reconciler::new(resolver, db.clone(), Arc::clone(&gate)));

    scheduler::spawn(
        Arc::clone(&engine),
        reconciler,
        Schedules {
            sync_interval: config.sync_interval,
            reconcile_interval: config.reconcile_interval,
        },
    );
    info!(
        "Schedulers started (sync every {:?}, reconcile every {:?})",
        config.sync_interval, config.reconcile_interval
    );

    let state = AppState { db, engine, gate };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
