pub mod handlers;
pub mod types;

use crate::gate::SyncGate;
use crate::repository::Database;
use crate::sync::SyncEngine;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: Arc<SyncEngine>,
    pub gate: Arc<SyncGate>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/holders", get(handlers::get_holders))
        .route("/sync", post(handlers::trigger_sync))
        .route("/sync/status", get(handlers::sync_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
