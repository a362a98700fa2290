use axum::{
    routing::{get, post},
    Router,
};
use blaster_core::{config::BlasterConfig, PhoneRules};
use blaster_delivery::TransportSlot;
use blaster_scheduler::{JobScheduler, JobStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::ws::broadcast::EventBroadcaster;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: BlasterConfig,
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<JobScheduler>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub transport: TransportSlot,
    pub phone: PhoneRules,
    /// Active WS connections: conn_id -> connected at.
    pub ws_clients: DashMap<String, DateTime<Utc>>,
}

impl AppState {
    pub fn new(
        config: BlasterConfig,
        store: Arc<dyn JobStore>,
        scheduler: Arc<JobScheduler>,
        broadcaster: Arc<EventBroadcaster>,
        transport: TransportSlot,
    ) -> Self {
        let phone = PhoneRules::new(&config.phone);
        Self {
            config,
            store,
            scheduler,
            broadcaster,
            transport,
            phone,
            ws_clients: DashMap::new(),
        }
    }

    /// How far in the past a schedule may lie and still be accepted.
    pub fn grace(&self) -> chrono::Duration {
        grace(&self.config)
    }
}

pub fn grace(config: &BlasterConfig) -> chrono::Duration {
    chrono::Duration::seconds(config.scheduler.grace_secs as i64)
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/jobs",
            get(crate::http::jobs::list_jobs).post(crate::http::jobs::create_job),
        )
        .route(
            "/jobs/{id}",
            get(crate::http::jobs::get_job).put(crate::http::jobs::edit_job),
        )
        .route("/jobs/{id}/cancel", post(crate::http::jobs::cancel_job))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
