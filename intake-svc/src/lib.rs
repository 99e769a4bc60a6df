//! intake-svc library interface
//!
//! Document intake orchestrator plus its HTTP/SSE surface. Exposes public
//! APIs for integration testing.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult, IntakeError, IntakeResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use intake_common::events::EventBus;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::IntakeConfig;
use crate::services::IntakeOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<IntakeOrchestrator>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub config: Arc<IntakeConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<IntakeOrchestrator>, config: IntakeConfig) -> Self {
        Self {
            event_bus: orchestrator.event_bus().clone(),
            orchestrator,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Upload bodies are not capped as a whole; the batch handler streams each
/// part and stops buffering a file once it exceeds the policy's size limit.
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::intake_routes())
        .route("/intake/events", get(api::intake_event_stream))
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
