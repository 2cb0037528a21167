//! Keystone API - HTTP surface of the authentication core
//!
//! Routes live under `/api/v1`; `/health` sits at the root. Handlers stay
//! thin and delegate every decision to `keystone-core`.

pub mod audit;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod tasks;

use axum::{middleware as axum_middleware, routing::get, Router};
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router over in-memory storage, a manual clock and cheap password hashing
#[cfg(feature = "test-utils")]
pub fn create_router_for_testing() -> Router {
    create_router(test_state())
}

/// State behind [`create_router_for_testing`]
#[cfg(feature = "test-utils")]
pub fn test_state() -> Arc<AppState> {
    use keystone_core::auth::{Argon2Hasher, AuthDependencies, PasswordConfig};
    use keystone_core::{AppConfig, ManualClock, MemoryAuditSink};

    let deps = AuthDependencies::in_memory(
        Arc::new(Argon2Hasher::new(PasswordConfig::low_cost())),
        Arc::new(MemoryAuditSink::new()),
        Arc::new(ManualClock::starting_now()),
    );
    Arc::new(AppState::new(AppConfig::default(), deps))
}
