//! Keystone API Server
//!
//! Configuration comes from the TOML file named by `KEYSTONE_CONFIG` (if set)
//! overlaid with environment variables.
//!
//! Author: hephaex@gmail.com

use keystone_api::{create_router, state::AppState, tasks::spawn_purge_task};
use keystone_core::auth::{postgres, Argon2Hasher, AuthDependencies, PasswordConfig};
use keystone_core::{AppConfig, DatabaseBackend, LoggingConfig, SystemClock, TracingAuditSink};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "keystone_api={level},keystone_core={level},audit=info,tower_http=info",
            level = logging.level
        )
        .into()
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::load(std::env::var_os("KEYSTONE_CONFIG").map(PathBuf::from))?;
    init_tracing(&config.logging);

    if config.uses_development_secret() {
        tracing::warn!("JWT_SECRET not set; using the development signing secret");
    }

    let hasher = Arc::new(Argon2Hasher::new(PasswordConfig::default()));
    let audit = Arc::new(TracingAuditSink);
    let clock = Arc::new(SystemClock);

    let deps = match config.database.backend {
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory storage; accounts and tokens are lost on restart");
            AuthDependencies::in_memory(hasher, audit, clock)
        }
        DatabaseBackend::Postgres => {
            let pool = postgres::connect(&config.database).await?;
            postgres::ensure_schema(&pool).await?;
            tracing::info!("Connected to PostgreSQL");
            AuthDependencies::postgres(pool, hasher, audit, clock)
        }
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let purge_every = Duration::from_secs(config.server.purge_interval_secs.max(1));

    // Create application state
    let state = Arc::new(AppState::new(config, deps));
    let purge_task = spawn_purge_task(state.clone(), purge_every);

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Keystone API Server starting on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await?;

    purge_task.abort();
    Ok(())
}
