//! Application state management
//!
//! Author: hephaex@gmail.com

use keystone_core::auth::{AuthDependencies, AuthService, RateLimiter};
use keystone_core::{AppConfig, AuditSink};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: Arc<dyn AuditSink>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Wire the service graph from configuration and storage collaborators
    pub fn new(config: AppConfig, deps: AuthDependencies) -> Self {
        let audit = deps.audit.clone();
        let auth = Arc::new(AuthService::new(&config, deps));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            config,
            auth,
            rate_limiter,
            audit,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
