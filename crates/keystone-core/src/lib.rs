//! Keystone Core - authentication and token lifecycle
//!
//! This crate holds everything that decides whether a caller is who they
//! claim to be and whether they may obtain new credentials:
//! - Password policy evaluation and credential hashing
//! - Signed access/refresh token issuance and verification
//! - Refresh-token persistence with single-use rotation
//! - Access-token blacklist for logout
//! - Per-client, per-endpoint token-bucket admission control
//! - The orchestrating service behind register/login/refresh/logout/me
//! - Configuration, clock and audit abstractions shared by the binaries
//!
//! Transport concerns (routing, JSON shapes, status codes) live in
//! `keystone-api`.

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;

pub use audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, SystemClock};
pub use config::{
    AppConfig, ConfigError, DatabaseBackend, DatabaseConfig, EndpointLimitConfig, JwtSettings,
    LockoutConfig, LoggingConfig, RateLimitConfig, ServerConfig,
};
pub use error::{AuthError, RefreshTokenFailure, Result};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;

/// Request-scoped facts about the caller that flow explicitly through the
/// orchestrator (no thread-local or global request state).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Resolved client identifier (IP address or `"unknown"`)
    pub ip_address: Option<String>,
    /// Raw `User-Agent` header, if any
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}
