//! Security audit events for authentication flows
//!
//! The orchestrator never writes to ambient logging context. Each notable
//! outcome becomes a discrete [`AuditEvent`] handed to an injected
//! [`AuditSink`], and the sink decides where it goes:
//!
//! - [`TracingAuditSink`] emits the event at INFO level on the `audit` target,
//!   so operators can route it separately from application logs.
//! - [`MemoryAuditSink`] keeps events in memory for assertions in tests.
//!
//! Events never carry credential hashes, raw passwords or token strings.
//!
//! Author: hephaex@gmail.com

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// Kind of security-relevant outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    RegistrationSuccess,
    RegistrationFailure,
    LoginSuccess,
    LoginFailure,
    AccountLocked,
    TokenRefresh,
    /// A refresh token was presented after it had already been redeemed
    RefreshTokenReuse,
    Logout,
    InvalidToken,
    RateLimitExceeded,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationSuccess => "registration_success",
            Self::RegistrationFailure => "registration_failure",
            Self::LoginSuccess => "login_success",
            Self::LoginFailure => "login_failure",
            Self::AccountLocked => "account_locked",
            Self::TokenRefresh => "token_refresh",
            Self::RefreshTokenReuse => "refresh_token_reuse",
            Self::Logout => "logout",
            Self::InvalidToken => "invalid_token",
            Self::RateLimitExceeded => "rate_limit_exceeded",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            Self::RegistrationSuccess => "Registration successful",
            Self::RegistrationFailure => "Registration failed",
            Self::LoginSuccess => "Login successful",
            Self::LoginFailure => "Login failed",
            Self::AccountLocked => "Account locked",
            Self::TokenRefresh => "Token refresh",
            Self::RefreshTokenReuse => "Refresh token reuse",
            Self::Logout => "User logout",
            Self::InvalidToken => "Invalid token",
            Self::RateLimitExceeded => "Rate limit exceeded",
        }
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one security-relevant outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    /// Login handle or user id of whoever the event concerns, when known
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Short free-form detail such as a failure reason
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            actor: None,
            ip_address: None,
            user_agent: None,
            timestamp,
            detail: None,
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Copy client address and user agent from the request context
    pub fn context(mut self, ctx: &crate::RequestContext) -> Self {
        self.ip_address = ctx.ip_address.clone();
        self.user_agent = ctx.user_agent.clone();
        self
    }
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events through `tracing` on the `audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let event_json = serde_json::to_string(&event)
            .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

        info!(
            target: "audit",
            timestamp = %event.timestamp,
            event_type = %event.kind,
            event = %event_json,
            actor = ?event.actor,
            ip_address = ?event.ip_address,
            detail = ?event.detail,
            "{}",
            event.kind.summary()
        );
    }
}

/// Collects audit events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestContext;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(AuditEventKind::LoginSuccess, Utc::now())
            .actor("test@example.com")
            .context(&RequestContext::new("192.168.1.1").with_user_agent("Mozilla/5.0"));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("login_success"));
        assert!(json.contains("test@example.com"));
        assert!(json.contains("192.168.1.1"));
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingAuditSink.record(
            AuditEvent::new(AuditEventKind::LoginFailure, Utc::now())
                .actor("test@example.com")
                .detail("invalid_credentials"),
        );
    }

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditEventKind::RegistrationSuccess, Utc::now()));
        sink.record(AuditEvent::new(AuditEventKind::LoginSuccess, Utc::now()));
        sink.record(AuditEvent::new(AuditEventKind::LoginSuccess, Utc::now()));

        assert_eq!(
            sink.kinds(),
            vec![
                AuditEventKind::RegistrationSuccess,
                AuditEventKind::LoginSuccess,
                AuditEventKind::LoginSuccess
            ]
        );
        assert_eq!(sink.count(AuditEventKind::LoginSuccess), 2);
        assert_eq!(sink.count(AuditEventKind::Logout), 0);
    }
}
