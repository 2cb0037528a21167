//! Rate limiting middleware for the credential endpoints
//!
//! Requests to `/auth/login`, `/auth/register` and `/auth/forgot-password`
//! draw from a token bucket per client and endpoint. Other paths pass
//! through untouched. A denied request gets `429` with `Retry-After`.
//!
//! Buckets live in this process only; several instances behind a load
//! balancer each keep their own.
//!
//! Author: hephaex@gmail.com

use crate::audit::{extract_client_id, extract_user_agent};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use keystone_core::auth::{EndpointKey, RateDecision};
use keystone_core::{AuditEvent, AuditEventKind, AuthError};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(endpoint) = EndpointKey::for_path(&path) else {
        return next.run(request).await;
    };

    let client_id = extract_client_id(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );

    match state.rate_limiter.try_acquire(&client_id, endpoint) {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Denied { retry_after_secs } => {
            warn!(
                client_id = %client_id,
                endpoint = %endpoint,
                retry_after_secs,
                "Rate limit exceeded"
            );

            let mut event = AuditEvent::new(AuditEventKind::RateLimitExceeded, Utc::now())
                .detail(format!("{endpoint}: retry after {retry_after_secs}s"));
            event.ip_address = Some(client_id);
            event.user_agent = extract_user_agent(request.headers());
            state.audit.record(event);

            ApiError::from(AuthError::RateLimited { retry_after_secs })
                .at(path)
                .into_response()
        }
    }
}
