//! Bearer-token authentication middleware
//!
//! Resolves the `Authorization` header through the request authenticator
//! and inserts the resulting [`AuthenticatedUser`] into the request
//! extensions, where handlers pick it up with `Extension<AuthenticatedUser>`.
//!
//! Author: hephaex@gmail.com

use crate::audit::request_context;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use keystone_core::auth::AuthenticatedUser;
use std::net::SocketAddr;
use std::sync::Arc;

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = request_context(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let user: AuthenticatedUser = state
        .auth
        .authenticator()
        .authenticate(authorization, &ctx)
        .await
        .map_err(|e| ApiError::from(e).at(request.uri().path()))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
