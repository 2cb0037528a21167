//! Authentication API handlers
//!
//! Thin adapters: decode and field-validate the body, build the request
//! context, call the auth service and shape the response.
//!
//! Author: hephaex@gmail.com

use crate::audit::request_context;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use keystone_core::auth::{policy, AuthenticatedUser, RegistrationRequest};
use keystone_core::AuthError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use validator::{Validate, ValidationError, ValidationErrors};

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    #[validate(
        email(message = "must be a valid email address"),
        length(max = 100, message = "must not exceed 100 characters")
    )]
    pub email: String,
    #[validate(
        length(min = 1, max = 50, message = "must be between 1 and 50 characters"),
        custom(function = "validate_name")
    )]
    pub first_name: String,
    #[validate(
        length(min = 1, max = 50, message = "must be between 1 and 50 characters"),
        custom(function = "validate_name")
    )]
    pub last_name: String,
    pub password: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone_number: Option<String>,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginBody {
    #[validate(length(min = 1, message = "is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    #[validate(length(min = 1, message = "is required"))]
    pub refresh_token: String,
}

/// Password reset request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ForgotPasswordBody {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

/// Letters, spaces, apostrophes and hyphens
fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name
        .chars()
        .all(|c| c.is_alphabetic() || matches!(c, ' ' | '\'' | '-'))
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("name");
        err.message = Some("may only contain letters, spaces, apostrophes and hyphens".into());
        Err(err)
    }
}

/// E.164: `+` optional, then 2 to 15 digits not starting with 0
fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    let valid = (2..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0');
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("must be a valid E.164 phone number".into());
        Err(err)
    }
}

/// `first_name` -> `firstName`, matching the JSON field names
fn json_field_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            name.extend(c.to_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name
}

/// Flatten field errors into `field: message` lines
fn field_errors(errors: &ValidationErrors) -> Vec<String> {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                format!("{}: {message}", json_field_name(field))
            })
        })
        .collect();
    messages.sort();
    messages
}

fn validate_body<T: Validate>(body: &T) -> Result<(), ApiError> {
    body.validate()
        .map_err(|e| ApiError::from(AuthError::Validation(field_errors(&e))))
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
}

/// Register a new user account
///
/// # Responses
///
/// * `201 Created` - identity view of the new account
/// * `400 Bad Request` - field or password-policy violations, all listed
/// * `409 Conflict` - email already registered
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::from(e).at("/api/v1/auth/register"))?;
    if let Err(e) = body.validate() {
        // report password violations alongside the field errors
        let mut errors = field_errors(&e);
        errors.extend(
            policy::evaluate(&body.password)
                .messages()
                .into_iter()
                .map(|m| format!("password: {m}")),
        );
        return Err(ApiError::from(AuthError::Validation(errors)).at("/api/v1/auth/register"));
    }

    let ctx = request_context(&headers, peer.as_ref());
    let request = RegistrationRequest {
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        password: body.password,
        phone_number: body.phone_number,
    };
    let user = state
        .auth
        .register(request, &ctx)
        .await
        .map_err(|e| ApiError::from(e).at("/api/v1/auth/register"))?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Login with email and password
///
/// # Responses
///
/// * `200 OK` - `{accessToken, refreshToken, tokenType, expiresIn}`
/// * `401 Unauthorized` - invalid credentials
/// * `403 Forbidden` - account locked
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::from(e).at("/api/v1/auth/login"))?;
    validate_body(&body).map_err(|e| e.at("/api/v1/auth/login"))?;

    let ctx = request_context(&headers, peer.as_ref());
    let tokens = state
        .auth
        .login(&body.email, &body.password, &ctx)
        .await
        .map_err(|e| ApiError::from(e).at("/api/v1/auth/login"))?;

    Ok(Json(tokens))
}

/// Exchange a refresh token for a new token pair
///
/// The presented token is revoked; presenting it again fails with 401.
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<RefreshBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::from(e).at("/api/v1/auth/refresh"))?;
    validate_body(&body).map_err(|e| e.at("/api/v1/auth/refresh"))?;

    let ctx = request_context(&headers, peer.as_ref());
    let tokens = state
        .auth
        .refresh(&body.refresh_token, &ctx)
        .await
        .map_err(|e| ApiError::from(e).at("/api/v1/auth/refresh"))?;

    Ok(Json(tokens))
}

/// Logout current session
///
/// Always `204 No Content` unless storage fails; a missing or malformed
/// `Authorization` header is ignored.
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = request_context(&headers, peer.as_ref());
    state
        .auth
        .logout(authorization(&headers), &ctx)
        .await
        .map_err(|e| ApiError::from(e).at("/api/v1/auth/logout"))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Get current user profile
pub async fn me_handler(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(user.profile)
}

/// Accept a password-reset request
///
/// Only the rate limit is enforced here; the reset workflow itself is not
/// offered, so the answer is the same whether or not the account exists.
pub async fn forgot_password_handler(
    body: Result<Json<ForgotPasswordBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::from(e).at("/api/v1/auth/forgot-password"))?;
    validate_body(&body).map_err(|e| e.at("/api/v1/auth/forgot-password"))?;
    Ok(StatusCode::ACCEPTED)
}
