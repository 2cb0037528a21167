//! API error handling
//!
//! Every rejection is rendered as the same JSON problem body:
//! `{status, code, title, detail, timestamp, instance?, errors?, retryAfter?}`.
//! Infrastructure detail is logged here and never leaves the process.
//!
//! Author: hephaex@gmail.com

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use keystone_core::AuthError;
use serde::{Deserialize, Serialize};

/// API error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: u16,
    /// Stable machine-readable kind
    pub code: String,
    pub title: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Application error type
#[derive(Debug)]
pub struct ApiError {
    error: AuthError,
    instance: Option<String>,
}

impl ApiError {
    /// Attach the request path the error belongs to
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.instance = Some(path.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        match &self.error {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::DuplicateIdentity => StatusCode::CONFLICT,
            AuthError::InvalidCredentials | AuthError::InvalidRefreshToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::AccountLocked => StatusCode::FORBIDDEN,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match &self.error {
            AuthError::Validation(_) => "Validation Failed",
            AuthError::DuplicateIdentity => "Duplicate Account",
            AuthError::InvalidCredentials => "Authentication Failed",
            AuthError::AccountLocked => "Account Locked",
            AuthError::InvalidRefreshToken(_) => "Invalid Refresh Token",
            AuthError::RateLimited { .. } => "Too Many Requests",
            AuthError::Infrastructure(_) => "Internal Server Error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (errors, retry_after) = match &self.error {
            AuthError::Validation(errors) => (Some(errors.clone()), None),
            AuthError::RateLimited { retry_after_secs } => (None, Some(*retry_after_secs)),
            _ => (None, None),
        };

        let detail = match &self.error {
            AuthError::Validation(_) => "Request validation failed".to_string(),
            AuthError::RateLimited { retry_after_secs } => {
                format!("Too many requests. Please try again in {retry_after_secs} seconds")
            }
            other => other.public_message(),
        };

        ErrorBody {
            status: self.status().as_u16(),
            code: self.error.kind().to_uppercase(),
            title: self.title().to_string(),
            detail,
            timestamp: Utc::now(),
            instance: self.instance.clone(),
            errors,
            retry_after,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self {
            error,
            instance: None,
        }
    }
}

/// Undecodable or incomplete bodies are validation failures like any other
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::Validation(vec![format!("body: {}", rejection.body_text())]).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let AuthError::Infrastructure(detail) = &self.error {
            tracing::error!(detail = %detail, instance = ?self.instance, "Request failed");
        }

        let mut response = (self.status(), Json(self.body())).into_response();
        if let AuthError::RateLimited { retry_after_secs } = &self.error {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(*retry_after_secs),
            );
        }
        response
    }
}
