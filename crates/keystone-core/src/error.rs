//! Domain error taxonomy
//!
//! Every failure a caller of the orchestrator can observe is one of the
//! [`AuthError`] variants. Module-level errors (`JwtError`,
//! `RepositoryError`, `PasswordError`) convert into it; only
//! [`AuthError::Infrastructure`] carries detail that must stay server-side.

use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;
use crate::auth::repository::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a presented refresh token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenFailure {
    /// No stored row for this token (or its subject no longer exists)
    NotFound,
    /// Already redeemed or explicitly revoked
    Revoked,
    /// Past its expiry
    Expired,
    /// Signature, token type or subject does not match the stored row
    SignatureMismatch,
}

impl RefreshTokenFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::SignatureMismatch => "signature_mismatch",
        }
    }
}

impl std::fmt::Display for RefreshTokenFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication failures surfaced to callers
#[derive(Debug, Error)]
pub enum AuthError {
    /// Caller-supplied input failed validation; carries every violation
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("An account with this email already exists")]
    DuplicateIdentity,

    /// Deliberately generic so it cannot be used to enumerate accounts
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is locked")]
    AccountLocked,

    #[error("Invalid refresh token ({0})")]
    InvalidRefreshToken(RefreshTokenFailure),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Persistence or other infrastructure fault; the message is for logs only
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),
}

impl AuthError {
    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::DuplicateIdentity => "duplicate_identity",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked => "account_locked",
            Self::InvalidRefreshToken(_) => "invalid_refresh_token",
            Self::RateLimited { .. } => "rate_limited",
            Self::Infrastructure(_) => "infrastructure_failure",
        }
    }

    /// Message safe to show to the caller
    pub fn public_message(&self) -> String {
        match self {
            Self::Infrastructure(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::DuplicateEmail => AuthError::DuplicateIdentity,
            other => AuthError::Infrastructure(other.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        AuthError::Infrastructure(err.to_string())
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::Infrastructure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
