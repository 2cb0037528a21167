//! Signed token issuance and verification
//!
//! Tokens are compact JWTs signed with HMAC-SHA256 under one shared secret.
//! Verification distinguishes a bad signature, a malformed token, an
//! unsupported algorithm and expiry. Expiry is checked separately from the
//! signature against the injected [`Clock`], so the claims of an expired but
//! authentic token can still be inspected (logout and audit use that).

use super::models::User;
use crate::clock::Clock;
use crate::config::JwtSettings;
use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Token-type discriminator carried in every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "ACCESS",
            TokenType::Refresh => "REFRESH",
        }
    }
}

/// JWT claims
///
/// `userId` is carried by both token types; `email`, `fullName` and `roles`
/// only by access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject - normalized login handle
    pub sub: String,
    /// Unique token id, the blacklist key
    pub jti: String,
    pub iss: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

impl Claims {
    pub fn expires_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// Token issuance errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),
}

/// Why a token failed verification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Invalid token signature")]
    BadSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Authentic but past `exp`; the claims are kept for inspection
    #[error("Token has expired")]
    Expired(Box<Claims>),

    #[error("Unsupported signing algorithm")]
    UnsupportedAlgorithm,
}

impl VerificationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadSignature => "bad_signature",
            Self::Malformed(_) => "malformed",
            Self::Expired(_) => "expired",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
        }
    }

    /// Claims of an expired token, if that is the failure
    pub fn expired_claims(&self) -> Option<&Claims> {
        match self {
            Self::Expired(claims) => Some(claims),
            _ => None,
        }
    }
}

/// Issues and verifies signed tokens
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(settings: &JwtSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            issuer: settings.issuer.clone(),
            access_ttl: settings.access_ttl(),
            refresh_ttl: settings.refresh_ttl(),
            clock,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a token of `token_type` for `user`, valid for `ttl` from now
    pub fn issue(&self, user: &User, token_type: TokenType, ttl: Duration) -> Result<String, JwtError> {
        let now = self.clock.now().timestamp();

        let (email, full_name, roles) = match token_type {
            TokenType::Access => (
                Some(user.email.clone()),
                Some(user.full_name()),
                Some(user.role_names()),
            ),
            TokenType::Refresh => (None, None, None),
        };

        let claims = Claims {
            sub: user.email.clone(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl.num_seconds(),
            token_type,
            user_id: Some(user.id),
            email,
            full_name,
            roles,
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    pub fn issue_access(&self, user: &User) -> Result<String, JwtError> {
        self.issue(user, TokenType::Access, self.access_ttl)
    }

    pub fn issue_refresh(&self, user: &User) -> Result<String, JwtError> {
        self.issue(user, TokenType::Refresh, self.refresh_ttl)
    }

    /// Check signature, structure and issuer, then expiry
    pub fn verify(&self, token: &str) -> Result<Claims, VerificationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        // expiry is judged below against our own clock
        validation.validate_exp = false;
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => VerificationError::BadSignature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    VerificationError::UnsupportedAlgorithm
                }
                _ => VerificationError::Malformed(e.to_string()),
            }
        })?;

        let claims = token_data.claims;
        if self.clock.now().timestamp() >= claims.exp {
            return Err(VerificationError::Expired(Box::new(claims)));
        }
        Ok(claims)
    }

    /// True once the token is past its expiry.
    ///
    /// A token that cannot be verified at all also reports expired, since
    /// nothing about it can be trusted.
    pub fn is_expired(&self, token: &str) -> bool {
        self.verify(token).is_err()
    }

    /// True iff the token's subject is `user`'s login handle and it has not
    /// expired. The signature is re-checked as part of decoding.
    pub fn validate_for_identity(&self, token: &str, user: &User) -> bool {
        match self.verify(token) {
            Ok(claims) => claims.sub == user.email,
            Err(_) => false,
        }
    }
}
