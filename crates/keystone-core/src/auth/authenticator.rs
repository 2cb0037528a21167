/// Per-request bearer-token authentication
///
/// Resolves an `Authorization` header to an [`AuthenticatedUser`]:
/// 1. Extracts the `Bearer` token
/// 2. Verifies signature, issuer and expiry
/// 3. Rejects blacklisted token ids
/// 4. Loads the account and re-checks the subject against it
///
/// The resolved identity is returned to the caller, which threads it through
/// the rest of the request explicitly.
use super::blacklist::TokenBlacklist;
use super::jwt::{TokenCodec, TokenType};
use super::models::{UserPublic, UserRole};
use super::repository::UserRepository;
use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::RequestContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

const BEARER_PREFIX: &str = "Bearer ";

/// Token part of a `Bearer <token>` header value, if well formed
pub fn extract_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Identity established for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    /// Login handle (token subject)
    pub email: String,
    pub full_name: String,
    pub roles: Vec<UserRole>,
    /// Token id, the key used when the token is revoked
    pub jti: String,
    pub token_expires_at: DateTime<Utc>,
    pub profile: UserPublic,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: UserRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(UserRole::Admin)
    }
}

pub struct RequestAuthenticator {
    codec: Arc<TokenCodec>,
    blacklist: TokenBlacklist,
    users: Arc<dyn UserRepository>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl RequestAuthenticator {
    pub fn new(
        codec: Arc<TokenCodec>,
        blacklist: TokenBlacklist,
        users: Arc<dyn UserRepository>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec,
            blacklist,
            users,
            audit,
            clock,
        }
    }

    fn reject(&self, ctx: &RequestContext, actor: Option<&str>, reason: &str) -> AuthError {
        let mut event = AuditEvent::new(AuditEventKind::InvalidToken, self.clock.now())
            .context(ctx)
            .detail(reason);
        if let Some(actor) = actor {
            event = event.actor(actor);
        }
        self.audit.record(event);
        AuthError::InvalidCredentials
    }

    /// Authenticate the raw `Authorization` header value
    pub async fn authenticate(
        &self,
        header: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<AuthenticatedUser> {
        let token = header
            .and_then(extract_bearer)
            .ok_or(AuthError::InvalidCredentials)?;

        let claims = match self.codec.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Bearer token rejected");
                return Err(self.reject(ctx, None, e.kind()));
            }
        };

        if claims.token_type != TokenType::Access {
            return Err(self.reject(ctx, Some(&claims.sub), "wrong_token_type"));
        }

        // A failed lookup is treated as revoked: access is only granted when
        // the blacklist positively answers "not revoked".
        match self.blacklist.is_blacklisted(&claims.jti).await {
            Ok(false) => {}
            Ok(true) => return Err(self.reject(ctx, Some(&claims.sub), "token_revoked")),
            Err(e) => {
                error!(error = %e, "Blacklist lookup failed; denying request");
                return Err(AuthError::InvalidCredentials);
            }
        }

        let user = self
            .users
            .find_by_login(&claims.sub)
            .await?
            .filter(|user| user.enabled)
            .ok_or_else(|| self.reject(ctx, Some(&claims.sub), "unknown_subject"))?;

        if claims.user_id.is_some_and(|id| id != user.id)
            || !self.codec.validate_for_identity(token, &user)
        {
            return Err(self.reject(ctx, Some(&claims.sub), "subject_mismatch"));
        }

        Ok(AuthenticatedUser {
            user_id: user.id,
            email: user.email.clone(),
            full_name: user.full_name(),
            roles: user.roles.clone(),
            jti: claims.jti.clone(),
            token_expires_at: claims.expires_at(),
            profile: user.to_public(),
        })
    }
}
