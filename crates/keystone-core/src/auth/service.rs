//! Authentication service layer
//!
//! Composes the token codec, refresh-token store, blacklist and credential
//! check into the user-facing flows: register, login, refresh, logout and
//! "who am I". Every flow takes the caller's [`RequestContext`] explicitly and
//! reports what happened through the injected [`AuditSink`].

use super::authenticator::{extract_bearer, RequestAuthenticator};
use super::blacklist::TokenBlacklist;
use super::credentials::{hash_blocking, CredentialAuthenticator, CredentialFailure, PasswordAuthenticator};
use super::jwt::{Claims, TokenCodec, TokenType};
use super::memory::{
    InMemoryRefreshTokenRepository, InMemoryTokenBlacklistRepository, InMemoryUserRepository,
};
use super::models::{normalize_login, NewUser, TokenPair, User, UserPublic, UserRole};
use super::password::CredentialHasher;
use super::policy;
use super::postgres::{PgRefreshTokenRepository, PgTokenBlacklistRepository, PgUserRepository};
use super::refresh::RefreshTokenStore;
use super::repository::{LockoutPolicy, RefreshTokenRepository, TokenBlacklistRepository, UserRepository};
use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{AuthError, RefreshTokenFailure, Result};
use crate::RequestContext;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage and side-effect collaborators of [`AuthService`]
#[derive(Clone)]
pub struct AuthDependencies {
    pub users: Arc<dyn UserRepository>,
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub blacklist: Arc<dyn TokenBlacklistRepository>,
    pub hasher: Arc<dyn CredentialHasher>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl AuthDependencies {
    /// Process-local storage
    pub fn in_memory(
        hasher: Arc<dyn CredentialHasher>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::new()),
            refresh_tokens: Arc::new(InMemoryRefreshTokenRepository::new()),
            blacklist: Arc::new(InMemoryTokenBlacklistRepository::new()),
            hasher,
            audit,
            clock,
        }
    }

    /// PostgreSQL storage sharing one pool
    pub fn postgres(
        pool: PgPool,
        hasher: Arc<dyn CredentialHasher>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            refresh_tokens: Arc::new(PgRefreshTokenRepository::new(pool.clone())),
            blacklist: Arc::new(PgTokenBlacklistRepository::new(pool)),
            hasher,
            audit,
            clock,
        }
    }
}

/// Registration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub phone_number: Option<String>,
}

/// Rows removed by one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub blacklist_entries: u64,
    pub refresh_tokens: u64,
}

/// Authentication service
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    credentials: Arc<dyn CredentialAuthenticator>,
    hasher: Arc<dyn CredentialHasher>,
    codec: Arc<TokenCodec>,
    refresh_tokens: RefreshTokenStore,
    blacklist: TokenBlacklist,
    authenticator: RequestAuthenticator,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(config: &AppConfig, deps: AuthDependencies) -> Self {
        let codec = Arc::new(TokenCodec::new(&config.jwt, deps.clock.clone()));
        let blacklist = TokenBlacklist::new(deps.blacklist, deps.clock.clone());
        let credentials = Arc::new(PasswordAuthenticator::new(
            deps.users.clone(),
            deps.hasher.clone(),
            deps.clock.clone(),
            LockoutPolicy::from(&config.lockout),
        ));

        Self {
            refresh_tokens: RefreshTokenStore::new(
                deps.refresh_tokens,
                codec.clone(),
                deps.clock.clone(),
            ),
            authenticator: RequestAuthenticator::new(
                codec.clone(),
                blacklist.clone(),
                deps.users.clone(),
                deps.audit.clone(),
                deps.clock.clone(),
            ),
            users: deps.users,
            credentials,
            hasher: deps.hasher,
            codec,
            blacklist,
            audit: deps.audit,
            clock: deps.clock,
        }
    }

    /// Replace the login credential check
    pub fn with_credential_authenticator(
        mut self,
        credentials: Arc<dyn CredentialAuthenticator>,
    ) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn authenticator(&self) -> &RequestAuthenticator {
        &self.authenticator
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    fn emit(
        &self,
        kind: AuditEventKind,
        ctx: &RequestContext,
        actor: Option<&str>,
        detail: Option<&str>,
    ) {
        let mut event = AuditEvent::new(kind, self.clock.now()).context(ctx);
        if let Some(actor) = actor {
            event = event.actor(actor);
        }
        if let Some(detail) = detail {
            event = event.detail(detail);
        }
        self.audit.record(event);
    }

    /// Register a new account with the default role
    ///
    /// Fails with `Validation` listing every problem with the input
    /// (including all password-policy violations), or `DuplicateIdentity`
    /// if the normalized email is taken.
    pub async fn register(
        &self,
        request: RegistrationRequest,
        ctx: &RequestContext,
    ) -> Result<UserPublic> {
        let email = normalize_login(&request.email);

        let mut errors = Vec::new();
        if !email.contains('@') {
            errors.push("email: must be a valid email address".to_string());
        }
        if request.first_name.trim().is_empty() {
            errors.push("firstName: must not be blank".to_string());
        }
        if request.last_name.trim().is_empty() {
            errors.push("lastName: must not be blank".to_string());
        }
        errors.extend(
            policy::evaluate(&request.password)
                .messages()
                .into_iter()
                .map(|m| format!("password: {m}")),
        );
        if !errors.is_empty() {
            self.emit(
                AuditEventKind::RegistrationFailure,
                ctx,
                Some(&email),
                Some("validation_error"),
            );
            return Err(AuthError::Validation(errors));
        }

        if self.users.exists_by_login(&email).await? {
            self.emit(
                AuditEventKind::RegistrationFailure,
                ctx,
                Some(&email),
                Some("duplicate_identity"),
            );
            return Err(AuthError::DuplicateIdentity);
        }

        let password_hash = hash_blocking(self.hasher.clone(), &request.password).await?;
        let user = User::from_new(
            NewUser {
                email: email.clone(),
                password_hash,
                first_name: request.first_name.trim().to_string(),
                last_name: request.last_name.trim().to_string(),
                phone_number: request.phone_number.filter(|p| !p.trim().is_empty()),
                roles: vec![UserRole::DEFAULT],
            },
            self.clock.now(),
        );

        // A concurrent registration can still win between the check and the insert
        let user = match self.users.create(user).await {
            Ok(user) => user,
            Err(e) => {
                let err = AuthError::from(e);
                if matches!(err, AuthError::DuplicateIdentity) {
                    self.emit(
                        AuditEventKind::RegistrationFailure,
                        ctx,
                        Some(&email),
                        Some("duplicate_identity"),
                    );
                }
                return Err(err);
            }
        };

        info!(user_id = %user.id, "User registered");
        self.emit(AuditEventKind::RegistrationSuccess, ctx, Some(&user.email), None);
        Ok(user.to_public())
    }

    /// Authenticate and start a new session
    ///
    /// Every refresh token the user held before is revoked. Access tokens
    /// issued earlier stay valid until their own expiry.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        ctx: &RequestContext,
    ) -> Result<TokenPair> {
        let login = normalize_login(login);

        let user = match self.credentials.authenticate(&login, password).await {
            Ok(user) => user,
            Err(CredentialFailure::Infrastructure(err)) => return Err(err),
            Err(failure) => {
                self.emit(
                    AuditEventKind::LoginFailure,
                    ctx,
                    Some(&login),
                    Some(failure.reason()),
                );
                if let CredentialFailure::Locked {
                    until,
                    newly_locked: true,
                } = &failure
                {
                    self.emit(
                        AuditEventKind::AccountLocked,
                        ctx,
                        Some(&login),
                        Some(&format!("locked until {until}")),
                    );
                }
                return Err(failure.into());
            }
        };

        self.users
            .record_successful_login(user.id, self.clock.now())
            .await?;

        let revoked = self
            .refresh_tokens
            .revoke_all_valid_for_user(user.id)
            .await?;
        if revoked > 0 {
            debug!(user_id = %user.id, revoked, "Revoked previous refresh tokens");
        }

        let access_token = self.codec.issue_access(&user)?;
        let refresh = self.refresh_tokens.issue(&user).await?;

        info!(user_id = %user.id, "User logged in");
        self.emit(AuditEventKind::LoginSuccess, ctx, Some(&user.email), None);

        Ok(TokenPair::bearer(
            access_token,
            refresh.token,
            self.codec.access_ttl().num_seconds(),
        ))
    }

    fn refresh_rejected(
        &self,
        ctx: &RequestContext,
        actor: Option<&str>,
        failure: RefreshTokenFailure,
    ) -> AuthError {
        let kind = if failure == RefreshTokenFailure::Revoked {
            AuditEventKind::RefreshTokenReuse
        } else {
            AuditEventKind::InvalidToken
        };
        self.emit(kind, ctx, actor, Some(failure.as_str()));
        AuthError::InvalidRefreshToken(failure)
    }

    /// Redeem a refresh token for a new access/refresh pair
    ///
    /// The presented token is single-use: of two redemptions of the same
    /// token, sequential or concurrent, exactly one succeeds and the other
    /// fails with `InvalidRefreshToken(Revoked)`.
    pub async fn refresh(&self, refresh_token: &str, ctx: &RequestContext) -> Result<TokenPair> {
        let (claims, token_expired) = match self.codec.verify(refresh_token) {
            Ok(claims) => (claims, false),
            Err(e) => match e.expired_claims() {
                Some(claims) => (claims.clone(), true),
                None => {
                    debug!(error = %e, "Refresh token failed verification");
                    return Err(self.refresh_rejected(
                        ctx,
                        None,
                        RefreshTokenFailure::SignatureMismatch,
                    ));
                }
            },
        };
        let actor = Some(claims.sub.as_str());

        if claims.token_type != TokenType::Refresh {
            return Err(self.refresh_rejected(ctx, actor, RefreshTokenFailure::SignatureMismatch));
        }

        let user = match self.users.find_by_login(&claims.sub).await? {
            Some(user) if user.enabled => user,
            _ => return Err(self.refresh_rejected(ctx, actor, RefreshTokenFailure::NotFound)),
        };

        let record = match self.refresh_tokens.find_by_value(refresh_token).await {
            Ok(record) => record,
            Err(AuthError::InvalidRefreshToken(failure)) => {
                return Err(self.refresh_rejected(ctx, actor, failure))
            }
            Err(e) => return Err(e),
        };

        if record.user_id != user.id {
            warn!(user_id = %user.id, "Refresh token presented for a different account");
            return Err(self.refresh_rejected(ctx, actor, RefreshTokenFailure::SignatureMismatch));
        }
        if record.revoked {
            warn!(user_id = %user.id, "Revoked refresh token presented");
            return Err(self.refresh_rejected(ctx, actor, RefreshTokenFailure::Revoked));
        }
        if token_expired || record.is_expired(self.clock.now()) {
            return Err(self.refresh_rejected(ctx, actor, RefreshTokenFailure::Expired));
        }
        if !self.codec.validate_for_identity(refresh_token, &user) {
            return Err(self.refresh_rejected(ctx, actor, RefreshTokenFailure::SignatureMismatch));
        }

        let rotated = match self.refresh_tokens.rotate(&record, &user).await {
            Ok(rotated) => rotated,
            Err(AuthError::InvalidRefreshToken(failure)) => {
                if failure == RefreshTokenFailure::Revoked {
                    warn!(user_id = %user.id, "Refresh token redeemed concurrently");
                }
                return Err(self.refresh_rejected(ctx, actor, failure));
            }
            Err(e) => return Err(e),
        };

        let access_token = self.codec.issue_access(&user)?;
        self.emit(AuditEventKind::TokenRefresh, ctx, actor, None);

        Ok(TokenPair::bearer(
            access_token,
            rotated.token,
            self.codec.access_ttl().num_seconds(),
        ))
    }

    /// End the session behind an access token
    ///
    /// Blacklists the token until its own expiry and revokes the user's valid
    /// refresh tokens. A missing, malformed or forged header is a no-op.
    pub async fn logout(&self, authorization: Option<&str>, ctx: &RequestContext) -> Result<()> {
        let Some(token) = authorization.and_then(extract_bearer) else {
            debug!("Logout without bearer token");
            return Ok(());
        };

        // Expired tokens are still blacklisted; their claims are authentic
        let claims: Claims = match self.codec.verify(token) {
            Ok(claims) => claims,
            Err(e) => match e.expired_claims() {
                Some(claims) => claims.clone(),
                None => {
                    warn!(error = %e, "Logout with unverifiable token ignored");
                    self.emit(AuditEventKind::InvalidToken, ctx, None, Some(e.kind()));
                    return Ok(());
                }
            },
        };

        if claims.token_type != TokenType::Access {
            self.emit(
                AuditEventKind::InvalidToken,
                ctx,
                Some(&claims.sub),
                Some("wrong_token_type"),
            );
            return Ok(());
        }

        self.blacklist
            .add(&claims.jti, claims.expires_at(), Some("logout"))
            .await?;

        let user = match claims.user_id {
            Some(id) => self.users.find_by_id(id).await?,
            None => self.users.find_by_login(&claims.sub).await?,
        };
        if let Some(user) = user {
            let revoked = self
                .refresh_tokens
                .revoke_all_valid_for_user(user.id)
                .await?;
            info!(user_id = %user.id, revoked, "User logged out");
        }

        self.emit(AuditEventKind::Logout, ctx, Some(&claims.sub), None);
        Ok(())
    }

    /// Identity behind a bearer header
    pub async fn current_user(
        &self,
        authorization: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<UserPublic> {
        Ok(self
            .authenticator
            .authenticate(authorization, ctx)
            .await?
            .profile)
    }

    /// Remove blacklist entries and refresh tokens that have expired
    pub async fn purge_expired(&self) -> Result<PurgeReport> {
        let report = PurgeReport {
            blacklist_entries: self.blacklist.purge_expired(self.clock.now()).await?,
            refresh_tokens: self.refresh_tokens.delete_expired().await?,
        };
        debug!(
            blacklist_entries = report.blacklist_entries,
            refresh_tokens = report.refresh_tokens,
            "Purged expired rows"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::auth::password::{Argon2Hasher, PasswordConfig};
    use crate::clock::ManualClock;
    use chrono::Duration;

    struct Harness {
        service: Arc<AuthService>,
        audit: Arc<MemoryAuditSink>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let audit = Arc::new(MemoryAuditSink::new());
        let clock = Arc::new(ManualClock::starting_now());
        let deps = AuthDependencies::in_memory(
            Arc::new(Argon2Hasher::new(PasswordConfig::low_cost())),
            audit.clone(),
            clock.clone(),
        );
        Harness {
            service: Arc::new(AuthService::new(&AppConfig::default(), deps)),
            audit,
            clock,
        }
    }

    fn alice() -> RegistrationRequest {
        RegistrationRequest {
            email: "alice@example.com".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
            password: "StrongP@ss1".to_string(),
            phone_number: None,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("203.0.113.7").with_user_agent("tests")
    }

    async fn registered_and_logged_in(h: &Harness) -> TokenPair {
        h.service.register(alice(), &ctx()).await.unwrap();
        h.service
            .login("alice@example.com", "StrongP@ss1", &ctx())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_then_duplicate_in_any_case() {
        let h = harness();

        let user = h.service.register(alice(), &ctx()).await.unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.roles[0].name, "USER");

        let mut shouting = alice();
        shouting.email = "  ALICE@Example.COM ".to_string();
        let err = h.service.register(shouting, &ctx()).await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateIdentity));

        assert_eq!(
            h.audit.kinds(),
            vec![
                AuditEventKind::RegistrationSuccess,
                AuditEventKind::RegistrationFailure
            ]
        );
    }

    #[tokio::test]
    async fn test_register_reports_every_violation() {
        let h = harness();
        let mut weak = alice();
        weak.password = "Password123".to_string();
        weak.first_name = " ".to_string();

        let err = h.service.register(weak, &ctx()).await.unwrap_err();
        let AuthError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.iter().any(|e| e.starts_with("firstName")));
        assert!(errors.iter().any(|e| e.contains("special character")));
        assert!(errors.iter().any(|e| e.contains("too common")));
    }

    #[tokio::test]
    async fn test_login_issues_pair() {
        let h = harness();
        let pair = registered_and_logged_in(&h).await;

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);

        let claims = h.service.codec().verify(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.full_name.as_deref(), Some("Alice Liddell"));

        let me = h
            .service
            .current_user(Some(&format!("Bearer {}", pair.access_token)), &ctx())
            .await
            .unwrap();
        assert_eq!(me.email, "alice@example.com");
        assert!(me.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_login_failures_are_generic() {
        let h = harness();
        h.service.register(alice(), &ctx()).await.unwrap();

        let wrong = h
            .service
            .login("alice@example.com", "WrongP@ss1", &ctx())
            .await
            .unwrap_err();
        let unknown = h
            .service
            .login("bob@example.com", "StrongP@ss1", &ctx())
            .await
            .unwrap_err();

        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.public_message(), unknown.public_message());
        assert_eq!(h.audit.count(AuditEventKind::LoginFailure), 2);
    }

    #[tokio::test]
    async fn test_lockout_after_repeated_failures() {
        let h = harness();
        h.service.register(alice(), &ctx()).await.unwrap();

        for _ in 0..4 {
            let err = h
                .service
                .login("alice@example.com", "WrongP@ss1", &ctx())
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let fifth = h
            .service
            .login("alice@example.com", "WrongP@ss1", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(fifth, AuthError::AccountLocked));
        assert_eq!(h.audit.count(AuditEventKind::AccountLocked), 1);

        let correct = h
            .service
            .login("alice@example.com", "StrongP@ss1", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(correct, AuthError::AccountLocked));

        h.clock.advance(Duration::minutes(15));
        assert!(h
            .service
            .login("alice@example.com", "StrongP@ss1", &ctx())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_fresh_login_revokes_previous_refresh_token() {
        let h = harness();
        let first = registered_and_logged_in(&h).await;
        let second = h
            .service
            .login("alice@example.com", "StrongP@ss1", &ctx())
            .await
            .unwrap();

        let err = h.service.refresh(&first.refresh_token, &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::InvalidRefreshToken(RefreshTokenFailure::Revoked)
        ));
        assert!(h.service.refresh(&second.refresh_token, &ctx()).await.is_ok());

        // the earlier access token is still honoured until it expires
        assert!(h
            .service
            .current_user(Some(&format!("Bearer {}", first.access_token)), &ctx())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_twice_second_is_revoked() {
        let h = harness();
        let pair = registered_and_logged_in(&h).await;

        let rotated = h.service.refresh(&pair.refresh_token, &ctx()).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);

        let err = h.service.refresh(&pair.refresh_token, &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::InvalidRefreshToken(RefreshTokenFailure::Revoked)
        ));
        assert_eq!(h.audit.count(AuditEventKind::RefreshTokenReuse), 1);

        // the replacement works
        assert!(h.service.refresh(&rotated.refresh_token, &ctx()).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_has_one_winner() {
        let h = harness();
        let pair = registered_and_logged_in(&h).await;

        let attempts = (0..8).map(|_| {
            let service = h.service.clone();
            let token = pair.refresh_token.clone();
            tokio::spawn(async move { service.refresh(&token, &RequestContext::default()).await })
        });
        let results: Vec<_> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(|r| r.err()) {
            assert!(matches!(
                err,
                AuthError::InvalidRefreshToken(RefreshTokenFailure::Revoked)
            ));
        }
    }

    #[tokio::test]
    async fn test_refresh_rejections_are_distinct() {
        let h = harness();
        let pair = registered_and_logged_in(&h).await;

        let forged = h.service.refresh("not.a.token", &ctx()).await.unwrap_err();
        assert!(matches!(
            forged,
            AuthError::InvalidRefreshToken(RefreshTokenFailure::SignatureMismatch)
        ));

        let access_as_refresh = h
            .service
            .refresh(&pair.access_token, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            access_as_refresh,
            AuthError::InvalidRefreshToken(RefreshTokenFailure::SignatureMismatch)
        ));

        // signed by us but never persisted
        let user = h
            .service
            .users()
            .find_by_login("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        let stray = h.service.codec().issue_refresh(&user).unwrap();
        let not_found = h.service.refresh(&stray, &ctx()).await.unwrap_err();
        assert!(matches!(
            not_found,
            AuthError::InvalidRefreshToken(RefreshTokenFailure::NotFound)
        ));

        h.clock.advance(Duration::days(7));
        let expired = h
            .service
            .refresh(&pair.refresh_token, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            expired,
            AuthError::InvalidRefreshToken(RefreshTokenFailure::Expired)
        ));
    }

    #[tokio::test]
    async fn test_logout_blacklists_access_token() {
        let h = harness();
        let pair = registered_and_logged_in(&h).await;
        let header = format!("Bearer {}", pair.access_token);

        h.service.logout(Some(&header), &ctx()).await.unwrap();

        let err = h
            .service
            .current_user(Some(&header), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // refresh tokens of the session are gone too
        let err = h.service.refresh(&pair.refresh_token, &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::InvalidRefreshToken(RefreshTokenFailure::Revoked)
        ));
        assert_eq!(h.audit.count(AuditEventKind::Logout), 1);
    }

    #[tokio::test]
    async fn test_logout_without_usable_header_is_noop() {
        let h = harness();
        for header in [None, Some("Basic abc"), Some("Bearer "), Some("Bearer forged.token.value")] {
            h.service.logout(header, &ctx()).await.unwrap();
        }
        assert_eq!(h.audit.count(AuditEventKind::Logout), 0);
        assert_eq!(h.service.blacklist().count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_removes_expired_rows() {
        let h = harness();
        let pair = registered_and_logged_in(&h).await;
        h.service
            .logout(Some(&format!("Bearer {}", pair.access_token)), &ctx())
            .await
            .unwrap();

        assert_eq!(h.service.purge_expired().await.unwrap(), PurgeReport::default());

        h.clock.advance(Duration::days(8));
        let report = h.service.purge_expired().await.unwrap();
        assert_eq!(report.blacklist_entries, 1);
        assert_eq!(report.refresh_tokens, 1);
    }
}
