//! Persistence contracts for authentication entities
//!
//! - Users: account lookup, creation and the login bookkeeping fields
//! - Refresh tokens: keyed by SHA-256 of the bearer string, with an atomic
//!   rotate that redeems one token and stores its replacement
//! - Token blacklist: revoked access-token ids
//!
//! Implementations live in [`super::memory`] (process-local) and
//! [`super::postgres`] (sqlx). Rows are only mutated through these methods.

use super::models::{BlacklistEntry, RefreshTokenRecord, User};
use crate::error::RefreshTokenFailure;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Email already exists")]
    DuplicateEmail,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::DatabaseError(err.to_string())
    }
}

/// SHA-256 of a token string, lower-case hex
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of recording a failed login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLoginOutcome {
    /// Consecutive failures after this one (reset to 0 when a lock is applied)
    pub failed_attempts: i32,
    /// Set when this failure tripped the lockout
    pub locked_until: Option<DateTime<Utc>>,
}

/// Lockout thresholds passed to [`UserRepository::record_failed_login`]
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: i32,
    pub lock_duration: Duration,
}

impl From<&crate::config::LockoutConfig> for LockoutPolicy {
    fn from(config: &crate::config::LockoutConfig) -> Self {
        Self {
            max_failed_attempts: i32::try_from(config.max_failed_attempts).unwrap_or(i32::MAX),
            lock_duration: config.lock_duration(),
        }
    }
}

/// Outcome of an attempted refresh-token rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The old row was revoked and the replacement stored
    Rotated,
    /// Nothing changed; the old row was not redeemable
    Rejected(RefreshTokenFailure),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Store a new user. Fails with `DuplicateEmail` if the normalized email
    /// is taken.
    async fn create(&self, user: User) -> Result<User, RepositoryError>;

    /// Look up by normalized login handle
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    async fn exists_by_login(&self, login: &str) -> Result<bool, RepositoryError> {
        Ok(self.find_by_login(login).await?.is_some())
    }

    /// Stamp last login, clear failure count and any lock
    async fn record_successful_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Count a failure and lock the account once the threshold is reached
    async fn record_failed_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        policy: LockoutPolicy,
    ) -> Result<FailedLoginOutcome, RepositoryError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), RepositoryError>;

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError>;

    /// Revoke one row. Revoking a revoked row is a no-op.
    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Revoke every row of `user_id` that is still valid at `now`
    async fn revoke_all_valid_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Atomically redeem `old_id` and store `replacement`.
    ///
    /// The revoke is a compare-and-set on "not revoked and not expired at
    /// `now`"; the replacement is only stored if that succeeded. Of any number
    /// of concurrent calls for the same `old_id`, at most one sees `Rotated`.
    async fn rotate(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, RepositoryError>;

    async fn count_valid_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Delete rows whose expiry has passed. Revoked rows are kept until they
    /// expire so that a replayed token is still reported as revoked.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait TokenBlacklistRepository: Send + Sync {
    /// Insert unless the jti is already present. Returns whether a row was added.
    async fn add(&self, entry: BlacklistEntry) -> Result<bool, RepositoryError>;

    async fn contains(&self, jti: &str) -> Result<bool, RepositoryError>;

    /// Delete entries whose token would have expired by `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// Entries still covering an unexpired token
    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
