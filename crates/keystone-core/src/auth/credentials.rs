//! Credential checking for login
//!
//! [`CredentialAuthenticator`] is the seam the orchestrator calls to decide
//! whether a login/password pair is good. [`PasswordAuthenticator`] is the
//! stock implementation: it resolves the account, refuses disabled or locked
//! accounts, verifies the hash and keeps the failed-attempt counter.

use super::models::{normalize_login, User};
use super::password::CredentialHasher;
use super::repository::{LockoutPolicy, UserRepository};
use crate::clock::Clock;
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Hashed once per authenticator and verified against when the login is
/// unknown, so both paths cost one hash verification.
const DUMMY_PASSWORD: &str = "keystone-placeholder-credential";

/// Why a credential check failed
#[derive(Debug)]
pub enum CredentialFailure {
    UnknownLogin,
    Disabled,
    BadPassword { failed_attempts: i32 },
    /// `newly_locked` is set when this very attempt tripped the lock
    Locked {
        until: DateTime<Utc>,
        newly_locked: bool,
    },
    Infrastructure(AuthError),
}

impl CredentialFailure {
    /// Short reason for audit records
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownLogin => "unknown_login",
            Self::Disabled => "account_disabled",
            Self::BadPassword { .. } => "bad_password",
            Self::Locked { .. } => "account_locked",
            Self::Infrastructure(_) => "infrastructure_failure",
        }
    }
}

impl From<AuthError> for CredentialFailure {
    fn from(err: AuthError) -> Self {
        CredentialFailure::Infrastructure(err)
    }
}

/// Callers only ever learn "invalid credentials" or "locked"; which part of
/// the pair was wrong stays server-side.
impl From<CredentialFailure> for AuthError {
    fn from(failure: CredentialFailure) -> Self {
        match failure {
            CredentialFailure::UnknownLogin
            | CredentialFailure::Disabled
            | CredentialFailure::BadPassword { .. } => AuthError::InvalidCredentials,
            CredentialFailure::Locked { .. } => AuthError::AccountLocked,
            CredentialFailure::Infrastructure(err) => err,
        }
    }
}

#[async_trait]
pub trait CredentialAuthenticator: Send + Sync {
    async fn authenticate(&self, login: &str, password: &str) -> Result<User, CredentialFailure>;
}

/// Password check against stored hashes with lockout bookkeeping
pub struct PasswordAuthenticator {
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
    lockout: LockoutPolicy,
    dummy_hash: OnceCell<String>,
}

impl PasswordAuthenticator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        lockout: LockoutPolicy,
    ) -> Self {
        Self {
            users,
            hasher,
            clock,
            lockout,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Burn one verification against the placeholder hash
    async fn verify_dummy(&self, password: &str) -> Result<(), AuthError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| hash_blocking(self.hasher.clone(), DUMMY_PASSWORD))
            .await?;
        verify_blocking(self.hasher.clone(), password, hash).await?;
        Ok(())
    }
}

/// Run a hash verification off the async workers
pub(crate) async fn verify_blocking(
    hasher: Arc<dyn CredentialHasher>,
    password: &str,
    hash: &str,
) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await
        .map_err(|e| AuthError::Infrastructure(format!("hashing task failed: {e}")))?
        .map_err(AuthError::from)
}

/// Run a hash computation off the async workers
pub(crate) async fn hash_blocking(
    hasher: Arc<dyn CredentialHasher>,
    password: &str,
) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| AuthError::Infrastructure(format!("hashing task failed: {e}")))?
        .map_err(AuthError::from)
}

#[async_trait]
impl CredentialAuthenticator for PasswordAuthenticator {
    async fn authenticate(&self, login: &str, password: &str) -> Result<User, CredentialFailure> {
        let login = normalize_login(login);
        let now = self.clock.now();

        let Some(user) = self
            .users
            .find_by_login(&login)
            .await
            .map_err(AuthError::from)?
        else {
            self.verify_dummy(password).await?;
            return Err(CredentialFailure::UnknownLogin);
        };

        if !user.enabled {
            debug!(user_id = %user.id, "Login attempt for disabled account");
            verify_blocking(self.hasher.clone(), password, &user.password_hash).await?;
            return Err(CredentialFailure::Disabled);
        }

        if let Some(until) = user.locked_until.filter(|until| now < *until) {
            return Err(CredentialFailure::Locked {
                until,
                newly_locked: false,
            });
        }

        if verify_blocking(self.hasher.clone(), password, &user.password_hash).await? {
            return Ok(user);
        }

        let outcome = self
            .users
            .record_failed_login(user.id, now, self.lockout)
            .await
            .map_err(AuthError::from)?;

        match outcome.locked_until {
            Some(until) => {
                warn!(user_id = %user.id, locked_until = %until, "Account locked after repeated failures");
                Err(CredentialFailure::Locked {
                    until,
                    newly_locked: true,
                })
            }
            None => Err(CredentialFailure::BadPassword {
                failed_attempts: outcome.failed_attempts,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::InMemoryUserRepository;
    use crate::auth::models::{NewUser, UserRole};
    use crate::auth::password::{Argon2Hasher, PasswordConfig};
    use crate::clock::ManualClock;
    use chrono::Duration;

    async fn fixture() -> (PasswordAuthenticator, Arc<InMemoryUserRepository>, Arc<ManualClock>) {
        let users = Arc::new(InMemoryUserRepository::new());
        let hasher: Arc<dyn CredentialHasher> = Arc::new(Argon2Hasher::new(PasswordConfig::low_cost()));
        let clock = Arc::new(ManualClock::starting_now());

        let hash = hasher.hash("StrongP@ss1").unwrap();
        users
            .create(User::from_new(
                NewUser {
                    email: "alice@example.com".to_string(),
                    password_hash: hash,
                    first_name: "Alice".to_string(),
                    last_name: "Liddell".to_string(),
                    phone_number: None,
                    roles: vec![UserRole::User],
                },
                clock.now(),
            ))
            .await
            .unwrap();

        let authenticator = PasswordAuthenticator::new(
            users.clone(),
            hasher,
            clock.clone(),
            LockoutPolicy {
                max_failed_attempts: 3,
                lock_duration: Duration::minutes(15),
            },
        );
        (authenticator, users, clock)
    }

    #[tokio::test]
    async fn test_correct_password_with_unnormalized_login() {
        let (auth, _, _) = fixture().await;
        let user = auth.authenticate(" ALICE@example.com ", "StrongP@ss1").await.unwrap();
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_unknown_and_wrong_password_look_the_same() {
        let (auth, _, _) = fixture().await;

        let unknown = auth.authenticate("nobody@example.com", "StrongP@ss1").await.unwrap_err();
        let wrong = auth.authenticate("alice@example.com", "WrongP@ss1").await.unwrap_err();

        assert_eq!(unknown.reason(), "unknown_login");
        assert!(matches!(wrong, CredentialFailure::BadPassword { failed_attempts: 1 }));
        assert!(matches!(AuthError::from(unknown), AuthError::InvalidCredentials));
        assert!(matches!(AuthError::from(wrong), AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_lockout_after_threshold_and_expiry() {
        let (auth, _, clock) = fixture().await;

        for _ in 0..2 {
            auth.authenticate("alice@example.com", "WrongP@ss1").await.unwrap_err();
        }
        let third = auth.authenticate("alice@example.com", "WrongP@ss1").await.unwrap_err();
        assert!(matches!(third, CredentialFailure::Locked { newly_locked: true, .. }));

        // correct password is refused while locked
        let locked = auth.authenticate("alice@example.com", "StrongP@ss1").await.unwrap_err();
        assert!(matches!(locked, CredentialFailure::Locked { newly_locked: false, .. }));
        assert!(matches!(AuthError::from(locked), AuthError::AccountLocked));

        clock.advance(Duration::minutes(16));
        assert!(auth.authenticate("alice@example.com", "StrongP@ss1").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_account_is_invalid_credentials() {
        let users = Arc::new(InMemoryUserRepository::new());
        let hasher: Arc<dyn CredentialHasher> = Arc::new(Argon2Hasher::new(PasswordConfig::low_cost()));
        let clock = Arc::new(ManualClock::starting_now());

        let mut user = User::from_new(
            NewUser {
                email: "off@example.com".to_string(),
                password_hash: hasher.hash("StrongP@ss1").unwrap(),
                first_name: "Off".to_string(),
                last_name: "Line".to_string(),
                phone_number: None,
                roles: vec![UserRole::User],
            },
            clock.now(),
        );
        user.enabled = false;
        users.create(user).await.unwrap();

        let auth = PasswordAuthenticator::new(
            users,
            hasher,
            clock,
            LockoutPolicy::from(&crate::config::LockoutConfig::default()),
        );
        let err = auth.authenticate("off@example.com", "StrongP@ss1").await.unwrap_err();
        assert!(matches!(err, CredentialFailure::Disabled));
    }

    /// Counts verify calls made through it
    struct CountingHasher {
        inner: Argon2Hasher,
        verifies: std::sync::atomic::AtomicUsize,
    }

    impl CredentialHasher for CountingHasher {
        fn hash(&self, password: &str) -> Result<String, crate::auth::password::PasswordError> {
            self.inner.hash(password)
        }

        fn verify(
            &self,
            password: &str,
            hash: &str,
        ) -> Result<bool, crate::auth::password::PasswordError> {
            self.verifies
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.verify(password, hash)
        }
    }

    #[tokio::test]
    async fn test_unknown_login_costs_one_verify_like_known_login() {
        let users = Arc::new(InMemoryUserRepository::new());
        let hasher = Arc::new(CountingHasher {
            inner: Argon2Hasher::new(PasswordConfig::low_cost()),
            verifies: std::sync::atomic::AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::starting_now());
        users
            .create(User::from_new(
                NewUser {
                    email: "alice@example.com".to_string(),
                    password_hash: hasher.hash("StrongP@ss1").unwrap(),
                    first_name: "Alice".to_string(),
                    last_name: "Liddell".to_string(),
                    phone_number: None,
                    roles: vec![UserRole::User],
                },
                clock.now(),
            ))
            .await
            .unwrap();
        let auth = PasswordAuthenticator::new(
            users,
            hasher.clone(),
            clock,
            LockoutPolicy::from(&crate::config::LockoutConfig::default()),
        );
        let count = || hasher.verifies.load(std::sync::atomic::Ordering::SeqCst);

        auth.authenticate("alice@example.com", "Wrong#Pass9").await.unwrap_err();
        let known = count();
        auth.authenticate("nobody@example.com", "Wrong#Pass9").await.unwrap_err();
        let unknown = count() - known;
        auth.authenticate("ghost@example.com", "Wrong#Pass9").await.unwrap_err();

        assert_eq!(known, 1);
        assert_eq!(unknown, 1);
        assert_eq!(count(), 3);
    }
}
