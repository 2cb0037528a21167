//! Process-local repositories
//!
//! Used by tests and by the `memory` database backend. State is lost on
//! restart. Refresh-token rotation runs under a single lock, which gives the
//! same at-most-once guarantee as the conditional update in PostgreSQL.

use super::models::{normalize_login, BlacklistEntry, RefreshTokenRecord, User};
use super::repository::{
    FailedLoginOutcome, LockoutPolicy, RefreshTokenRepository, RepositoryError, RotationOutcome,
    TokenBlacklistRepository, UserRepository,
};
use crate::error::RefreshTokenFailure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
struct UserTable {
    by_id: HashMap<Uuid, User>,
    by_login: HashMap<String, Uuid>,
}

/// In-memory user store
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    table: RwLock<UserTable>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, mut user: User) -> Result<User, RepositoryError> {
        user.email = normalize_login(&user.email);

        let mut table = self.table.write().await;
        if table.by_login.contains_key(&user.email) {
            return Err(RepositoryError::DuplicateEmail);
        }
        table.by_login.insert(user.email.clone(), user.id);
        table.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, RepositoryError> {
        let table = self.table.read().await;
        Ok(table
            .by_login
            .get(&normalize_login(login))
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.table.read().await.by_id.get(&id).cloned())
    }

    async fn record_successful_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut table = self.table.write().await;
        let user = table.by_id.get_mut(&id).ok_or(RepositoryError::UserNotFound)?;
        user.last_login = Some(at);
        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.updated_at = at;
        Ok(())
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        policy: LockoutPolicy,
    ) -> Result<FailedLoginOutcome, RepositoryError> {
        let mut table = self.table.write().await;
        let user = table.by_id.get_mut(&id).ok_or(RepositoryError::UserNotFound)?;

        user.failed_login_attempts += 1;
        user.updated_at = at;

        let mut locked_until = None;
        if user.failed_login_attempts >= policy.max_failed_attempts {
            let until = at + policy.lock_duration;
            user.locked_until = Some(until);
            user.failed_login_attempts = 0;
            locked_until = Some(until);
        }

        Ok(FailedLoginOutcome {
            failed_attempts: user.failed_login_attempts,
            locked_until,
        })
    }
}

#[derive(Debug, Default)]
struct RefreshTable {
    by_id: HashMap<Uuid, RefreshTokenRecord>,
    by_hash: HashMap<String, Uuid>,
}

impl RefreshTable {
    fn insert(&mut self, record: RefreshTokenRecord) -> Result<(), RepositoryError> {
        if self.by_hash.contains_key(&record.token_hash) {
            return Err(RepositoryError::InvalidRecord(
                "refresh token hash already stored".to_string(),
            ));
        }
        self.by_hash.insert(record.token_hash.clone(), record.id);
        self.by_id.insert(record.id, record);
        Ok(())
    }
}

/// In-memory refresh-token store
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenRepository {
    table: Mutex<RefreshTable>,
}

impl InMemoryRefreshTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRefreshTokenRepository {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), RepositoryError> {
        self.table.lock().await.insert(record)
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        let table = self.table.lock().await;
        Ok(table
            .by_hash
            .get(token_hash)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        if let Some(record) = self.table.lock().await.by_id.get_mut(&id) {
            record.revoke(at);
        }
        Ok(())
    }

    async fn revoke_all_valid_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut table = self.table.lock().await;
        let mut revoked = 0;
        for record in table.by_id.values_mut() {
            if record.user_id == user_id && record.is_valid(now) {
                record.revoke(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn rotate(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, RepositoryError> {
        let mut table = self.table.lock().await;
        if table.by_hash.contains_key(&replacement.token_hash) {
            return Err(RepositoryError::InvalidRecord(
                "refresh token hash already stored".to_string(),
            ));
        }

        let Some(old) = table.by_id.get_mut(&old_id) else {
            return Ok(RotationOutcome::Rejected(RefreshTokenFailure::NotFound));
        };
        if old.revoked {
            return Ok(RotationOutcome::Rejected(RefreshTokenFailure::Revoked));
        }
        if old.is_expired(now) {
            return Ok(RotationOutcome::Rejected(RefreshTokenFailure::Expired));
        }
        old.revoke(now);

        table.insert(replacement)?;
        Ok(RotationOutcome::Rotated)
    }

    async fn count_valid_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let table = self.table.lock().await;
        Ok(table
            .by_id
            .values()
            .filter(|r| r.user_id == user_id && r.is_valid(now))
            .count() as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut table = self.table.lock().await;
        let expired: Vec<(Uuid, String)> = table
            .by_id
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| (r.id, r.token_hash.clone()))
            .collect();

        for (id, hash) in &expired {
            table.by_id.remove(id);
            table.by_hash.remove(hash);
        }
        Ok(expired.len() as u64)
    }
}

/// In-memory blacklist keyed by jti
#[derive(Debug, Default)]
pub struct InMemoryTokenBlacklistRepository {
    entries: DashMap<String, BlacklistEntry>,
}

impl InMemoryTokenBlacklistRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklistRepository for InMemoryTokenBlacklistRepository {
    async fn add(&self, entry: BlacklistEntry) -> Result<bool, RepositoryError> {
        let mut inserted = false;
        self.entries.entry(entry.jti.clone()).or_insert_with(|| {
            inserted = true;
            entry
        });
        Ok(inserted)
    }

    async fn contains(&self, jti: &str) -> Result<bool, RepositoryError> {
        Ok(self.entries.contains_key(jti))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{NewUser, UserRole};
    use chrono::Duration;
    use std::sync::Arc;

    fn new_user(email: &str) -> User {
        User::from_new(
            NewUser {
                email: email.to_string(),
                password_hash: "hash".to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                phone_number: None,
                roles: vec![UserRole::User],
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_user_create_rejects_duplicate_case_insensitively() {
        let repo = InMemoryUserRepository::new();
        repo.create(new_user("alice@example.com")).await.unwrap();

        let err = repo.create(new_user("ALICE@Example.com")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateEmail));

        assert!(repo.exists_by_login("  Alice@example.COM ").await.unwrap());
        assert!(!repo.exists_by_login("bob@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_logins_lock_account() {
        let repo = InMemoryUserRepository::new();
        let user = repo.create(new_user("alice@example.com")).await.unwrap();
        let now = Utc::now();
        let policy = LockoutPolicy {
            max_failed_attempts: 3,
            lock_duration: Duration::minutes(15),
        };

        for expected in 1..3 {
            let outcome = repo.record_failed_login(user.id, now, policy).await.unwrap();
            assert_eq!(outcome.failed_attempts, expected);
            assert!(outcome.locked_until.is_none());
        }

        let outcome = repo.record_failed_login(user.id, now, policy).await.unwrap();
        assert_eq!(outcome.locked_until, Some(now + Duration::minutes(15)));

        let stored = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.is_locked(now));

        repo.record_successful_login(user.id, now).await.unwrap();
        let stored = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!stored.is_locked(now));
        assert_eq!(stored.last_login, Some(now));
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let repo = InMemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let old = RefreshTokenRecord::new("old".into(), user_id, now, now + Duration::days(7));
        let old_id = old.id;
        repo.insert(old).await.unwrap();

        let first = repo
            .rotate(
                old_id,
                RefreshTokenRecord::new("new-1".into(), user_id, now, now + Duration::days(7)),
                now,
            )
            .await
            .unwrap();
        let second = repo
            .rotate(
                old_id,
                RefreshTokenRecord::new("new-2".into(), user_id, now, now + Duration::days(7)),
                now,
            )
            .await
            .unwrap();

        assert_eq!(first, RotationOutcome::Rotated);
        assert_eq!(second, RotationOutcome::Rejected(RefreshTokenFailure::Revoked));
        assert!(repo.find_by_hash("new-2").await.unwrap().is_none());
        assert_eq!(repo.count_valid_for_user(user_id, now).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotation_single_winner() {
        let repo = Arc::new(InMemoryRefreshTokenRepository::new());
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let old = RefreshTokenRecord::new("old".into(), user_id, now, now + Duration::days(7));
        let old_id = old.id;
        repo.insert(old).await.unwrap();

        let attempts = (0..16).map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.rotate(
                    old_id,
                    RefreshTokenRecord::new(
                        format!("new-{i}"),
                        user_id,
                        now,
                        now + Duration::days(7),
                    ),
                    now,
                )
                .await
                .unwrap()
            })
        });

        let outcomes = futures::future::join_all(attempts).await;
        let rotated = outcomes
            .into_iter()
            .filter(|o| matches!(o, Ok(RotationOutcome::Rotated)))
            .count();
        assert_eq!(rotated, 1);
        assert_eq!(repo.count_valid_for_user(user_id, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rotate_rejects_expired_and_missing() {
        let repo = InMemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let old = RefreshTokenRecord::new("old".into(), user_id, now - Duration::days(8), now - Duration::days(1));
        let old_id = old.id;
        repo.insert(old).await.unwrap();

        let replacement = || RefreshTokenRecord::new("new".into(), user_id, now, now + Duration::days(7));
        assert_eq!(
            repo.rotate(old_id, replacement(), now).await.unwrap(),
            RotationOutcome::Rejected(RefreshTokenFailure::Expired)
        );
        assert_eq!(
            repo.rotate(Uuid::new_v4(), replacement(), now).await.unwrap(),
            RotationOutcome::Rejected(RefreshTokenFailure::NotFound)
        );
    }

    #[tokio::test]
    async fn test_revoke_all_and_sweep() {
        let repo = InMemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        repo.insert(RefreshTokenRecord::new("a".into(), user_id, now, now + Duration::days(7)))
            .await
            .unwrap();
        repo.insert(RefreshTokenRecord::new("b".into(), user_id, now, now + Duration::days(7)))
            .await
            .unwrap();
        repo.insert(RefreshTokenRecord::new("c".into(), other, now, now + Duration::days(7)))
            .await
            .unwrap();
        repo.insert(RefreshTokenRecord::new("d".into(), user_id, now - Duration::days(8), now - Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(repo.revoke_all_valid_for_user(user_id, now).await.unwrap(), 2);
        assert_eq!(repo.count_valid_for_user(user_id, now).await.unwrap(), 0);
        assert_eq!(repo.count_valid_for_user(other, now).await.unwrap(), 1);

        assert_eq!(repo.delete_expired(now).await.unwrap(), 1);
        assert_eq!(repo.len().await, 3);
        // revoked rows survive until they expire
        assert!(repo.find_by_hash("a").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let repo = InMemoryRefreshTokenRepository::new();
        let now = Utc::now();
        let record = RefreshTokenRecord::new("a".into(), Uuid::new_v4(), now, now + Duration::days(7));
        let id = record.id;
        repo.insert(record).await.unwrap();

        repo.revoke(id, now).await.unwrap();
        repo.revoke(id, now + Duration::minutes(1)).await.unwrap();
        repo.revoke(Uuid::new_v4(), now).await.unwrap();

        let stored = repo.find_by_hash("a").await.unwrap().unwrap();
        assert_eq!(stored.revoked_at, Some(now));
    }

    #[tokio::test]
    async fn test_blacklist_add_is_idempotent_and_purges() {
        let repo = InMemoryTokenBlacklistRepository::new();
        let now = Utc::now();

        assert!(repo
            .add(BlacklistEntry::new("jti-1", now + Duration::minutes(10), now, None))
            .await
            .unwrap());
        assert!(!repo
            .add(BlacklistEntry::new("jti-1", now + Duration::minutes(10), now, None))
            .await
            .unwrap());
        repo.add(BlacklistEntry::new("jti-2", now - Duration::minutes(1), now, Some("logout".into())))
            .await
            .unwrap();

        assert!(repo.contains("jti-1").await.unwrap());
        assert_eq!(repo.count_active(now).await.unwrap(), 1);
        assert_eq!(repo.purge_expired(now).await.unwrap(), 1);
        assert!(!repo.contains("jti-2").await.unwrap());
        assert!(repo.contains("jti-1").await.unwrap());
    }
}
