//! Access-token blacklist
//!
//! Revoked access tokens are recorded by jti with the token's own expiry, so
//! an entry only needs to live as long as the token would have.

use super::models::BlacklistEntry;
use super::repository::TokenBlacklistRepository;
use crate::clock::Clock;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct TokenBlacklist {
    repo: Arc<dyn TokenBlacklistRepository>,
    clock: Arc<dyn Clock>,
}

impl TokenBlacklist {
    pub fn new(repo: Arc<dyn TokenBlacklistRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Record `jti` as revoked. Adding an existing jti is a no-op.
    pub async fn add(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<bool> {
        let entry = BlacklistEntry::new(
            jti,
            expires_at,
            self.clock.now(),
            reason.map(str::to_string),
        );
        Ok(self.repo.add(entry).await?)
    }

    pub async fn is_blacklisted(&self, jti: &str) -> Result<bool> {
        Ok(self.repo.contains(jti).await?)
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.repo.purge_expired(now).await?)
    }

    pub async fn count_active(&self) -> Result<u64> {
        Ok(self.repo.count_active(self.clock.now()).await?)
    }
}
