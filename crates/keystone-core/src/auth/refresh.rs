//! Refresh-token lifecycle
//!
//! Issues signed REFRESH tokens, persists them by hash and redeems them
//! through the repository's atomic rotate. A token string maps to exactly one
//! stored row.

use super::jwt::TokenCodec;
use super::models::{IssuedRefreshToken, RefreshTokenRecord, User};
use super::repository::{hash_token, RefreshTokenRepository, RotationOutcome};
use crate::clock::Clock;
use crate::error::{AuthError, RefreshTokenFailure, Result};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct RefreshTokenStore {
    repo: Arc<dyn RefreshTokenRepository>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenStore {
    pub fn new(
        repo: Arc<dyn RefreshTokenRepository>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repo, codec, clock }
    }

    fn mint(&self, user: &User) -> Result<IssuedRefreshToken> {
        let token = self.codec.issue_refresh(user)?;
        let now = self.clock.now();
        let record = RefreshTokenRecord::new(
            hash_token(&token),
            user.id,
            now,
            now + self.codec.refresh_ttl(),
        );
        Ok(IssuedRefreshToken { token, record })
    }

    /// Sign and persist a new refresh token for `user`
    pub async fn issue(&self, user: &User) -> Result<IssuedRefreshToken> {
        let issued = self.mint(user)?;
        self.repo.insert(issued.record.clone()).await?;
        debug!(user_id = %user.id, "Issued refresh token");
        Ok(issued)
    }

    pub async fn find_by_value(&self, token: &str) -> Result<RefreshTokenRecord> {
        self.repo
            .find_by_hash(&hash_token(token))
            .await?
            .ok_or(AuthError::InvalidRefreshToken(RefreshTokenFailure::NotFound))
    }

    /// Revoke one token; revoking twice is a no-op
    pub async fn revoke(&self, record: &RefreshTokenRecord) -> Result<()> {
        self.repo.revoke(record.id, self.clock.now()).await?;
        Ok(())
    }

    pub async fn revoke_all_valid_for_user(&self, user_id: Uuid) -> Result<u64> {
        Ok(self
            .repo
            .revoke_all_valid_for_user(user_id, self.clock.now())
            .await?)
    }

    /// Redeem `old` and hand back its replacement.
    ///
    /// Fails with `InvalidRefreshToken(Revoked)` if another caller redeemed
    /// it first.
    pub async fn rotate(&self, old: &RefreshTokenRecord, user: &User) -> Result<IssuedRefreshToken> {
        let issued = self.mint(user)?;
        match self
            .repo
            .rotate(old.id, issued.record.clone(), self.clock.now())
            .await?
        {
            RotationOutcome::Rotated => Ok(issued),
            RotationOutcome::Rejected(failure) => Err(AuthError::InvalidRefreshToken(failure)),
        }
    }

    pub async fn count_valid_for_user(&self, user_id: Uuid) -> Result<u64> {
        Ok(self
            .repo
            .count_valid_for_user(user_id, self.clock.now())
            .await?)
    }

    pub async fn delete_expired(&self) -> Result<u64> {
        Ok(self.repo.delete_expired(self.clock.now()).await?)
    }
}
