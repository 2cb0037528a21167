//! PostgreSQL repositories (sqlx)
//!
//! Refresh tokens are stored by hash. Rotation is a conditional
//! `UPDATE ... WHERE revoked = FALSE AND expires_at > now` in the same
//! transaction as the insert of the replacement row, so concurrent redemptions
//! of one token serialize on the row lock and only the first one matches.

use super::models::{BlacklistEntry, RefreshTokenRecord, User, UserRole};
use super::repository::{
    FailedLoginOutcome, LockoutPolicy, RefreshTokenRepository, RepositoryError, RotationOutcome,
    TokenBlacklistRepository, UserRepository,
};
use crate::config::DatabaseConfig;
use crate::error::RefreshTokenFailure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
pub use sqlx::PgPool;
use sqlx::Row;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        phone_number TEXT,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        roles TEXT[] NOT NULL DEFAULT '{}',
        failed_login_attempts INTEGER NOT NULL DEFAULT 0,
        locked_until TIMESTAMPTZ,
        last_login TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id UUID PRIMARY KEY,
        token_hash TEXT NOT NULL UNIQUE,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked BOOLEAN NOT NULL DEFAULT FALSE,
        revoked_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user_id ON refresh_tokens (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires_at ON refresh_tokens (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS token_blacklist (
        jti TEXT PRIMARY KEY,
        expires_at TIMESTAMPTZ NOT NULL,
        blacklisted_at TIMESTAMPTZ NOT NULL,
        reason TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_token_blacklist_expires_at ON token_blacklist (expires_at)",
];

/// Open a connection pool
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres_pool_size)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.postgres_url)
        .await?;
    Ok(pool)
}

/// Create tables and indexes if they do not exist
pub async fn ensure_schema(pool: &PgPool) -> Result<(), RepositoryError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Authentication schema ready");
    Ok(())
}

fn map_insert_error(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepositoryError::DuplicateEmail;
        }
    }
    err.into()
}

fn user_from_row(row: &PgRow) -> Result<User, RepositoryError> {
    let role_names: Vec<String> = row.try_get("roles")?;
    let roles = role_names
        .iter()
        .map(|r| r.parse::<UserRole>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(RepositoryError::InvalidRecord)?;

    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone_number: row.try_get("phone_number")?,
        enabled: row.try_get("enabled")?,
        roles,
        failed_login_attempts: row.try_get("failed_login_attempts")?,
        locked_until: row.try_get("locked_until")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn refresh_from_row(row: &PgRow) -> Result<RefreshTokenRecord, RepositoryError> {
    Ok(RefreshTokenRecord {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        user_id: row.try_get("user_id")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone_number, \
     enabled, roles, failed_login_attempts, locked_until, last_login, created_at, updated_at";

const REFRESH_COLUMNS: &str = "id, token_hash, user_id, expires_at, revoked, revoked_at, created_at";

/// User repository backed by the `users` table
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, phone_number,
                               enabled, roles, failed_login_attempts, locked_until, last_login,
                               created_at, updated_at)
            VALUES ($1, LOWER(TRIM($2)), $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(user.enabled)
        .bind(user.role_names())
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(user.last_login)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        self.find_by_id(user.id)
            .await?
            .ok_or(RepositoryError::UserNotFound)
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, RepositoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = LOWER(TRIM($1))");
        let row = sqlx::query(&query)
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn record_successful_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET last_login = $2, failed_login_attempts = 0, locked_until = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::UserNotFound);
        }
        Ok(())
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        policy: LockoutPolicy,
    ) -> Result<FailedLoginOutcome, RepositoryError> {
        let lock_until = at + policy.lock_duration;
        let row = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = CASE WHEN failed_login_attempts + 1 >= $3
                                             THEN 0 ELSE failed_login_attempts + 1 END,
                locked_until = CASE WHEN failed_login_attempts + 1 >= $3
                                    THEN $4 ELSE locked_until END,
                updated_at = $2
            WHERE id = $1
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(policy.max_failed_attempts)
        .bind(lock_until)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::UserNotFound)?;

        let failed_attempts: i32 = row.try_get("failed_login_attempts")?;
        // the counter only returns to zero when this failure tripped the lock
        let locked_until = if failed_attempts == 0 {
            row.try_get("locked_until")?
        } else {
            None
        };

        Ok(FailedLoginOutcome {
            failed_attempts,
            locked_until,
        })
    }
}

/// Refresh-token repository backed by the `refresh_tokens` table
#[derive(Clone)]
pub struct PgRefreshTokenRepository {
    pool: PgPool,
}

impl PgRefreshTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_REFRESH: &str = r#"
    INSERT INTO refresh_tokens (id, token_hash, user_id, expires_at, revoked, revoked_at, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepository {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<(), RepositoryError> {
        sqlx::query(INSERT_REFRESH)
            .bind(record.id)
            .bind(&record.token_hash)
            .bind(record.user_id)
            .bind(record.expires_at)
            .bind(record.revoked)
            .bind(record.revoked_at)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        let query = format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(refresh_from_row).transpose()
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2 WHERE id = $1 AND revoked = FALSE",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_all_valid_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2
            WHERE user_id = $1 AND revoked = FALSE AND expires_at > $2
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rotate(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked = TRUE, revoked_at = $2
            WHERE id = $1 AND revoked = FALSE AND expires_at > $2
            "#,
        )
        .bind(old_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let revoked: Option<bool> =
                sqlx::query_scalar("SELECT revoked FROM refresh_tokens WHERE id = $1")
                    .bind(old_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            let failure = match revoked {
                None => RefreshTokenFailure::NotFound,
                Some(true) => RefreshTokenFailure::Revoked,
                Some(false) => RefreshTokenFailure::Expired,
            };
            return Ok(RotationOutcome::Rejected(failure));
        }

        sqlx::query(INSERT_REFRESH)
            .bind(replacement.id)
            .bind(&replacement.token_hash)
            .bind(replacement.user_id)
            .bind(replacement.expires_at)
            .bind(replacement.revoked)
            .bind(replacement.revoked_at)
            .bind(replacement.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(RotationOutcome::Rotated)
    }

    async fn count_valid_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = $1 AND revoked = FALSE AND expires_at > $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Blacklist backed by the `token_blacklist` table (primary key on jti)
#[derive(Clone)]
pub struct PgTokenBlacklistRepository {
    pool: PgPool,
}

impl PgTokenBlacklistRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenBlacklistRepository for PgTokenBlacklistRepository {
    async fn add(&self, entry: BlacklistEntry) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_blacklist (jti, expires_at, blacklisted_at, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(&entry.jti)
        .bind(entry.expires_at)
        .bind(entry.blacklisted_at)
        .bind(&entry.reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn contains(&self, jti: &str) -> Result<bool, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM token_blacklist WHERE jti = $1)")
                .bind(jti)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM token_blacklist WHERE expires_at > $1")
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}
