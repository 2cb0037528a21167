//! Data models for authentication
//!
//! - User: account identity, credential hash and lockout state
//! - RefreshTokenRecord: persisted refresh token, keyed by the hash of its value
//! - BlacklistEntry: revoked access token, keyed by jti
//! - TokenPair: what login and refresh hand back to the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// User role
///
/// - Admin: full access
/// - User: regular member, assigned at registration
/// - Viewer: read-only access
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    User,
    Viewer,
}

impl UserRole {
    /// Role given to every newly registered account
    pub const DEFAULT: UserRole = UserRole::User;

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::User => "USER",
            UserRole::Viewer => "VIEWER",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            UserRole::Admin => "Administrator with full access",
            UserRole::User => "Regular member",
            UserRole::Viewer => "Read-only access",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ADMIN" => Ok(UserRole::Admin),
            "USER" => Ok(UserRole::User),
            "VIEWER" => Ok(UserRole::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trim and lower-case a login handle
pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// Normalized (trimmed, lower-cased) email; doubles as the login handle
    pub email: String,

    /// PHC-format credential hash. Never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub first_name: String,
    pub last_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    pub enabled: bool,
    pub roles: Vec<UserRole>,

    /// Consecutive failed logins since the last success
    #[serde(default)]
    pub failed_login_attempts: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Materialize a new account from a registration
    pub fn from_new(new_user: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_login(&new_user.email),
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            phone_number: new_user.phone_number,
            enabled: true,
            roles: new_user.roles,
            failed_login_attempts: 0,
            locked_until: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.as_str().to_string()).collect()
    }

    /// Sanitized view for responses
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            email: self.email.clone(),
            username: self.email.clone(),
            full_name: self.full_name(),
            phone_number: self.phone_number.clone(),
            enabled: self.enabled,
            roles: self
                .roles
                .iter()
                .map(|r| RoleView {
                    name: r.as_str().to_string(),
                    description: r.description().to_string(),
                })
                .collect(),
            created_at: self.created_at,
            last_login_at: self.last_login,
        }
    }
}

/// Registration input after validation and hashing
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub roles: Vec<UserRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleView {
    pub name: String,
    pub description: String,
}

/// Public user representation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub enabled: bool,
    pub roles: Vec<RoleView>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Persisted refresh token
///
/// Only the SHA-256 of the bearer string is stored. A record is usable iff it
/// is not revoked and `now < expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(
        token_hash: String,
        user_id: Uuid,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_hash,
            user_id,
            expires_at,
            revoked: false,
            revoked_at: None,
            created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Mark revoked; a second call keeps the first timestamp
    pub fn revoke(&mut self, now: DateTime<Utc>) {
        if !self.revoked {
            self.revoked = true;
            self.revoked_at = Some(now);
        }
    }
}

/// A freshly issued refresh token: the bearer string plus its stored row
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshTokenRecord,
}

/// Revoked access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub jti: String,
    /// Copied from the token's own `exp`, so the row is purgeable afterwards
    pub expires_at: DateTime<Utc>,
    pub blacklisted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BlacklistEntry {
    pub fn new(
        jti: impl Into<String>,
        expires_at: DateTime<Utc>,
        blacklisted_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        Self {
            jti: jti.into(),
            expires_at,
            blacklisted_at,
            reason,
        }
    }
}

/// Access and refresh token handed back by login and refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds
    pub expires_in: i64,
}

impl TokenPair {
    pub fn bearer(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_user() -> User {
        User::from_new(
            NewUser {
                email: "  Alice@Example.COM ".to_string(),
                password_hash: "$argon2id$secret_hash".to_string(),
                first_name: "Alice".to_string(),
                last_name: " Liddell ".to_string(),
                phone_number: None,
                roles: vec![UserRole::DEFAULT],
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_user_role_conversion() {
        assert_eq!(UserRole::Admin.as_str(), "ADMIN");
        assert_eq!("user".parse::<UserRole>(), Ok(UserRole::User));
        assert_eq!(" Viewer ".parse::<UserRole>(), Ok(UserRole::Viewer));
        assert!("root".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_user_creation_normalizes_email() {
        let user = sample_user();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.full_name(), "Alice Liddell");
        assert!(user.enabled);
        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.role_names(), vec!["USER".to_string()]);
    }

    #[test]
    fn test_user_is_locked() {
        let now = Utc::now();
        let mut user = sample_user();
        assert!(!user.is_locked(now));

        user.locked_until = Some(now + Duration::hours(1));
        assert!(user.is_locked(now));

        user.locked_until = Some(now - Duration::hours(1));
        assert!(!user.is_locked(now));
    }

    #[test]
    fn test_user_to_public_hides_hash() {
        let user = sample_user();
        let public = user.to_public();

        assert_eq!(public.email, user.email);
        assert_eq!(public.roles[0].name, "USER");

        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("secret_hash"));
        assert!(json.contains("fullName"));

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret_hash"));
    }

    #[test]
    fn test_refresh_token_validity() {
        let now = Utc::now();
        let mut record =
            RefreshTokenRecord::new("hash".to_string(), Uuid::new_v4(), now, now + Duration::days(7));

        assert!(record.is_valid(now));
        assert!(!record.is_valid(now + Duration::days(7)));

        record.revoke(now);
        assert!(!record.is_valid(now));
        assert_eq!(record.revoked_at, Some(now));

        record.revoke(now + Duration::minutes(5));
        assert_eq!(record.revoked_at, Some(now));
    }

    #[test]
    fn test_token_pair_serializes_camel_case() {
        let pair = TokenPair::bearer("a".to_string(), "r".to_string(), 900);
        let json = serde_json::to_value(&pair).unwrap();
        assert_eq!(json["tokenType"], "Bearer");
        assert_eq!(json["expiresIn"], 900);
        assert_eq!(json["accessToken"], "a");
    }
}
