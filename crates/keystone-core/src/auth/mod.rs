//! Authentication and token lifecycle
//!
//! - Password policy and credential hashing
//! - Signed access/refresh tokens
//! - Refresh-token persistence with single-use rotation
//! - Access-token blacklist
//! - Token-bucket rate limiting
//! - Request authentication and the service behind the auth endpoints
//! - Repository traits with in-memory and PostgreSQL implementations

pub mod authenticator;
pub mod blacklist;
pub mod credentials;
pub mod jwt;
pub mod memory;
pub mod models;
pub mod password;
pub mod policy;
pub mod postgres;
pub mod rate_limit;
pub mod refresh;
pub mod repository;
pub mod service;

pub use authenticator::{extract_bearer, AuthenticatedUser, RequestAuthenticator};
pub use blacklist::TokenBlacklist;
pub use credentials::{CredentialAuthenticator, CredentialFailure, PasswordAuthenticator};
pub use jwt::{Claims, JwtError, TokenCodec, TokenType, VerificationError};
pub use memory::{
    InMemoryRefreshTokenRepository, InMemoryTokenBlacklistRepository, InMemoryUserRepository,
};
pub use models::{
    normalize_login, BlacklistEntry, IssuedRefreshToken, NewUser, RefreshTokenRecord, RoleView,
    TokenPair, User, UserPublic, UserRole,
};
pub use password::{Argon2Hasher, CredentialHasher, PasswordConfig, PasswordError};
pub use policy::{PolicyVerdict, PolicyViolation};
pub use rate_limit::{resolve_client_id, EndpointKey, RateDecision, RateLimiter};
pub use refresh::RefreshTokenStore;
pub use repository::{
    hash_token, LockoutPolicy, RefreshTokenRepository, RepositoryError, RotationOutcome,
    TokenBlacklistRepository, UserRepository,
};
pub use service::{AuthDependencies, AuthService, PurgeReport, RegistrationRequest};
