//! Request middleware
//!
//! Author: hephaex@gmail.com

pub mod auth;
pub mod rate_limit;

pub use auth::auth_middleware;
pub use rate_limit::rate_limit_middleware;
