//! Per-client, per-endpoint token-bucket admission control
//!
//! Each `(client, endpoint)` pair gets its own bucket, created full on first
//! use. Buckets refill continuously at `refill_tokens / refill_interval`, so a
//! denied caller is told exactly how long until the next whole token, not
//! when some fixed window resets.
//!
//! Buckets live in process memory and reset on restart. Rate limiting across
//! several instances would need a shared counter.

use crate::config::{EndpointLimitConfig, RateLimitConfig};
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::Instant;

/// Client identifier used when nothing better is available
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Logical endpoint a bucket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKey {
    Login,
    Register,
    PasswordReset,
    Default,
}

impl EndpointKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::PasswordReset => "password_reset",
            Self::Default => "default",
        }
    }

    /// Map a request path to its rate-limited endpoint, if it has one
    pub fn for_path(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        if path.ends_with("/auth/login") {
            Some(Self::Login)
        } else if path.ends_with("/auth/register") {
            Some(Self::Register)
        } else if path.ends_with("/auth/forgot-password") {
            Some(Self::PasswordReset)
        } else {
            None
        }
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Bucket parameters in integer units.
///
/// One token is worth `interval_nanos` units and each elapsed nanosecond adds
/// `refill_tokens` units, which keeps refill and wait-time arithmetic exact.
#[derive(Debug, Clone, Copy)]
struct BucketLimit {
    capacity: u32,
    refill_tokens: u128,
    interval_nanos: u128,
}

impl BucketLimit {
    fn token_cost(&self) -> u128 {
        self.interval_nanos.max(1)
    }

    fn capacity_units(&self) -> u128 {
        u128::from(self.capacity) * self.token_cost()
    }
}

impl From<&EndpointLimitConfig> for BucketLimit {
    fn from(config: &EndpointLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_tokens: u128::from(config.refill_tokens),
            interval_nanos: config.refill_interval().as_nanos(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    units: u128,
    last_refill: Instant,
}

impl Bucket {
    fn full(limit: &BucketLimit, now: Instant) -> Self {
        Self {
            units: limit.capacity_units(),
            last_refill: now,
        }
    }

    fn refill(&mut self, limit: &BucketLimit, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_nanos();
        self.units = self
            .units
            .saturating_add(elapsed.saturating_mul(limit.refill_tokens))
            .min(limit.capacity_units());
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

/// Token-bucket rate limiter keyed by `(client, endpoint)`
#[derive(Debug)]
pub struct RateLimiter {
    login: BucketLimit,
    register: BucketLimit,
    password_reset: BucketLimit,
    default: BucketLimit,
    buckets: DashMap<(String, EndpointKey), Bucket>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            login: (&config.login).into(),
            register: (&config.register).into(),
            password_reset: (&config.password_reset).into(),
            default: (&config.default).into(),
            buckets: DashMap::new(),
        }
    }

    fn limit_for(&self, endpoint: EndpointKey) -> &BucketLimit {
        match endpoint {
            EndpointKey::Login => &self.login,
            EndpointKey::Register => &self.register,
            EndpointKey::PasswordReset => &self.password_reset,
            EndpointKey::Default => &self.default,
        }
    }

    pub fn try_acquire(&self, client_id: &str, endpoint: EndpointKey) -> RateDecision {
        self.try_acquire_at(client_id, endpoint, Instant::now())
    }

    /// Take one token from the bucket at `now`.
    ///
    /// The refill and the decrement happen under the map's per-key lock.
    pub fn try_acquire_at(&self, client_id: &str, endpoint: EndpointKey, now: Instant) -> RateDecision {
        let limit = *self.limit_for(endpoint);
        let mut bucket = self
            .buckets
            .entry((client_id.to_string(), endpoint))
            .or_insert_with(|| Bucket::full(&limit, now));

        bucket.refill(&limit, now);

        let cost = limit.token_cost();
        if bucket.units >= cost {
            bucket.units -= cost;
            return RateDecision::Allowed {
                remaining: u32::try_from(bucket.units / cost).unwrap_or(u32::MAX),
            };
        }

        let retry_after_secs = if limit.refill_tokens > 0 {
            let deficit = cost - bucket.units;
            let wait_nanos = deficit.div_ceil(limit.refill_tokens);
            u64::try_from(wait_nanos.div_ceil(1_000_000_000))
                .unwrap_or(u64::MAX)
                .max(1)
        } else {
            u64::try_from(limit.interval_nanos / 1_000_000_000)
                .unwrap_or(u64::MAX)
                .max(1)
        };
        RateDecision::Denied { retry_after_secs }
    }

    /// Drop buckets that have refilled to capacity by `now`; they behave
    /// exactly like a bucket that was never created.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|(_, endpoint), bucket| {
            let limit = self.limit_for(*endpoint);
            let mut projected = *bucket;
            projected.refill(limit, now);
            projected.units < limit.capacity_units()
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Resolve the client identifier for rate limiting and audit.
///
/// Order: first hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket
/// address, then `"unknown"`.
pub fn resolve_client_id(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    socket: Option<IpAddr>,
) -> String {
    if let Some(first) = forwarded_for
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }

    if let Some(ip) = real_ip.map(str::trim).filter(|ip| !ip.is_empty()) {
        return ip.to_string();
    }

    socket
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
