/// Token bucket rate limiting backed by Redis
///
/// Each (route class, user) pair gets a bucket stored as a hash at
/// `ratelimit:{class}:{user_id}`. Refill and consumption happen in a single
/// Lua script so concurrent API instances never double-spend a token. Idle
/// buckets expire after two minutes.
///
/// # Limits
///
/// | Class      | Customer     | Admin         |
/// |------------|--------------|---------------|
/// | `write`    | 30 / minute  | 300 / minute  |
/// | `checkout` | 5 / minute   | 20 / minute   |

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::client::{RedisClient, RedisClientError};
use crate::auth::middleware::Role;

const BUCKET_TTL_SECS: u64 = 120;

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1])
local last_refill = tonumber(bucket[2])

if not tokens then
    tokens = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + (elapsed * refill_rate))

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('HSET', key, 'tokens', tokens, 'last_refill', now)
redis.call('EXPIRE', key, ttl)

local retry_after = 0
if allowed == 0 then
    retry_after = math.ceil((1 - tokens) / refill_rate)
end
local reset_after = math.ceil((capacity - tokens) / refill_rate)

return {allowed, math.floor(tokens), retry_after, reset_after}
"#;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit backend error: {0}")]
    Backend(#[from] RedisClientError),
}

/// Groups of routes that share a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    /// Reviews, likes and shelf changes
    Write,
    Checkout,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Write => "write",
            RouteClass::Checkout => "checkout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub requests_per_minute: u32,

    /// Tokens per second
    pub refill_rate: f64,

    /// Burst size
    pub bucket_capacity: u32,
}

impl RateLimit {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests_per_minute: requests,
            refill_rate: requests as f64 / 60.0,
            bucket_capacity: requests,
        }
    }

    pub fn for_class(class: RouteClass, role: Role) -> Self {
        match (class, role) {
            (RouteClass::Write, Role::Customer) => Self::per_minute(30),
            (RouteClass::Write, Role::Admin) => Self::per_minute(300),
            (RouteClass::Checkout, Role::Customer) => Self::per_minute(5),
            (RouteClass::Checkout, Role::Admin) => Self::per_minute(20),
        }
    }
}

/// Outcome of one bucket check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until a token is available (0 when allowed)
    pub retry_after: u64,
    /// Unix timestamp when the bucket is full again
    pub reset_at: u64,
}

pub fn bucket_key(class: RouteClass, user_id: &str) -> String {
    format!("ratelimit:{}:{}", class.as_str(), user_id)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct RateLimiter {
    client: RedisClient,
}

impl RateLimiter {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    /// Takes one token from the caller's bucket
    pub async fn check(
        &self,
        class: RouteClass,
        user_id: &str,
        limit: RateLimit,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let mut conn = self.client.get_connection();
        let now = unix_now();

        let script = redis::Script::new(TOKEN_BUCKET_SCRIPT);
        let mut invocation = script.key(bucket_key(class, user_id));
        invocation
            .arg(limit.bucket_capacity)
            .arg(limit.refill_rate)
            .arg(now)
            .arg(BUCKET_TTL_SECS);

        let result: Vec<i64> = tokio::time::timeout(
            self.client.command_timeout(),
            invocation.invoke_async(&mut conn),
        )
        .await
        .map_err(|_| RedisClientError::Timeout)?
        .map_err(RedisClientError::from)?;

        let field = |i: usize| result.get(i).copied().unwrap_or_default().max(0) as u64;

        Ok(RateLimitDecision {
            allowed: field(0) == 1,
            limit: limit.requests_per_minute,
            remaining: field(1) as u32,
            retry_after: field(2),
            reset_at: now + field(3),
        })
    }
}
