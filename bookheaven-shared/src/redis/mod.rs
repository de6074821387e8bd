/// Redis integration
///
/// Redis is optional: it backs the per-user rate limiter when `REDIS_URL`
/// is set. Without it the API runs with rate limiting disabled.
///
/// - [`client`]: connection management and health checks
/// - [`rate_limit`]: atomic token buckets

pub mod client;
pub mod rate_limit;

pub use client::{RedisClient, RedisClientError, RedisConfig};
pub use rate_limit::{RateLimit, RateLimitDecision, RateLimitError, RateLimiter, RouteClass};
