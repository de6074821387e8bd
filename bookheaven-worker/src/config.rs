/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 5)
/// - `WORKER_POLL_INTERVAL_SECS`: Pause between sweeps (default: 30)
/// - `WORKER_BATCH_SIZE`: Rows handled per sweep and job (default: 50)
/// - `PENDING_ORDER_TTL_MINUTES`: Age at which an unpaid order is cancelled
///   (default: 1500, longer than the payment provider's 24 hour session)
/// - `UPLOADTHING_SECRET` / `UPLOADTHING_API_URL`: Blob storage; orphaned
///   blobs are left queued without a secret

use bookheaven_shared::storage::DEFAULT_UPLOADTHING_API_URL;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BATCH_SIZE: i64 = 50;
pub const DEFAULT_PENDING_ORDER_TTL_MINUTES: i64 = 25 * 60;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub pending_order_ttl: chrono::Duration,
    pub storage_api_url: String,
    pub storage_secret: Option<String>,
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parses `name` when set, falling back to `default`
fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        None => Ok(default),
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Fails when `DATABASE_URL` is missing, a number does not parse, or the
    /// batch size or TTL is not positive.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let poll_secs: u64 = parse_var("WORKER_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let batch_size: i64 = parse_var("WORKER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        let ttl_minutes: i64 = parse_var("PENDING_ORDER_TTL_MINUTES", DEFAULT_PENDING_ORDER_TTL_MINUTES)?;

        if batch_size < 1 {
            anyhow::bail!("WORKER_BATCH_SIZE must be at least 1");
        }
        if ttl_minutes < 1 {
            anyhow::bail!("PENDING_ORDER_TTL_MINUTES must be at least 1");
        }

        Ok(Self {
            database_url,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            batch_size,
            pending_order_ttl: chrono::Duration::minutes(ttl_minutes),
            storage_api_url: optional_var("UPLOADTHING_API_URL")
                .unwrap_or_else(|| DEFAULT_UPLOADTHING_API_URL.to_string()),
            storage_secret: optional_var("UPLOADTHING_SECRET"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("BOOKHEAVEN_WORKER_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_reports_name() {
        env::set_var("BOOKHEAVEN_WORKER_TEST_BAD_VAR", "soon");
        let err = parse_var::<u64>("BOOKHEAVEN_WORKER_TEST_BAD_VAR", 1).unwrap_err();
        assert!(err.to_string().contains("BOOKHEAVEN_WORKER_TEST_BAD_VAR"));
        env::remove_var("BOOKHEAVEN_WORKER_TEST_BAD_VAR");
    }

    #[test]
    fn test_default_ttl_outlives_checkout_session() {
        assert!(DEFAULT_PENDING_ORDER_TTL_MINUTES > 24 * 60);
    }
}
