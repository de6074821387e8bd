/// Configuration management for the API server
///
/// This module loads configuration from environment variables and provides
/// a type-safe configuration struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `API_HOST` / `API_PORT`: Bind address (default: 0.0.0.0:8080)
/// - `CORS_ORIGINS`: Comma-separated allowed origins, `*` for any (default: `*`)
/// - `PRODUCTION`: Enables HSTS and strict CORS checks (default: false)
/// - `CLERK_JWT_KEY`: PEM public key for session tokens (RS256)
/// - `SESSION_SECRET`: HMAC secret for session tokens (HS256, development)
/// - `CLERK_ISSUER`: Expected `iss` claim (optional)
/// - `CLERK_SECRET_KEY` / `CLERK_API_URL`: Identity provider backend API
/// - `STRIPE_SECRET_KEY` / `STRIPE_WEBHOOK_SECRET` / `STRIPE_API_URL`
/// - `CHECKOUT_SUCCESS_URL` / `CHECKOUT_CANCEL_URL`: Redirects after checkout
///   (default: derived from `PUBLIC_URL`, itself defaulting to http://localhost:3000)
/// - `UPLOADTHING_SECRET` / `UPLOADTHING_API_URL`: Blob storage
/// - `REDIS_URL`: Enables rate limiting when set
///
/// One of `CLERK_JWT_KEY` or `SESSION_SECRET` is required.
///
/// # Example
///
/// ```no_run
/// use bookheaven_api::config::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}:{}", config.api.host, config.api.port);
/// # Ok(())
/// # }
/// ```

use bookheaven_shared::auth::jwt::SessionKey;
use bookheaven_shared::identity::DEFAULT_CLERK_API_URL;
use bookheaven_shared::payments::stripe::DEFAULT_STRIPE_API_URL;
use bookheaven_shared::storage::DEFAULT_UPLOADTHING_API_URL;
use serde::{Deserialize, Serialize};
use std::env;

const MIN_SESSION_SECRET_LEN: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub identity: IdentityConfig,
    pub stripe: StripeConfig,
    pub storage: StorageConfig,

    /// Rate limiting is disabled when unset
    pub redis_url: Option<String>,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Enables HSTS
    pub production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// How session tokens are verified
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// PEM-encoded RSA public key; wins over `session_secret`
    pub jwt_public_key: Option<String>,

    /// HMAC secret, for development and tests
    pub session_secret: Option<String>,

    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub api_url: String,

    /// `/v1/me` only reports token claims without it
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    pub api_url: String,

    /// Checkout and webhooks are unavailable without both keys
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,

    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub api_url: String,

    /// Blob deletion is skipped without it
    pub secret: Option<String>,
}

/// Reads an optional variable, treating blank values as unset
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Splits `CORS_ORIGINS`, dropping empty entries
pub fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DATABASE_URL` is missing
    /// - Neither `CLERK_JWT_KEY` nor `SESSION_SECRET` is set
    /// - A numeric variable does not parse
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let cors_origins = parse_origins(&env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()));
        let production = optional_var("PRODUCTION").is_some_and(|v| parse_bool(&v));

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()?;

        let auth = AuthConfig {
            jwt_public_key: optional_var("CLERK_JWT_KEY"),
            session_secret: optional_var("SESSION_SECRET"),
            issuer: optional_var("CLERK_ISSUER"),
        };

        if auth.jwt_public_key.is_none() && auth.session_secret.is_none() {
            anyhow::bail!("CLERK_JWT_KEY or SESSION_SECRET environment variable is required");
        }

        let public_url = optional_var("PUBLIC_URL").unwrap_or_else(|| "http://localhost:3000".to_string());

        let config = Self {
            api: ApiConfig {
                host: api_host,
                port: api_port,
                cors_origins,
                production,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            auth,
            identity: IdentityConfig {
                api_url: optional_var("CLERK_API_URL").unwrap_or_else(|| DEFAULT_CLERK_API_URL.to_string()),
                secret_key: optional_var("CLERK_SECRET_KEY"),
            },
            stripe: StripeConfig {
                api_url: optional_var("STRIPE_API_URL").unwrap_or_else(|| DEFAULT_STRIPE_API_URL.to_string()),
                secret_key: optional_var("STRIPE_SECRET_KEY"),
                webhook_secret: optional_var("STRIPE_WEBHOOK_SECRET"),
                success_url: optional_var("CHECKOUT_SUCCESS_URL")
                    .unwrap_or_else(|| format!("{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}", public_url)),
                cancel_url: optional_var("CHECKOUT_CANCEL_URL")
                    .unwrap_or_else(|| format!("{}/cart", public_url)),
            },
            storage: StorageConfig {
                api_url: optional_var("UPLOADTHING_API_URL")
                    .unwrap_or_else(|| DEFAULT_UPLOADTHING_API_URL.to_string()),
                secret: optional_var("UPLOADTHING_SECRET"),
            },
            redis_url: optional_var("REDIS_URL"),
        };

        config.session_key()?;
        Ok(config)
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Builds the session verification key
    ///
    /// # Errors
    ///
    /// Fails for an unparsable PEM key, a short HMAC secret, or when neither
    /// is configured.
    pub fn session_key(&self) -> anyhow::Result<SessionKey> {
        if let Some(pem) = &self.auth.jwt_public_key {
            return Ok(SessionKey::from_rsa_pem(pem)?);
        }

        match &self.auth.session_secret {
            Some(secret) if secret.len() >= MIN_SESSION_SECRET_LEN => Ok(SessionKey::hmac(secret.clone())),
            Some(_) => anyhow::bail!(
                "SESSION_SECRET must be at least {} characters long",
                MIN_SESSION_SECRET_LEN
            ),
            None => anyhow::bail!("No session key configured"),
        }
    }

    /// Whether any origin may call the API
    pub fn allows_any_origin(&self) -> bool {
        self.api.cors_origins.iter().any(|origin| origin == "*")
    }
}
