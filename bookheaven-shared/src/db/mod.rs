/// Database layer for BookHeaven
///
/// Connection pooling and schema migrations. Table-level data access lives
/// in the `models` module at crate root.
///
/// # Example
///
/// ```no_run
/// use bookheaven_shared::db::pool::{create_pool, DatabaseConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::with_url(std::env::var("DATABASE_URL")?);
///     let pool = create_pool(config).await?;
///     bookheaven_shared::db::migrations::run_migrations(&pool).await?;
///     Ok(())
/// }
/// ```

pub mod migrations;
pub mod pool;
