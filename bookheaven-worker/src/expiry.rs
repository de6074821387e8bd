/// Expiry of abandoned checkouts
///
/// Checkout reserves stock when it creates the pending order. If the
/// customer walks away and the provider's expiry webhook never arrives, the
/// order would hold that stock forever. Orders still pending after the TTL
/// are cancelled here and their stock returned.
///
/// The default TTL outlives the provider's checkout session, so an order is
/// only expired once it can no longer be paid through its session.

use bookheaven_shared::models::order::Order;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct OrderExpiry {
    db: PgPool,
    ttl: chrono::Duration,
    batch_size: i64,
}

impl OrderExpiry {
    pub fn new(db: PgPool, ttl: chrono::Duration, batch_size: i64) -> Self {
        OrderExpiry { db, ttl, batch_size }
    }

    /// Orders created before this instant are stale
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.ttl
    }

    /// Cancels one batch of stale pending orders, returning how many
    pub async fn expire(&self) -> Result<usize, sqlx::Error> {
        let cutoff = self.cutoff(Utc::now());
        let ids = Order::expire_stale_pending(&self.db, cutoff, self.batch_size).await?;

        for id in &ids {
            tracing::info!(order_id = %id, cutoff = %cutoff, "Expired unpaid order");
        }

        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn test_cutoff_subtracts_ttl() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/unused")
            .unwrap();
        let expiry = OrderExpiry::new(pool, chrono::Duration::minutes(90), 10);

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            expiry.cutoff(now),
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 0).unwrap()
        );
    }
}
