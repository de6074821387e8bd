/// Payments: hosted checkout sessions and their webhooks.
///
/// Checkout is delegated to Stripe. The API creates a session for a pending
/// order and redirects the customer; Stripe reports the outcome through a
/// signed webhook, which moves the order to `paid` or `cancelled`.

pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::PricedLine;

pub use stripe::StripeClient;
pub use webhook::{CheckoutSessionEvent, WebhookEvent};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Invalid webhook signature: {0}")]
    Signature(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Payment provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Payment provider request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Everything needed to open a hosted checkout page for one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub order_id: Uuid,
    pub currency: String,
    pub lines: Vec<PricedLine>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Hosted payment page
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Verifies a webhook delivery and parses the event it carries
    fn parse_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, PaymentError>;
}
