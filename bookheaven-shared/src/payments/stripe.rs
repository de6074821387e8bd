/// Stripe REST client for hosted checkout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::webhook::{parse_event, verify_webhook, WebhookEvent, DEFAULT_TOLERANCE_SECS};
use super::{CheckoutRequest, CheckoutSession, PaymentError, PaymentGateway};

pub const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct StripeClient {
    http: Client,
    base_url: String,
    secret_key: String,
    webhook_secret: String,
    tolerance_secs: i64,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

/// Form fields for `POST /v1/checkout/sessions`
///
/// Stripe expects nested parameters in bracket notation, e.g.
/// `line_items[0][price_data][unit_amount]`.
pub fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let order_id = request.order_id.to_string();

    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("client_reference_id".into(), order_id.clone()),
        ("metadata[order_id]".into(), order_id.clone()),
        ("payment_intent_data[metadata][order_id]".into(), order_id),
    ];

    if let Some(email) = &request.customer_email {
        form.push(("customer_email".into(), email.clone()));
    }

    for (i, line) in request.lines.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
        form.push((format!("{prefix}[price_data][currency]"), request.currency.clone()));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            line.unit_price_cents.to_string(),
        ));
        form.push((format!("{prefix}[price_data][product_data][name]"), line.name.clone()));
        form.push((
            format!("{prefix}[price_data][product_data][metadata][edition_id]"),
            line.edition_id.to_string(),
        ));
    }

    form
}

impl StripeClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let url = format!("{}/v1/checkout/sessions", self.base_url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("checkout-{}", request.order_id))
            .form(&checkout_form(request))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(order_id = %request.order_id, status, "Checkout session creation failed");
            return Err(PaymentError::Upstream { status, body });
        }

        let session: SessionResponse = resp.json().await?;
        let url = session.url.ok_or_else(|| PaymentError::Upstream {
            status: 200,
            body: "checkout session has no url".to_string(),
        })?;

        tracing::info!(order_id = %request.order_id, session_id = %session.id, "Created checkout session");

        Ok(CheckoutSession { id: session.id, url })
    }

    fn parse_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, PaymentError> {
        verify_webhook(payload, signature_header, &self.webhook_secret, self.tolerance_secs)?;
        parse_event(payload)
    }
}
