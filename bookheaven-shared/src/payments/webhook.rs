/// Webhook signature verification and event parsing.
///
/// Stripe signs each delivery with a `Stripe-Signature` header of the form
/// `t=<unix>,v1=<hex>[,v1=<hex>...]`. The signature is HMAC-SHA256 over
/// `"{t}.{raw body}"` keyed with the endpoint secret.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use super::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a webhook timestamp, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Checkout session fields the order flow cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionEvent {
    pub session_id: String,
    pub order_id: Option<Uuid>,
    pub payment_intent: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Payment captured for the session
    CheckoutCompleted(CheckoutSessionEvent),

    /// Session finished but an asynchronous payment method is still settling
    CheckoutAwaitingPayment(CheckoutSessionEvent),

    /// Session expired or its asynchronous payment failed
    CheckoutFailed(CheckoutSessionEvent),

    /// Any event type the store does not act on
    Ignored(String),
}

/// Verifies `signature_header` against `payload` using the current time
pub fn verify_webhook(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), PaymentError> {
    verify_webhook_at(payload, signature_header, secret, tolerance_secs, Utc::now().timestamp())
}

/// Verifies a signature as of `now` (unix seconds)
pub fn verify_webhook_at(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), PaymentError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| PaymentError::Signature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(PaymentError::Signature("missing v1 signature".to_string()));
    }

    let issued_at: i64 = timestamp
        .parse()
        .map_err(|_| PaymentError::Signature("malformed timestamp".to_string()))?;

    if (now - issued_at).abs() > tolerance_secs {
        return Err(PaymentError::Signature("timestamp outside tolerance".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Signature(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if !matched {
        return Err(PaymentError::Signature("no matching signature".to_string()));
    }

    Ok(())
}

/// Builds a `Stripe-Signature` header value for `payload`
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, PaymentError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Signature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawCustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    payment_intent: Option<String>,
    payment_status: Option<String>,
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<RawCustomerDetails>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

impl From<RawCheckoutSession> for CheckoutSessionEvent {
    fn from(raw: RawCheckoutSession) -> Self {
        let order_id = raw
            .metadata
            .and_then(|m| m.order_id)
            .or(raw.client_reference_id)
            .and_then(|id| Uuid::parse_str(&id).ok());

        let customer_email = raw
            .customer_details
            .and_then(|d| d.email)
            .or(raw.customer_email);

        Self {
            session_id: raw.id,
            order_id,
            payment_intent: raw.payment_intent,
            customer_email,
        }
    }
}

/// Parses a verified webhook body
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, PaymentError> {
    let event: RawEvent =
        serde_json::from_slice(payload).map_err(|e| PaymentError::InvalidPayload(e.to_string()))?;

    let checkout_session = |object: serde_json::Value| -> Result<(CheckoutSessionEvent, Option<String>), PaymentError> {
        let raw: RawCheckoutSession = serde_json::from_value(object)
            .map_err(|e| PaymentError::InvalidPayload(e.to_string()))?;
        let payment_status = raw.payment_status.clone();
        Ok((raw.into(), payment_status))
    };

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let (session, payment_status) = checkout_session(event.data.object)?;
            match payment_status.as_deref() {
                Some("paid") | Some("no_payment_required") | None => {
                    Ok(WebhookEvent::CheckoutCompleted(session))
                }
                Some(_) => Ok(WebhookEvent::CheckoutAwaitingPayment(session)),
            }
        }
        "checkout.session.async_payment_succeeded" => {
            Ok(WebhookEvent::CheckoutCompleted(checkout_session(event.data.object)?.0))
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            Ok(WebhookEvent::CheckoutFailed(checkout_session(event.data.object)?.0))
        }
        other => Ok(WebhookEvent::Ignored(other.to_string())),
    }
}
