/// Payment provider webhook
///
/// # Endpoint
///
/// ```text
/// POST /v1/webhooks/stripe
/// Stripe-Signature: t=1700000000,v1=5257a869...
/// ```
///
/// The raw body is verified against the signature header before anything
/// is parsed. Events the store does not act on are acknowledged with `200`.
/// Database failures answer `500` so the provider redelivers; a delivery
/// that can never succeed (unknown session, order that can no longer be
/// filled) is logged and acknowledged instead.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use bookheaven_shared::{
    models::{
        order::{Order, PaymentOutcome},
        ModelError,
    },
    payments::{CheckoutSessionEvent, WebhookEvent},
};
use serde::Serialize;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let gateway = state.payments()?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let event = gateway.parse_webhook(&body, signature)?;

    match event {
        WebhookEvent::CheckoutCompleted(session) => complete_checkout(&state, session).await?,
        WebhookEvent::CheckoutAwaitingPayment(session) => {
            tracing::info!(
                session_id = %session.session_id,
                "Checkout awaiting asynchronous payment"
            );
        }
        WebhookEvent::CheckoutFailed(session) => {
            match Order::cancel_pending_by_session(&state.db, &session.session_id).await? {
                Some(order) => {
                    tracing::info!(
                        order_id = %order.id,
                        session_id = %session.session_id,
                        "Checkout failed; order cancelled"
                    );
                }
                None => {
                    tracing::debug!(
                        session_id = %session.session_id,
                        "Checkout failed for an order that is no longer pending"
                    );
                }
            }
        }
        WebhookEvent::Ignored(kind) => {
            tracing::debug!(event_type = %kind, "Ignoring webhook event");
        }
    }

    Ok(Json(WebhookAck { received: true }))
}

async fn complete_checkout(state: &AppState, session: CheckoutSessionEvent) -> ApiResult<()> {
    let mut outcome = mark_paid(state, &session).await;

    // The webhook can beat the checkout handler to storing the session id
    let unattached = matches!(outcome, Err(ModelError::NotFound(_)));
    if let (true, Some(order_id)) = (unattached, session.order_id) {
        if Order::attach_checkout_session(&state.db, order_id, &session.session_id).await? {
            outcome = mark_paid(state, &session).await;
        }
    }

    match outcome {
        Ok(PaymentOutcome::Paid(order)) => {
            tracing::info!(
                order_id = %order.id,
                total_cents = order.total_cents,
                "Order paid"
            );
        }
        Ok(PaymentOutcome::AlreadySettled(order)) => {
            tracing::debug!(order_id = %order.id, "Duplicate payment notification");
        }
        Err(ModelError::NotFound(_)) => {
            tracing::warn!(session_id = %session.session_id, "Payment for unknown checkout session");
        }
        Err(ModelError::Conflict(reason)) => {
            // Needs a refund by hand
            tracing::error!(
                session_id = %session.session_id,
                order_id = ?session.order_id,
                reason = %reason,
                "Payment received for an order that cannot be filled"
            );
        }
        Err(other) => return Err(ApiError::from(other)),
    }

    Ok(())
}

async fn mark_paid(
    state: &AppState,
    session: &CheckoutSessionEvent,
) -> Result<PaymentOutcome, ModelError> {
    Order::mark_paid(
        &state.db,
        &session.session_id,
        session.payment_intent.as_deref(),
        session.customer_email.as_deref(),
    )
    .await
}
