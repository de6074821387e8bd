/// Checkout and order endpoints
///
/// Checkout turns a cart into a pending order, reserving stock, and opens a
/// hosted payment page for it. The order becomes `paid` when the payment
/// provider's webhook arrives (see [`super::webhooks`]).
///
/// # Endpoints
///
/// - `POST /v1/checkout` - Start checkout
/// - `GET /v1/orders/:id` - Order with items (owner or admin)
/// - `GET /v1/admin/orders?status=&page=` - All orders (admin)
/// - `PATCH /v1/admin/orders/:id` - Change order status (admin)

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{ApiQuery, ValidatedJson},
    routes::not_found,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use bookheaven_shared::{
    auth::{authorization::require_owner_or_admin, middleware::AuthContext},
    models::order::{CartLine, Order, OrderDetail, OrderStatus},
    pagination::{Page, PageRequest},
    payments::CheckoutRequest,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CartLineRequest {
    pub edition_id: Uuid,

    #[validate(range(min = 1, max = 10, message = "Quantity must be between 1 and 10"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    #[validate(length(min = 1, max = 50, message = "Cart must have 1-50 lines"), nested)]
    pub items: Vec<CartLineRequest>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub session_id: String,

    /// Hosted payment page to redirect the customer to
    pub checkout_url: String,

    pub total_cents: i64,
    pub currency: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

impl CheckoutBody {
    fn cart(&self) -> Vec<CartLine> {
        self.items
            .iter()
            .map(|line| CartLine {
                edition_id: line.edition_id,
                quantity: line.quantity,
            })
            .collect()
    }
}

/// Customer email for the payment page; lookup failures are not fatal
async fn customer_email(state: &AppState, user_id: &str) -> Option<String> {
    let identity = state.identity.as_ref()?;
    match identity.get_user(user_id).await {
        Ok(user) => user.email,
        Err(e) => {
            tracing::warn!(error = %e, user_id = %user_id, "Could not load customer email");
            None
        }
    }
}

/// Start checkout
///
/// # Request
///
/// ```json
/// { "items": [{ "edition_id": "uuid", "quantity": 2 }] }
/// ```
///
/// Duplicate editions are merged before quantities are checked.
///
/// # Errors
///
/// - `400 Bad Request`: Merged quantity too large, or mixed currencies
/// - `404 Not Found`: An edition does not exist
/// - `409 Conflict`: Not enough stock
/// - `422 Unprocessable Entity`: Validation failed
/// - `502 Bad Gateway`: The payment provider failed; the order is cancelled
/// - `503 Service Unavailable`: Checkout is not configured
pub async fn checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidatedJson(body): ValidatedJson<CheckoutBody>,
) -> ApiResult<(StatusCode, Json<CheckoutResponse>)> {
    let gateway = state.payments()?.clone();

    let pending = Order::create_pending(&state.db, &auth.user_id, &body.cart()).await?;
    let order_id = pending.order.id;

    let request = CheckoutRequest {
        order_id,
        currency: pending.cart.currency.clone(),
        lines: pending.cart.lines.clone(),
        customer_email: customer_email(&state, &auth.user_id).await,
        success_url: state.config.stripe.success_url.clone(),
        cancel_url: state.config.stripe.cancel_url.clone(),
    };

    let session = match gateway.create_checkout_session(&request).await {
        Ok(session) => session,
        Err(e) => {
            // Release the reserved stock; the customer can retry with a new order
            if let Err(cancel_err) =
                Order::update_status(&state.db, order_id, OrderStatus::Cancelled).await
            {
                tracing::error!(
                    error = %cancel_err,
                    order_id = %order_id,
                    "Failed to cancel order after checkout error"
                );
            }
            return Err(ApiError::from(e));
        }
    };

    if !Order::attach_checkout_session(&state.db, order_id, &session.id).await? {
        // The completion webhook may have attached the session and settled the order first
        let order = Order::find_by_id(&state.db, order_id).await?;
        let attached = order
            .as_ref()
            .and_then(|o| o.stripe_session_id.as_deref())
            == Some(session.id.as_str());
        if !attached {
            return Err(ApiError::InternalError(format!(
                "Order {} left pending before its checkout session was attached",
                order_id
            )));
        }
        tracing::debug!(order_id = %order_id, "Checkout session already attached by webhook");
    }

    tracing::info!(
        order_id = %order_id,
        user_id = %auth.user_id,
        session_id = %session.id,
        total_cents = pending.cart.total_cents,
        "Checkout started"
    );

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id,
            session_id: session.id,
            checkout_url: session.url,
            total_cents: pending.cart.total_cents,
            currency: pending.cart.currency,
        }),
    ))
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OrderDetail>> {
    let detail = Order::find_detail(&state.db, id)
        .await?
        .ok_or_else(|| not_found("Order"))?;

    require_owner_or_admin(&auth, &detail.order.user_id)?;

    Ok(Json(detail))
}

pub async fn list_all_orders(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<PageRequest>,
    ApiQuery(query): ApiQuery<OrderQuery>,
) -> ApiResult<Json<Page<Order>>> {
    let orders = Order::list_all(&state.db, query.status, page).await?;
    Ok(Json(orders))
}

/// Change order status (admin)
///
/// Allowed: `pending → cancelled`, `paid → shipped`, `paid → cancelled`,
/// `shipped → delivered`. Cancelling returns the reserved stock.
///
/// # Errors
///
/// - `404 Not Found`: Order does not exist
/// - `409 Conflict`: Transition not allowed
pub async fn update_order_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateOrderStatusRequest>,
) -> ApiResult<Json<Order>> {
    let order = Order::update_status(&state.db, id, req.status)
        .await?
        .ok_or_else(|| not_found("Order"))?;

    tracing::info!(
        order_id = %id,
        status = order.status.as_str(),
        admin = %auth.user_id,
        "Order updated by admin"
    );

    Ok(Json(order))
}
