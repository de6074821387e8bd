/// Rate limiting middleware for write and checkout routes
///
/// Each authenticated user has one token bucket per route class, kept in
/// Redis so every API instance shares it (see
/// [`bookheaven_shared::redis::rate_limit`]). Limits depend on the caller's
/// role.
///
/// | class    | customer | admin   |
/// |----------|----------|---------|
/// | write    | 30/min   | 300/min |
/// | checkout | 5/min    | 20/min  |
///
/// # Headers
///
/// Response includes rate limit headers:
/// - `X-RateLimit-Limit`: Requests allowed per minute
/// - `X-RateLimit-Remaining`: Tokens remaining
/// - `X-RateLimit-Reset`: Unix timestamp when the bucket is full again
/// - `Retry-After`: Seconds to wait (429 responses only)
///
/// Without Redis, or when Redis fails, requests pass through unlimited.

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use bookheaven_shared::auth::middleware::AuthContext;
use bookheaven_shared::redis::{RateLimit, RateLimitDecision, RouteClass};

pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// Limits review, like and shelf changes
pub async fn limit_writes(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(&state, RouteClass::Write, request, next).await
}

/// Limits checkout session creation
pub async fn limit_checkout(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(&state, RouteClass::Checkout, request, next).await
}

async fn enforce(
    state: &AppState,
    class: RouteClass,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (Some(limiter), Some(auth)) = (
        state.rate_limiter.as_ref(),
        request.extensions().get::<AuthContext>().cloned(),
    ) else {
        return Ok(next.run(request).await);
    };

    let limit = RateLimit::for_class(class, auth.role);

    let decision = match limiter.check(class, &auth.user_id, limit).await {
        Ok(decision) => decision,
        Err(e) => {
            // Fail open: losing Redis must not take the store down
            tracing::warn!(error = %e, class = class.as_str(), "Rate limit check failed; allowing request");
            return Ok(next.run(request).await);
        }
    };

    if !decision.allowed {
        tracing::info!(
            user_id = %auth.user_id,
            class = class.as_str(),
            retry_after = decision.retry_after,
            "Rate limit exceeded"
        );
        return Err(rejection(&decision));
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    Ok(response)
}

fn rejection(decision: &RateLimitDecision) -> ApiError {
    let retry_after = decision.retry_after.max(1);
    ApiError::RateLimitExceeded {
        retry_after,
        message: format!("Rate limit exceeded. Try again in {} seconds", retry_after),
    }
}

/// Writes the `X-RateLimit-*` headers for an allowed request
pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at));
}
