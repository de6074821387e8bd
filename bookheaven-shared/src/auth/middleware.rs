/// Session authentication middleware for Axum
///
/// Reads the session token from `Authorization: Bearer <token>` or, for
/// browser requests, the identity provider's `__session` cookie. After
/// validation an [`AuthContext`] is added to the request extensions.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use axum::{middleware, routing::get, Extension, Router};
/// use bookheaven_shared::auth::jwt::{SessionKey, SessionVerifier};
/// use bookheaven_shared::auth::middleware::{session_auth_middleware, AuthContext};
///
/// async fn handler(Extension(auth): Extension<AuthContext>) -> String {
///     format!("Hello, {}!", auth.user_id)
/// }
///
/// let verifier = Arc::new(SessionVerifier::new(SessionKey::hmac("secret"), None));
/// let app: Router = Router::new()
///     .route("/me", get(handler))
///     .layer(middleware::from_fn(move |req, next| {
///         session_auth_middleware(verifier.clone(), req, next)
///     }));
/// ```

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::jwt::{Claims, JwtError, SessionVerifier};

/// Cookie the identity provider's frontend SDK stores the session token in
pub const SESSION_COOKIE: &str = "__session";

/// Store role, taken from the session's public metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }

    /// Unknown or missing roles are customers
    pub fn from_claim(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::Customer,
        }
    }
}

/// Authenticated caller, added to request extensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
    pub session_id: Option<String>,
}

impl AuthContext {
    pub fn from_claims(claims: Claims) -> Self {
        let role = claims.role();
        Self {
            user_id: claims.sub,
            role,
            session_id: claims.sid,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Error type for authentication middleware
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("{0}")]
    InvalidFormat(String),

    #[error("{0}")]
    InvalidToken(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            AuthError::MissingCredentials => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AuthError::InvalidFormat(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AuthError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
        };

        let body = Json(serde_json::json!({
            "error": error,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::InvalidToken("Session expired".to_string()),
            JwtError::NotYetValid => AuthError::InvalidToken("Session not valid yet".to_string()),
            JwtError::InvalidIssuer => AuthError::InvalidToken("Invalid issuer".to_string()),
            other => AuthError::InvalidToken(format!("Invalid session: {}", other)),
        }
    }
}

/// Finds the session token in the request headers
///
/// The `Authorization` header wins over the cookie when both are present.
///
/// # Errors
///
/// `AuthError::InvalidFormat` for an `Authorization` header that is not a
/// bearer token.
pub fn extract_session_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| AuthError::InvalidFormat("Invalid Authorization header".to_string()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?;
        return Ok(Some(token.trim()));
    }

    let cookie_token = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value);

    Ok(cookie_token)
}

/// Requires a valid session
///
/// # Errors
///
/// Returns 401 Unauthorized if the token is missing, malformed, expired or
/// signed with the wrong key.
pub async fn session_auth_middleware(
    verifier: Arc<SessionVerifier>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_session_token(req.headers())?.ok_or(AuthError::MissingCredentials)?;

    let claims = verifier.verify(token)?;
    let auth_context = AuthContext::from_claims(claims);

    tracing::debug!(user_id = %auth_context.user_id, role = auth_context.role.as_str(), "Authenticated session");

    req.extensions_mut().insert(auth_context);
    Ok(next.run(req).await)
}

/// Attaches an [`AuthContext`] when a valid session is present
///
/// Requests without a session, or with an invalid one, continue anonymously.
pub async fn optional_session_middleware(
    verifier: Arc<SessionVerifier>,
    mut req: Request,
    next: Next,
) -> Response {
    let context = match extract_session_token(req.headers()) {
        Ok(Some(token)) => match verifier.verify(token) {
            Ok(claims) => Some(AuthContext::from_claims(claims)),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid session on public route");
                None
            }
        },
        _ => None,
    };

    if let Some(context) = context {
        req.extensions_mut().insert(context);
    }

    next.run(req).await
}
