/// Session token validation
///
/// Users sign in with the identity provider (Clerk), which issues short-lived
/// session JWTs. The API never issues tokens in production; it only verifies
/// them against the provider's public key.
///
/// # Keys
///
/// - **RS256**: the provider's PEM public key (`CLERK_JWT_KEY`), used in production
/// - **HS256**: a shared secret (`SESSION_SECRET`), for local development and tests
///
/// # Claims
///
/// - `sub`: user id (e.g. `user_2abc...`)
/// - `sid`: session id
/// - `iss`: issuer, checked when configured
/// - `iat`, `exp`, `nbf`: standard timestamps
/// - `metadata.role`: `"admin"` for staff, anything else is a customer
///
/// # Example
///
/// ```
/// use bookheaven_shared::auth::jwt::{create_session_token, Claims, SessionKey, SessionVerifier};
/// use bookheaven_shared::auth::middleware::Role;
/// use chrono::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let key = SessionKey::hmac("dev-secret-at-least-32-bytes-long!!");
/// let claims = Claims::new("user_123", Role::Admin, Duration::minutes(5));
/// let token = create_session_token(&claims, &key)?;
///
/// let verifier = SessionVerifier::new(key, None);
/// let verified = verifier.verify(&token)?;
/// assert_eq!(verified.sub, "user_123");
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::middleware::Role;

/// Error type for session token operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to create token: {0}")]
    CreateError(String),

    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Key used to verify session tokens
#[derive(Clone)]
pub enum SessionKey {
    /// Identity provider public key (RS256)
    Rsa(DecodingKey),

    /// Shared secret (HS256)
    Hmac(String),
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKey::Rsa(_) => f.write_str("SessionKey::Rsa(..)"),
            SessionKey::Hmac(_) => f.write_str("SessionKey::Hmac(..)"),
        }
    }
}

impl SessionKey {
    /// Parses a PEM public key
    ///
    /// Escaped newlines (`\n` as two characters) are accepted, since that is
    /// how multi-line keys usually survive `.env` files.
    pub fn from_rsa_pem(pem: &str) -> Result<Self, JwtError> {
        let pem = pem.trim().replace("\\n", "\n");
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map(SessionKey::Rsa)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))
    }

    pub fn hmac(secret: impl Into<String>) -> Self {
        SessionKey::Hmac(secret.into())
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            SessionKey::Rsa(_) => Algorithm::RS256,
            SessionKey::Hmac(_) => Algorithm::HS256,
        }
    }

    fn decoding_key(&self) -> DecodingKey {
        match self {
            SessionKey::Rsa(key) => key.clone(),
            SessionKey::Hmac(secret) => DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id at the identity provider
    pub sub: String,

    /// Session id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    pub iat: i64,

    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Claims {
    /// Claims for a fresh session, valid from now for `expires_in`
    pub fn new(user_id: impl Into<String>, role: Role, expires_in: Duration) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id.into(),
            sid: Some(format!("sess_{}", Uuid::new_v4().simple())),
            iss: None,
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            nbf: Some(now.timestamp()),
            metadata: SessionMetadata {
                role: Some(role.as_str().to_string()),
            },
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.iss = Some(issuer.into());
        self
    }

    pub fn role(&self) -> Role {
        Role::from_claim(self.metadata.role.as_deref())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Signs claims with an HMAC session key
///
/// Only HMAC keys can sign; the RSA variant holds a public key.
pub fn create_session_token(claims: &Claims, key: &SessionKey) -> Result<String, JwtError> {
    let SessionKey::Hmac(secret) = key else {
        return Err(JwtError::CreateError(
            "signing requires an HMAC session key".to_string(),
        ));
    };

    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Verifies session tokens against one key and an optional issuer
#[derive(Debug, Clone)]
pub struct SessionVerifier {
    key: SessionKey,
    issuer: Option<String>,
}

impl SessionVerifier {
    pub fn new(key: SessionKey, issuer: Option<String>) -> Self {
        Self { key, issuer }
    }

    /// Checks signature, `exp`, `nbf` and (when configured) `iss`
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        validate_session_token(token, &self.key, self.issuer.as_deref())
    }
}

/// Validates a session token and returns its claims
pub fn validate_session_token(
    token: &str,
    key: &SessionKey,
    issuer: Option<&str>,
) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(key.algorithm());
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.set_required_spec_claims(&["exp", "sub"]);
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }

    let token_data = decode::<Claims>(token, &key.decoding_key(), &validation).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            jsonwebtoken::errors::ErrorKind::ImmatureSignature => JwtError::NotYetValid,
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
            _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
        }
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    fn key() -> SessionKey {
        SessionKey::hmac(SECRET)
    }

    #[test]
    fn test_create_and_validate_token() {
        let claims = Claims::new("user_abc", Role::Customer, Duration::minutes(10));
        let token = create_session_token(&claims, &key()).expect("Should create token");

        let validated = validate_session_token(&token, &key(), None).expect("Should validate");
        assert_eq!(validated.sub, "user_abc");
        assert_eq!(validated.role(), Role::Customer);
        assert!(validated.sid.as_deref().is_some_and(|s| s.starts_with("sess_")));
    }

    #[test]
    fn test_admin_role_claim() {
        let claims = Claims::new("user_admin", Role::Admin, Duration::minutes(10));
        let token = create_session_token(&claims, &key()).unwrap();

        let validated = validate_session_token(&token, &key(), None).unwrap();
        assert_eq!(validated.role(), Role::Admin);
    }

    #[test]
    fn test_missing_metadata_defaults_to_customer() {
        let now = Utc::now().timestamp();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({ "sub": "user_x", "iat": now, "exp": now + 600 }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let validated = validate_session_token(&token, &key(), None).unwrap();
        assert_eq!(validated.role(), Role::Customer);
        assert!(validated.sid.is_none());
    }

    #[test]
    fn test_validate_with_wrong_secret() {
        let claims = Claims::new("user_abc", Role::Customer, Duration::minutes(10));
        let token = create_session_token(&claims, &key()).unwrap();

        let result = validate_session_token(&token, &SessionKey::hmac("another-secret"), None);
        assert!(matches!(result, Err(JwtError::ValidationError(_))));
    }

    #[test]
    fn test_validate_expired_token() {
        let claims = Claims::new("user_abc", Role::Customer, Duration::seconds(-3600));
        assert!(claims.is_expired());

        let token = create_session_token(&claims, &key()).unwrap();
        let result = validate_session_token(&token, &key(), None);
        assert!(matches!(result, Err(JwtError::Expired)));
    }

    #[test]
    fn test_future_token_rejected() {
        let mut claims = Claims::new("user_abc", Role::Customer, Duration::hours(2));
        claims.nbf = Some(Utc::now().timestamp() + 3600);

        let token = create_session_token(&claims, &key()).unwrap();
        let result = validate_session_token(&token, &key(), None);
        assert!(matches!(result, Err(JwtError::NotYetValid)));
    }

    #[test]
    fn test_issuer_checked_when_configured() {
        let claims = Claims::new("user_abc", Role::Customer, Duration::minutes(10))
            .with_issuer("https://clerk.bookheaven.dev");
        let token = create_session_token(&claims, &key()).unwrap();

        let verifier = SessionVerifier::new(key(), Some("https://clerk.bookheaven.dev".into()));
        assert!(verifier.verify(&token).is_ok());

        let other = SessionVerifier::new(key(), Some("https://evil.example".into()));
        assert!(matches!(other.verify(&token), Err(JwtError::InvalidIssuer)));
    }

    #[test]
    fn test_invalid_pem_rejected() {
        let result = SessionKey::from_rsa_pem("not a pem");
        assert!(matches!(result, Err(JwtError::InvalidKey(_))));
    }

    #[test]
    fn test_key_debug_hides_secret() {
        let debug = format!("{:?}", key());
        assert!(!debug.contains(SECRET));
    }
}
