/// Identity provider (Clerk) backend API client.
///
/// Only user lookup is needed: the API trusts session tokens for identity
/// and asks the provider for profile details on `GET /v1/me`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Role;

pub const DEFAULT_CLERK_API_URL: &str = "https://api.clerk.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("User not found")]
    NotFound,

    #[error("Identity provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Identity provider request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Profile of a signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    pub role: Role,
}

/// Looks up users at the identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<IdentityUser, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct ClerkEmail {
    id: String,
    email_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct ClerkMetadata {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClerkUser {
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    image_url: Option<String>,
    primary_email_address_id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<ClerkEmail>,
    #[serde(default)]
    public_metadata: ClerkMetadata,
}

impl From<ClerkUser> for IdentityUser {
    fn from(user: ClerkUser) -> Self {
        let primary = user.primary_email_address_id.as_deref();
        let email = user
            .email_addresses
            .iter()
            .find(|e| Some(e.id.as_str()) == primary)
            .or_else(|| user.email_addresses.first())
            .map(|e| e.email_address.clone());

        Self {
            role: Role::from_claim(user.public_metadata.role.as_deref()),
            id: user.id,
            email,
            first_name: user.first_name,
            last_name: user.last_name,
            image_url: user.image_url,
        }
    }
}

pub struct ClerkClient {
    http: Client,
    base_url: String,
    secret_key: String,
}

impl ClerkClient {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
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
        }
    }
}

#[async_trait]
impl IdentityProvider for ClerkClient {
    async fn get_user(&self, user_id: &str) -> Result<IdentityUser, IdentityError> {
        let url = format!("{}/v1/users/{}", self.base_url, user_id);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json::<ClerkUser>().await?.into()),
            StatusCode::NOT_FOUND => Err(IdentityError::NotFound),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(IdentityError::Upstream {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn clerk_user_json() -> serde_json::Value {
        serde_json::json!({
            "id": "user_2abc",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "image_url": "https://img.clerk.com/ada.png",
            "primary_email_address_id": "idn_2",
            "email_addresses": [
                { "id": "idn_1", "email_address": "old@example.com" },
                { "id": "idn_2", "email_address": "ada@example.com" }
            ],
            "public_metadata": { "role": "admin" }
        })
    }

    #[tokio::test]
    async fn test_get_user_maps_primary_email_and_role() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/users/user_2abc"))
            .and(header("authorization", "Bearer sk_test_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(clerk_user_json()))
            .mount(&server)
            .await;

        let client = ClerkClient::new(server.uri(), "sk_test_123");
        let user = client.get_user("user_2abc").await.unwrap();

        assert_eq!(user.id, "user_2abc");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_get_user_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ClerkClient::new(server.uri(), "sk_test_123");
        let result = client.get_user("user_missing").await;
        assert!(matches!(result, Err(IdentityError::NotFound)));
    }

    #[tokio::test]
    async fn test_get_user_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = ClerkClient::new(server.uri(), "sk_test_123");
        match client.get_user("user_2abc").await {
            Err(IdentityError::Upstream { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "unavailable");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_metadata_is_customer() {
        let user: ClerkUser = serde_json::from_value(serde_json::json!({
            "id": "user_x",
            "first_name": null,
            "last_name": null,
            "image_url": null,
            "primary_email_address_id": null
        }))
        .unwrap();

        let identity = IdentityUser::from(user);
        assert_eq!(identity.role, Role::Customer);
        assert!(identity.email.is_none());
    }
}
