use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Tokens are refreshed this long before they actually expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Token request failed: {0}")]
    Request(String),

    #[error("Token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

/// Entra ID client-credentials flow for a single resource scope.
pub struct ClientSecretCredential {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: Secret<String>,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientSecretCredential {
    pub fn new(
        client: Client,
        login_endpoint: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: Secret<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                login_endpoint.trim_end_matches('/'),
                tenant_id
            ),
            client_id: client_id.to_string(),
            client_secret,
            scope: scope.into(),
            cached: Mutex::new(None),
        }
    }

    /// Bearer token for the configured scope, reusing the cached one while
    /// it is still comfortably valid.
    pub async fn token(&self) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn request_token(&self) -> Result<CachedToken, CredentialError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .client
            .traced_post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Request(format!("invalid token response: {}", e)))?;

        tracing::debug!(scope = %self.scope, expires_in = token.expires_in, "Acquired access token");

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential(server: &MockServer) -> ClientSecretCredential {
        ClientSecretCredential::new(
            Client::new(),
            &server.uri(),
            "tenant-1",
            "client-1",
            Secret::new("s3cret".to_string()),
            "https://management.azure.com/.default",
        )
    }

    #[test]
    fn test_token_freshness_respects_margin() {
        let now = Instant::now();
        let soon = CachedToken {
            value: "t".into(),
            expires_at: now + Duration::from_secs(30),
        };
        let later = CachedToken {
            value: "t".into(),
            expires_at: now + Duration::from_secs(600),
        };
        assert!(!soon.is_fresh(now));
        assert!(later.is_fresh(now));
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = credential(&server);
        assert_eq!(credential.token().await.unwrap(), "abc");
        assert_eq!(credential.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_rejected_request_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let result = credential(&server).token().await;
        assert!(matches!(
            result,
            Err(CredentialError::Rejected { status: 401, .. })
        ));
    }
}
