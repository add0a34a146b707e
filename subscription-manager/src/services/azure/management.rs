//! Subscriptions managed through the Azure Resource Manager API Management
//! REST API. Token limits live in APIM named values so gateway policies can
//! read them directly.

use super::credential::ClientSecretCredential;
use crate::error::ManagerError;
use crate::models::Subscription;
use crate::services::metrics::record_backend_call;
use crate::services::subscription_store::{validate_limit, SubscriptionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use service_core::observability::{TracedClientExt, TracedRequest};
use std::collections::HashMap;

const LIMIT_PREFIX: &str = "token-limit-";

pub struct ApimSubscriptionStore {
    client: Client,
    credential: ClientSecretCredential,
    service_url: String,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionContract {
    name: String,
    #[serde(default)]
    properties: SubscriptionProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionProperties {
    display_name: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    scope: String,
    created_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NamedValueContract {
    name: String,
    #[serde(default)]
    properties: NamedValueProperties,
}

#[derive(Debug, Default, Deserialize)]
struct NamedValueProperties {
    value: Option<String>,
}

/// Named value holding the limit of `subscription_id`.
///
/// Named value names only allow `[A-Za-z0-9._-]`. Every other byte,
/// including `_` itself, is written as `_` plus two hex digits, so distinct
/// ids never share a named value.
fn limit_name(subscription_id: &str) -> String {
    let mut name = String::from(LIMIT_PREFIX);
    for byte in subscription_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.') {
            name.push(byte as char);
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name
}

fn parse_limit(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

fn to_subscription(contract: SubscriptionContract, token_limit: Option<u64>) -> Subscription {
    let properties = contract.properties;
    Subscription {
        display_name: properties
            .display_name
            .unwrap_or_else(|| contract.name.clone()),
        id: contract.name,
        enabled: properties.state.eq_ignore_ascii_case("active"),
        token_limit,
        scope: properties.scope,
        owner_email: None,
        created_date: properties.created_date,
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '?', '#', '%'])
}

impl ApimSubscriptionStore {
    pub fn new(
        client: Client,
        credential: ClientSecretCredential,
        management_endpoint: &str,
        subscription_id: &str,
        resource_group: &str,
        service_name: &str,
        api_version: &str,
    ) -> Self {
        Self {
            client,
            credential,
            service_url: format!(
                "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ApiManagement/service/{}",
                management_endpoint.trim_end_matches('/'),
                subscription_id,
                resource_group,
                service_name
            ),
            api_version: api_version.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}?api-version={}", self.service_url, path, self.api_version)
    }

    /// Send `request` with a bearer token. 404 maps to `NotFound(id)`, every
    /// other failure to `ManagementUnavailable`.
    async fn execute(
        &self,
        operation: &'static str,
        id: &str,
        request: TracedRequest,
    ) -> Result<Response, ManagerError> {
        let result = self.try_execute(id, request).await;
        record_backend_call(
            "azure",
            operation,
            !matches!(result, Err(ManagerError::ManagementUnavailable(_))),
        );
        result
    }

    async fn try_execute(&self, id: &str, request: TracedRequest) -> Result<Response, ManagerError> {
        let token = self
            .credential
            .token()
            .await
            .map_err(|e| ManagerError::ManagementUnavailable(e.to_string()))?;

        let response = request.bearer_auth(&token).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("failed to reach API Management: {}", e)
            };
            ManagerError::ManagementUnavailable(reason)
        })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ManagerError::NotFound(id.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ManagerError::ManagementUnavailable(format!(
                    "API Management returned {}: {}",
                    status, body
                )))
            }
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ManagerError> {
        response.json().await.map_err(|e| {
            ManagerError::ManagementUnavailable(format!("invalid API Management response: {}", e))
        })
    }

    async fn fetch_contract(&self, id: &str) -> Result<SubscriptionContract, ManagerError> {
        if !is_valid_id(id) {
            return Err(ManagerError::NotFound(id.to_string()));
        }
        let url = self.url(&format!("subscriptions/{}", id));
        let response = self
            .execute("get_subscription", id, self.client.traced_get(&url))
            .await?;
        Self::decode(response).await
    }

    async fn fetch_limit(&self, id: &str) -> Result<Option<u64>, ManagerError> {
        let url = self.url(&format!("namedValues/{}", limit_name(id)));
        match self
            .execute("get_limit", id, self.client.traced_get(&url))
            .await
        {
            Ok(response) => {
                let named_value: NamedValueContract = Self::decode(response).await?;
                Ok(parse_limit(named_value.properties.value.as_deref()))
            }
            Err(ManagerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All token limits keyed by named value name, following paging links.
    async fn fetch_all_limits(&self) -> Result<HashMap<String, u64>, ManagerError> {
        let mut limits = HashMap::new();
        let mut next = Some(format!(
            "{}&$filter=startswith(name,'{}')",
            self.url("namedValues"),
            LIMIT_PREFIX
        ));

        while let Some(url) = next {
            let response = self
                .execute("list_limits", "namedValues", self.client.traced_get(&url))
                .await?;
            let page: ListResponse<NamedValueContract> = Self::decode(response).await?;
            for named_value in page.value {
                if let Some(limit) = parse_limit(named_value.properties.value.as_deref()) {
                    limits.insert(named_value.name, limit);
                }
            }
            next = page.next_link;
        }

        Ok(limits)
    }
}

#[async_trait]
impl SubscriptionStore for ApimSubscriptionStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Subscription, ManagerError> {
        let contract = self.fetch_contract(id).await?;
        let limit = self.fetch_limit(id).await?;
        Ok(to_subscription(contract, limit))
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Subscription>, ManagerError> {
        let limits = self.fetch_all_limits().await?;

        let mut contracts = Vec::new();
        let mut next = Some(self.url("subscriptions"));
        while let Some(url) = next {
            let response = self
                .execute("list_subscriptions", "subscriptions", self.client.traced_get(&url))
                .await?;
            let page: ListResponse<SubscriptionContract> = Self::decode(response).await?;
            contracts.extend(page.value);
            next = page.next_link;
        }

        let mut subscriptions: Vec<Subscription> = contracts
            .into_iter()
            .map(|contract| {
                let limit = limits.get(&limit_name(&contract.name)).copied();
                to_subscription(contract, limit)
            })
            .collect();
        subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subscriptions)
    }

    #[tracing::instrument(skip(self))]
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Subscription, ManagerError> {
        let current = self.get(id).await?;
        if current.enabled == enabled {
            return Ok(current);
        }

        let state = if enabled { "active" } else { "suspended" };
        let url = self.url(&format!("subscriptions/{}", id));
        self.execute(
            "set_state",
            id,
            self.client
                .traced_patch(&url)
                .header("If-Match", "*")
                .json(&json!({ "properties": { "state": state } })),
        )
        .await?;

        tracing::info!(subscription_id = %id, state, "Subscription state updated");
        Ok(Subscription {
            enabled,
            ..current
        })
    }

    #[tracing::instrument(skip(self))]
    async fn set_limit(&self, id: &str, limit: Option<i64>) -> Result<Subscription, ManagerError> {
        let limit = validate_limit(limit)?;
        let current = self.get(id).await?;
        let name = limit_name(id);
        let url = self.url(&format!("namedValues/{}", name));

        match limit {
            Some(value) => {
                let body = json!({
                    "properties": {
                        "displayName": name,
                        "value": value.to_string(),
                        "secret": false,
                        "tags": ["token-limit"]
                    }
                });
                self.execute("set_limit", id, self.client.traced_put(&url).json(&body))
                    .await?;
            }
            None => {
                let request = self.client.traced_delete(&url).header("If-Match", "*");
                match self.execute("clear_limit", id, request).await {
                    Ok(_) | Err(ManagerError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(subscription_id = %id, token_limit = ?limit, "Token limit updated");
        Ok(Subscription {
            token_limit: limit,
            ..current
        })
    }

    fn backend_name(&self) -> &'static str {
        "azure"
    }
}
