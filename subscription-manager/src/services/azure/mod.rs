pub mod credential;
pub mod log_analytics;
pub mod management;

pub use credential::{ClientSecretCredential, CredentialError};
pub use log_analytics::LogAnalyticsMetricSource;
pub use management::ApimSubscriptionStore;

use crate::config::AzureSettings;
use reqwest::Client;
use secrecy::Secret;

fn credential_for(settings: &AzureSettings, client: &Client, resource: &str) -> ClientSecretCredential {
    ClientSecretCredential::new(
        client.clone(),
        &settings.login_endpoint,
        &settings.tenant_id,
        &settings.client_id,
        settings
            .client_secret
            .clone()
            .unwrap_or_else(|| Secret::new(String::new())),
        format!("{}/.default", resource.trim_end_matches('/')),
    )
}

pub fn subscription_store(settings: &AzureSettings, client: &Client) -> ApimSubscriptionStore {
    ApimSubscriptionStore::new(
        client.clone(),
        credential_for(settings, client, &settings.management_endpoint),
        &settings.management_endpoint,
        &settings.subscription_id,
        &settings.resource_group,
        &settings.apim_service_name,
        &settings.apim_api_version,
    )
}

pub fn metric_source(settings: &AzureSettings, client: &Client) -> LogAnalyticsMetricSource {
    LogAnalyticsMetricSource::new(
        client.clone(),
        credential_for(settings, client, &settings.log_analytics_endpoint),
        &settings.log_analytics_endpoint,
        &settings.log_analytics_workspace_id,
    )
}
