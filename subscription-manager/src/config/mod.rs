use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{config_directory, load_layered, ServerSettings};
use service_core::error::AppError;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub azure: AzureSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub usage: UsageSettings,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AzureSettings {
    /// Entra ID tenant used for the client-credentials token request.
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<Secret<String>>,
    /// Azure subscription hosting the API Management instance.
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub apim_service_name: String,
    /// Log Analytics workspace id (the customerId GUID, not the resource id).
    #[serde(default)]
    pub log_analytics_workspace_id: String,
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
    #[serde(default = "default_login_endpoint")]
    pub login_endpoint: String,
    #[serde(default = "default_log_analytics_endpoint")]
    pub log_analytics_endpoint: String,
    #[serde(default = "default_apim_api_version")]
    pub apim_api_version: String,
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            subscription_id: String::new(),
            resource_group: String::new(),
            apim_service_name: String::new(),
            log_analytics_workspace_id: String::new(),
            management_endpoint: default_management_endpoint(),
            login_endpoint: default_login_endpoint(),
            log_analytics_endpoint: default_log_analytics_endpoint(),
            apim_api_version: default_apim_api_version(),
        }
    }
}

impl AzureSettings {
    /// API Management instance coordinates are present.
    pub fn is_configured(&self) -> bool {
        !self.subscription_id.is_empty()
            && !self.resource_group.is_empty()
            && !self.apim_service_name.is_empty()
    }

    pub fn has_credentials(&self) -> bool {
        !self.tenant_id.is_empty() && !self.client_id.is_empty() && self.client_secret.is_some()
    }

    pub fn is_log_analytics_configured(&self) -> bool {
        !self.log_analytics_workspace_id.is_empty()
    }
}

fn default_management_endpoint() -> String {
    "https://management.azure.com".to_string()
}

fn default_login_endpoint() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_log_analytics_endpoint() -> String {
    "https://api.loganalytics.io".to_string()
}

fn default_apim_api_version() -> String {
    "2022-08-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    /// Serve in-memory fixtures instead of calling Azure.
    #[serde(default)]
    pub use_mock_data: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            use_mock_data: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct UsageSettings {
    /// Fraction of the token limit at which a subscription counts as near its limit.
    #[serde(default = "default_near_limit_threshold")]
    pub near_limit_threshold: f64,
    /// Window length in days when a request does not pass `days`.
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            near_limit_threshold: default_near_limit_threshold(),
            default_window_days: default_window_days(),
        }
    }
}

fn default_near_limit_threshold() -> f64 {
    0.8
}

fn default_window_days() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP gRPC endpoint; spans are only exported when set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn validate(&self) -> Result<(), AppError> {
        let threshold = self.usage.near_limit_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "usage.near_limit_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.usage.default_window_days == 0 || self.usage.default_window_days > 365 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "usage.default_window_days must be between 1 and 365"
            )));
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "backend.request_timeout_secs must be positive"
            )));
        }

        if !self.backend.use_mock_data {
            if !self.azure.is_configured() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "azure.subscription_id, azure.resource_group and azure.apim_service_name \
                     are required unless backend.use_mock_data is set"
                )));
            }
            if !self.azure.has_credentials() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "azure.tenant_id, azure.client_id and azure.client_secret are required \
                     unless backend.use_mock_data is set"
                )));
            }
        }

        Ok(())
    }
}

pub fn get_configuration() -> Result<Settings, AppError> {
    let configuration_directory = config_directory("subscription-manager")?;
    let settings: Settings = load_layered(&configuration_directory)?;
    settings.validate()?;
    Ok(settings)
}
