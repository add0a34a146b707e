#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::config::ServerSettings;
use std::sync::Arc;
use subscription_manager::config::{BackendSettings, Settings};
use subscription_manager::error::ManagerError;
use subscription_manager::models::UsageSample;
use subscription_manager::services::{MetricSource, MockSubscriptionStore, SubscriptionStore};
use subscription_manager::startup::Application;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
}

/// Metric source that always fails, standing in for an unreachable workspace.
pub struct UnavailableSource;

#[async_trait]
impl MetricSource for UnavailableSource {
    async fn fetch_samples(
        &self,
        _subscription_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<UsageSample>, ManagerError> {
        Err(ManagerError::SourceUnavailable(
            "Log Analytics query timed out".to_string(),
        ))
    }

    fn backend_name(&self) -> &'static str {
        "unavailable"
    }
}

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        backend: BackendSettings {
            use_mock_data: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

impl TestApp {
    /// Spawn the service in mock mode on a random port.
    pub async fn spawn() -> Self {
        let app = Application::build(test_settings())
            .await
            .expect("Failed to build test application");
        Self::start(app).await
    }

    /// Spawn with explicit backends.
    pub async fn spawn_with(
        source: Arc<dyn MetricSource>,
        store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        let app = Application::build_with_backends(test_settings(), source, store)
            .await
            .expect("Failed to build test application");
        Self::start(app).await
    }

    /// Spawn with fixture subscriptions but a failing metric source.
    pub async fn spawn_with_unavailable_metrics() -> Self {
        Self::spawn_with(
            Arc::new(UnavailableSource),
            Arc::new(MockSubscriptionStore::with_fixtures()),
        )
        .await
    }

    async fn start(app: Application) -> Self {
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept connections
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> serde_json::Value {
        let response = self.get(path).await;
        assert!(
            response.status().is_success(),
            "GET {} returned {}",
            path,
            response.status()
        );
        response.json().await.expect("Failed to parse response")
    }

    pub async fn post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }
}
