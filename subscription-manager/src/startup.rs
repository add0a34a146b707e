//! Application startup and lifecycle management.

use crate::config::Settings;
use crate::handlers::{health, metrics, pages, partials, subscriptions, usage};
use crate::services::{
    azure, LimitPolicy, MetricSource, MockMetricSource, MockSubscriptionStore, SubscriptionStore,
    UsageService,
};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn SubscriptionStore>,
    pub usage: Arc<UsageService>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        source: Arc<dyn MetricSource>,
        store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        let usage = UsageService::new(
            source,
            Arc::clone(&store),
            LimitPolicy::new(settings.usage.near_limit_threshold),
            settings.usage.default_window_days,
        );
        Self {
            settings: Arc::new(settings),
            store,
            usage: Arc::new(usage),
        }
    }

    /// Backend family reported by `/health`.
    pub fn backend_label(&self) -> &'static str {
        if self.settings.backend.use_mock_data {
            "mock"
        } else {
            "azure"
        }
    }
}

/// Choose the metric source and subscription store once, from configuration.
pub fn build_backends(
    settings: &Settings,
) -> Result<(Arc<dyn MetricSource>, Arc<dyn SubscriptionStore>), AppError> {
    if settings.backend.use_mock_data {
        tracing::info!("Mock data enabled, using in-memory subscriptions and synthetic usage");
        return Ok((
            Arc::new(MockMetricSource::new()),
            Arc::new(MockSubscriptionStore::with_fixtures()),
        ));
    }

    let client = reqwest::Client::builder()
        .timeout(settings.backend.request_timeout())
        .build()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

    let store: Arc<dyn SubscriptionStore> =
        Arc::new(azure::subscription_store(&settings.azure, &client));
    tracing::info!(
        service = %settings.azure.apim_service_name,
        "API Management subscription store initialized"
    );

    let source: Arc<dyn MetricSource> = if settings.azure.is_log_analytics_configured() {
        tracing::info!("Log Analytics metric source initialized");
        Arc::new(azure::metric_source(&settings.azure, &client))
    } else {
        tracing::warn!("Log Analytics workspace not configured, using synthetic usage data");
        Arc::new(MockMetricSource::new())
    };

    Ok((source, store))
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/subscriptions", get(subscriptions::list_subscriptions))
        .route("/subscriptions/:id", get(subscriptions::get_subscription))
        .route(
            "/subscriptions/:id/toggle",
            post(subscriptions::toggle_subscription),
        )
        .route("/subscriptions/:id/limit", post(subscriptions::set_limit))
        .route("/usage", get(usage::overview))
        .route("/usage/stats", get(usage::stats))
        .route("/usage/top-consumers", get(usage::top_consumers))
        .route("/usage/chart", get(usage::overall_chart))
        .route("/usage/:id", get(usage::subscription_usage))
        .route("/usage/:id/daily", get(usage::daily_usage))
        .route("/usage/:id/chart", get(usage::subscription_chart));

    let fragments = Router::new()
        .route("/stats", get(partials::stats))
        .route("/top-consumers", get(partials::top_consumers))
        .route("/chart", get(partials::chart))
        .route("/subscriptions", get(partials::subscription_table))
        .route("/subscriptions/recent", get(partials::recent_subscriptions))
        .route("/subscriptions/:id", get(partials::subscription_detail))
        .route(
            "/subscriptions/:id/toggle",
            post(partials::toggle_subscription),
        )
        .route("/subscriptions/:id/limit", post(partials::set_limit))
        .route("/usage/:id/daily", get(partials::daily_usage));

    Router::new()
        .route("/", get(pages::dashboard))
        .route("/subscriptions", get(pages::subscriptions))
        .route("/subscriptions/:id", get(pages::subscription_detail))
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::metrics))
        .nest("/api", api)
        .nest("/partials", fragments)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration. Port 0 binds a
    /// random free port.
    pub async fn build(settings: Settings) -> Result<Self, AppError> {
        settings.validate()?;
        let (source, store) = build_backends(&settings)?;
        Self::build_with_backends(settings, source, store).await
    }

    /// Build with explicit backends, bypassing configuration-driven selection.
    pub async fn build_with_backends(
        settings: Settings,
        source: Arc<dyn MetricSource>,
        store: Arc<dyn SubscriptionStore>,
    ) -> Result<Self, AppError> {
        let address = settings.server.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let state = AppState::new(settings, source, store);
        tracing::info!(
            port,
            backend = state.backend_label(),
            source = state.usage.source_backend(),
            "Subscription manager listening"
        );

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }

    /// Run until `shutdown` resolves, then drain in-flight requests.
    pub async fn run_with_graceful_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
