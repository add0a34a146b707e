//! Metrics collection for subscription-manager.
//!
//! HTTP metrics come from the shared recorder in service-core; backend calls
//! and limit evaluations are counted in a dedicated Prometheus registry.

use prometheus::{IntCounterVec, Opts, Registry};
use service_core::middleware::metrics as http_metrics;
use std::sync::OnceLock;

pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static BACKEND_CALLS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static LIMIT_STATUS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize metrics collection. Safe to call more than once; later calls
/// are no-ops.
pub fn init_metrics() {
    if http_metrics::install_recorder().is_none() {
        tracing::warn!("Prometheus recorder unavailable; HTTP metrics disabled");
    }

    if PROMETHEUS_REGISTRY.get().is_some() {
        return;
    }

    let registry = Registry::new();

    let backend_calls = match IntCounterVec::new(
        Opts::new(
            "subscription_backend_calls_total",
            "Calls to usage and subscription backends by backend, operation and outcome",
        ),
        &["backend", "operation", "outcome"],
    ) {
        Ok(counter) => counter,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create subscription_backend_calls_total");
            return;
        }
    };

    let limit_status = match IntCounterVec::new(
        Opts::new(
            "subscription_limit_status_total",
            "Limit evaluations by resulting status",
        ),
        &["status"],
    ) {
        Ok(counter) => counter,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create subscription_limit_status_total");
            return;
        }
    };

    for collector in [backend_calls.clone(), limit_status.clone()] {
        if let Err(e) = registry.register(Box::new(collector)) {
            tracing::error!(error = %e, "Failed to register metric");
            return;
        }
    }

    // A concurrent initializer may have won the race; its registry stays.
    if PROMETHEUS_REGISTRY.set(registry).is_ok() {
        let _ = BACKEND_CALLS_TOTAL.set(backend_calls);
        let _ = LIMIT_STATUS_TOTAL.set(limit_status);
    }
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = http_metrics::render();

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record one backend call and whether it succeeded.
pub fn record_backend_call(backend: &str, operation: &str, success: bool) {
    if let Some(counter) = BACKEND_CALLS_TOTAL.get() {
        let outcome = if success { "success" } else { "error" };
        counter.with_label_values(&[backend, operation, outcome]).inc();
    }
}

/// Record the outcome of a limit evaluation.
pub fn record_limit_status(status: &str) {
    if let Some(counter) = LIMIT_STATUS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}
