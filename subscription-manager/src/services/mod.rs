pub mod aggregator;
pub mod azure;
pub mod metric_source;
pub mod metrics;
pub mod policy;
pub mod subscription_store;
pub mod usage_service;

pub use metric_source::{MetricSource, MockMetricSource};
pub use policy::LimitPolicy;
pub use subscription_store::{MockSubscriptionStore, SubscriptionStore};
pub use usage_service::UsageService;
