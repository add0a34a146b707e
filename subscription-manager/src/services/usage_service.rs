use crate::error::ManagerError;
use crate::models::{
    ChartData, DailyUsage, LimitStatus, Subscription, SubscriptionUsage, TopConsumer,
    UsageOverview, UsageSample, UsageStats, UsageWindow,
};
use crate::services::aggregator::{self, summarize, with_window};
use crate::services::metric_source::MetricSource;
use crate::services::metrics::record_limit_status;
use crate::services::policy::LimitPolicy;
use crate::services::subscription_store::SubscriptionStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Label of the merged series covering every subscription.
pub const ALL_SUBSCRIPTIONS: &str = "all";

const STATS_TOP_CONSUMERS: usize = 5;

/// Joins subscription state with aggregated usage and the limit policy.
pub struct UsageService {
    source: Arc<dyn MetricSource>,
    store: Arc<dyn SubscriptionStore>,
    policy: LimitPolicy,
    default_window_days: u32,
}

impl UsageService {
    pub fn new(
        source: Arc<dyn MetricSource>,
        store: Arc<dyn SubscriptionStore>,
        policy: LimitPolicy,
        default_window_days: u32,
    ) -> Self {
        Self {
            source,
            store,
            policy,
            default_window_days,
        }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    pub fn source_backend(&self) -> &'static str {
        self.source.backend_name()
    }

    /// Window of `days` (or the configured default) ending today, UTC.
    pub fn window(&self, days: Option<u32>) -> UsageWindow {
        UsageWindow::ending_today(days.unwrap_or(self.default_window_days))
    }

    async fn usage_for(
        &self,
        subscription: Subscription,
        window: UsageWindow,
    ) -> Result<SubscriptionUsage, ManagerError> {
        let samples = self
            .source
            .fetch_samples(&subscription.id, window.start, window.end)
            .await?;
        Ok(self.evaluate(subscription, &samples, window))
    }

    fn evaluate(
        &self,
        subscription: Subscription,
        samples: &[UsageSample],
        window: UsageWindow,
    ) -> SubscriptionUsage {
        let summary = with_window(summarize(&subscription.id, samples), window);
        let limit_status = self.policy.evaluate(&subscription, &summary);
        record_limit_status(limit_status.as_str());

        SubscriptionUsage {
            limit_used_percent: LimitPolicy::used_percent(
                subscription.token_limit,
                summary.total_tokens,
            ),
            subscription_id: subscription.id,
            display_name: subscription.display_name,
            enabled: subscription.enabled,
            token_limit: subscription.token_limit,
            limit_status,
            summary,
        }
    }

    /// Usage of every subscription from a single bulk fetch.
    async fn all_usage(&self, window: UsageWindow) -> Result<Vec<SubscriptionUsage>, ManagerError> {
        let subscriptions = self.store.list().await?;
        let ids: Vec<String> = subscriptions.iter().map(|s| s.id.clone()).collect();
        let samples = self
            .source
            .fetch_all_samples(&ids, window.start, window.end)
            .await?;

        let mut by_subscription: HashMap<String, Vec<UsageSample>> = HashMap::new();
        for sample in samples {
            by_subscription
                .entry(sample.subscription_id.clone())
                .or_default()
                .push(sample);
        }

        Ok(subscriptions
            .into_iter()
            .map(|subscription| {
                let samples = by_subscription.remove(&subscription.id).unwrap_or_default();
                self.evaluate(subscription, &samples, window)
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn subscription_usage(
        &self,
        id: &str,
        days: Option<u32>,
    ) -> Result<SubscriptionUsage, ManagerError> {
        let subscription = self.store.get(id).await?;
        self.usage_for(subscription, self.window(days)).await
    }

    /// Raw per-day breakdown: only days with samples, ascending.
    pub async fn daily(&self, id: &str, days: Option<u32>) -> Result<Vec<DailyUsage>, ManagerError> {
        Ok(self.subscription_usage(id, days).await?.summary.daily)
    }

    #[tracing::instrument(skip(self))]
    pub async fn overview(&self, days: Option<u32>) -> Result<UsageOverview, ManagerError> {
        let window = self.window(days);
        let subscriptions = self.all_usage(window).await?;
        let merged = aggregator::merge(
            ALL_SUBSCRIPTIONS,
            window,
            subscriptions.iter().map(|s| &s.summary),
        );

        Ok(UsageOverview {
            window,
            total_tokens: merged.total_tokens,
            total_requests: merged.total_requests,
            daily: merged.daily,
            subscriptions,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn stats(&self, days: Option<u32>) -> Result<UsageStats, ManagerError> {
        let overview = self.overview(days).await?;
        let count = |status: LimitStatus| {
            overview
                .subscriptions
                .iter()
                .filter(|s| s.limit_status == status)
                .count()
        };

        Ok(UsageStats {
            window: overview.window,
            total_subscriptions: overview.subscriptions.len(),
            enabled_subscriptions: overview.subscriptions.iter().filter(|s| s.enabled).count(),
            tokens_today: overview
                .daily
                .iter()
                .find(|d| d.date == overview.window.end)
                .map_or(0, |d| d.tokens),
            tokens_in_window: overview.total_tokens,
            avg_tokens_per_request: overview
                .total_tokens
                .checked_div(overview.total_requests)
                .unwrap_or(0),
            near_limit_count: count(LimitStatus::NearLimit),
            exceeded_count: count(LimitStatus::Exceeded),
            top_consumers: aggregator::top_consumers(&overview.subscriptions, STATS_TOP_CONSUMERS),
        })
    }

    pub async fn top_consumers(
        &self,
        days: Option<u32>,
        limit: usize,
    ) -> Result<Vec<TopConsumer>, ManagerError> {
        let rows = self.all_usage(self.window(days)).await?;
        Ok(aggregator::top_consumers(&rows, limit))
    }

    /// Zero-filled chart series for one subscription, or for all of them.
    pub async fn chart(&self, id: Option<&str>, days: Option<u32>) -> Result<ChartData, ManagerError> {
        let summary = match id {
            Some(id) => self.subscription_usage(id, days).await?.summary,
            None => {
                let window = self.window(days);
                let rows = self.all_usage(window).await?;
                aggregator::merge(ALL_SUBSCRIPTIONS, window, rows.iter().map(|r| &r.summary))
            }
        };
        Ok(aggregator::chart_data(&summary))
    }
}
