pub mod subscription;
pub mod usage;

pub use subscription::{LimitUpdate, Subscription, SubscriptionFilter, SubscriptionPage};
pub use usage::{
    ChartData, DailyUsage, LimitStatus, SubscriptionUsage, TopConsumer, TopConsumersQuery,
    UsageOverview, UsageQuery, UsageSample, UsageStats, UsageSummary, UsageWindow,
};
