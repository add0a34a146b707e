//! Askama view models for dashboard pages and htmx fragments.

use crate::models::{
    DailyUsage, Subscription, SubscriptionPage, SubscriptionUsage, TopConsumer, UsageStats,
};
use askama::Template;

#[derive(Template)]
#[template(path = "index.html")]
pub struct DashboardTemplate {
    pub days: u32,
    pub backend: &'static str,
}

#[derive(Template)]
#[template(path = "subscriptions.html")]
pub struct SubscriptionsPageTemplate {
    pub search: String,
    pub enabled: String,
}

#[derive(Template)]
#[template(path = "subscription_detail.html")]
pub struct SubscriptionPageTemplate {
    pub subscription: Subscription,
    pub days: u32,
}

#[derive(Template)]
#[template(path = "partials/stats.html")]
pub struct StatsTemplate {
    pub stats: UsageStats,
}

#[derive(Template)]
#[template(path = "partials/top_consumers.html")]
pub struct TopConsumersTemplate {
    pub consumers: Vec<TopConsumer>,
}

#[derive(Template)]
#[template(path = "partials/chart.html")]
pub struct ChartTemplate {
    pub canvas_id: String,
    /// Serialized chart series, read by the page script from a data attribute.
    pub chart_json: String,
}

#[derive(Template)]
#[template(path = "partials/subscription_table.html")]
pub struct SubscriptionTableTemplate {
    pub page: SubscriptionPage,
    pub search: String,
    pub enabled: String,
}

impl SubscriptionTableTemplate {
    pub fn has_previous(&self) -> bool {
        self.page.page > 1
    }

    pub fn has_next(&self) -> bool {
        (self.page.page as usize) * (self.page.page_size as usize) < self.page.total_count
    }

    pub fn previous_page(&self) -> u32 {
        self.page.page.saturating_sub(1).max(1)
    }

    pub fn next_page(&self) -> u32 {
        self.page.page + 1
    }
}

#[derive(Template)]
#[template(path = "partials/subscription_row.html")]
pub struct SubscriptionRowTemplate {
    pub subscription: Subscription,
}

#[derive(Template)]
#[template(path = "partials/recent_subscriptions.html")]
pub struct RecentSubscriptionsTemplate {
    pub subscriptions: Vec<Subscription>,
}

#[derive(Template)]
#[template(path = "partials/subscription_detail.html")]
pub struct SubscriptionDetailTemplate {
    pub subscription: Subscription,
    pub usage: SubscriptionUsage,
    pub threshold_percent: u32,
}

impl SubscriptionDetailTemplate {
    /// Width of the usage bar, capped at a full bar.
    pub fn bar_percent(&self) -> f64 {
        self.usage.limit_used_percent.unwrap_or(0.0).min(100.0)
    }

    pub fn window_days(&self) -> u32 {
        self.usage.summary.window.map_or(0, |w| w.len_days())
    }
}

#[derive(Template)]
#[template(path = "partials/daily_usage.html")]
pub struct DailyUsageTemplate {
    pub daily: Vec<DailyUsage>,
}

#[derive(Template)]
#[template(path = "partials/error.html")]
pub struct ErrorTemplate {
    pub status: u16,
    pub message: String,
}

mod filters {
    /// Group digits in thousands: `1234567` renders as `1,234,567`.
    pub fn thousands<T: std::fmt::Display>(value: T) -> ::askama::Result<String> {
        let raw = value.to_string();
        let (sign, digits) = match raw.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", raw.as_str()),
        };

        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        Ok(format!("{}{}", sign, grouped))
    }

}
