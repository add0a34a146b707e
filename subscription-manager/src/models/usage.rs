//! Token usage models.

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// One raw usage data point reported by a metrics backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub subscription_id: String,
    pub date: NaiveDate,
    pub tokens: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub requests: u64,
}

impl UsageSample {
    pub fn new(subscription_id: impl Into<String>, date: NaiveDate, tokens: u64) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            date,
            tokens,
            prompt_tokens: 0,
            completion_tokens: 0,
            requests: 0,
        }
    }
}

/// Usage rolled up for a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
}

impl DailyUsage {
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            tokens: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            requests: 0,
        }
    }

    /// Add `other` into this row. Counters saturate at `u64::MAX`.
    pub fn absorb(&mut self, other: &DailyUsage) {
        self.tokens = self.tokens.saturating_add(other.tokens);
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.requests = self.requests.saturating_add(other.requests);
    }

    pub fn avg_tokens_per_request(&self) -> u64 {
        self.tokens.checked_div(self.requests).unwrap_or(0)
    }
}

/// Inclusive range of days a usage query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl UsageWindow {
    /// The `days` days ending on (and including) `end`. `days` of 0 is treated as 1.
    pub fn ending_on(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn ending_today(days: u32) -> Self {
        Self::ending_on(Utc::now().date_naive(), days)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len_days(&self) -> u32 {
        ((self.end - self.start).num_days() + 1).max(0) as u32
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Usage of one subscription: totals plus a per-day breakdown in ascending
/// date order whose token and request sums equal the totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<UsageWindow>,
    pub total_tokens: u64,
    pub total_requests: u64,
    pub daily: Vec<DailyUsage>,
}

impl UsageSummary {
    pub fn empty(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            window: None,
            total_tokens: 0,
            total_requests: 0,
            daily: Vec::new(),
        }
    }

    pub fn avg_tokens_per_request(&self) -> u64 {
        self.total_tokens
            .checked_div(self.total_requests)
            .unwrap_or(0)
    }

    pub fn tokens_on(&self, date: NaiveDate) -> u64 {
        self.daily
            .iter()
            .find(|d| d.date == date)
            .map_or(0, |d| d.tokens)
    }
}

/// Where a subscription stands relative to its token limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    Unlimited,
    WithinLimit,
    NearLimit,
    Exceeded,
}

impl LimitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitStatus::Unlimited => "unlimited",
            LimitStatus::WithinLimit => "within_limit",
            LimitStatus::NearLimit => "near_limit",
            LimitStatus::Exceeded => "exceeded",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LimitStatus::Unlimited => "Unlimited",
            LimitStatus::WithinLimit => "Within limit",
            LimitStatus::NearLimit => "Near limit",
            LimitStatus::Exceeded => "Exceeded",
        }
    }

    /// Ordering among limited statuses; `None` for unlimited.
    pub fn severity(&self) -> Option<u8> {
        match self {
            LimitStatus::Unlimited => None,
            LimitStatus::WithinLimit => Some(0),
            LimitStatus::NearLimit => Some(1),
            LimitStatus::Exceeded => Some(2),
        }
    }
}

impl std::fmt::Display for LimitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscription's usage evaluated against its limit.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionUsage {
    pub subscription_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub token_limit: Option<u64>,
    pub limit_status: LimitStatus,
    /// Share of the limit consumed, in percent; `None` when unlimited.
    pub limit_used_percent: Option<f64>,
    pub summary: UsageSummary,
}

/// Usage across all subscriptions for one window.
#[derive(Debug, Clone, Serialize)]
pub struct UsageOverview {
    pub window: UsageWindow,
    pub total_tokens: u64,
    pub total_requests: u64,
    pub daily: Vec<DailyUsage>,
    pub subscriptions: Vec<SubscriptionUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopConsumer {
    pub subscription_id: String,
    pub display_name: String,
    pub total_tokens: u64,
    pub requests: u64,
    pub percentage: f64,
}

/// Headline numbers for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub window: UsageWindow,
    pub total_subscriptions: usize,
    pub enabled_subscriptions: usize,
    pub tokens_today: u64,
    pub tokens_in_window: u64,
    pub avg_tokens_per_request: u64,
    pub near_limit_count: usize,
    pub exceeded_count: usize,
    pub top_consumers: Vec<TopConsumer>,
}

/// Zero-filled chart series, one point per day of the window.
#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<u64>,
    pub prompt_tokens: Vec<u64>,
    pub completion_tokens: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UsageQuery {
    #[validate(range(min = 1, max = 365, message = "days must be between 1 and 365"))]
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TopConsumersQuery {
    #[validate(range(min = 1, max = 365, message = "days must be between 1 and 365"))]
    pub days: Option<u32>,
    #[serde(default = "default_top_limit")]
    #[validate(range(min = 1, max = 20, message = "limit must be between 1 and 20"))]
    pub limit: usize,
}

fn default_top_limit() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_window_is_inclusive() {
        let window = UsageWindow::ending_on(day(10), 7);
        assert_eq!(window.start, day(4));
        assert_eq!(window.len_days(), 7);
        assert!(window.contains(day(4)));
        assert!(window.contains(day(10)));
        assert!(!window.contains(day(3)));
        assert_eq!(window.dates().count(), 7);
    }

    #[test]
    fn test_single_day_window() {
        let window = UsageWindow::ending_on(day(10), 0);
        assert_eq!(window.start, window.end);
        assert_eq!(window.dates().collect::<Vec<_>>(), vec![day(10)]);
    }

    #[test]
    fn test_limit_status_serialization() {
        assert_eq!(
            serde_json::to_value(LimitStatus::NearLimit).unwrap(),
            serde_json::json!("near_limit")
        );
        assert_eq!(LimitStatus::WithinLimit.to_string(), "within_limit");
    }

    #[test]
    fn test_average_without_requests_is_zero() {
        let summary = UsageSummary::empty("sub-1");
        assert_eq!(summary.avg_tokens_per_request(), 0);
        assert_eq!(DailyUsage::zero(day(1)).avg_tokens_per_request(), 0);
    }
}
