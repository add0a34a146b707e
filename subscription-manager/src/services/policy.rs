use crate::models::{LimitStatus, Subscription, UsageSummary};

/// Compares aggregated usage against a subscription's token limit.
#[derive(Debug, Clone, Copy)]
pub struct LimitPolicy {
    near_limit_threshold: f64,
}

impl LimitPolicy {
    /// `near_limit_threshold` is a fraction of the limit in `(0, 1]`; the
    /// configuration layer rejects anything else before this is built.
    pub fn new(near_limit_threshold: f64) -> Self {
        Self {
            near_limit_threshold,
        }
    }

    pub fn near_limit_threshold(&self) -> f64 {
        self.near_limit_threshold
    }

    pub fn evaluate(&self, subscription: &Subscription, summary: &UsageSummary) -> LimitStatus {
        self.evaluate_total(subscription.token_limit, summary.total_tokens)
    }

    pub fn evaluate_total(&self, token_limit: Option<u64>, total: u64) -> LimitStatus {
        let Some(limit) = token_limit else {
            return LimitStatus::Unlimited;
        };

        if total >= limit {
            LimitStatus::Exceeded
        } else if total as f64 >= self.near_limit_threshold * limit as f64 {
            LimitStatus::NearLimit
        } else {
            LimitStatus::WithinLimit
        }
    }

    /// Percentage of the limit consumed, one decimal; `None` when unlimited.
    pub fn used_percent(token_limit: Option<u64>, total: u64) -> Option<f64> {
        token_limit.map(|limit| {
            if limit == 0 {
                100.0
            } else {
                ((total as f64 / limit as f64) * 1000.0).round() / 10.0
            }
        })
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self::new(0.8)
    }
}
