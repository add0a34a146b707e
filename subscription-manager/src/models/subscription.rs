//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// An API Management subscription: the credential/quota unit for LLM access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    /// Token budget for the usage window; `None` means unlimited.
    pub token_limit: Option<u64>,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn state_label(&self) -> &'static str {
        if self.enabled {
            "Enabled"
        } else {
            "Disabled"
        }
    }
}

/// Body of `POST /api/subscriptions/{id}/limit`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitUpdate {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Query filters for listing subscriptions.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubscriptionFilter {
    pub search: Option<String>,
    pub enabled: Option<bool>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: u32,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 100, message = "page_size must be between 1 and 100"))]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self {
            search: None,
            enabled: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

/// One page of filtered subscriptions plus the unpaginated match count.
#[derive(Debug, Clone)]
pub struct SubscriptionPage {
    pub subscriptions: Vec<Subscription>,
    pub total_count: usize,
    pub page: u32,
    pub page_size: u32,
}

impl SubscriptionFilter {
    fn matches(&self, subscription: &Subscription) -> bool {
        let search_ok = match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => subscription
                .display_name
                .to_lowercase()
                .contains(&term.to_lowercase()),
            _ => true,
        };
        let enabled_ok = self.enabled.map_or(true, |e| subscription.enabled == e);
        search_ok && enabled_ok
    }

    /// Filter then paginate; `subscriptions` is expected in listing order.
    pub fn apply(&self, subscriptions: Vec<Subscription>) -> SubscriptionPage {
        let matching: Vec<Subscription> = subscriptions
            .into_iter()
            .filter(|s| self.matches(s))
            .collect();
        let total_count = matching.len();
        let skip = (self.page.max(1) as usize - 1) * self.page_size as usize;

        SubscriptionPage {
            subscriptions: matching
                .into_iter()
                .skip(skip)
                .take(self.page_size as usize)
                .collect(),
            total_count,
            page: self.page,
            page_size: self.page_size,
        }
    }
}
