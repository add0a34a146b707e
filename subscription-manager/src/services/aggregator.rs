//! Rolls raw usage samples up into per-subscription summaries.
//!
//! Same-day samples are summed: metrics backends may report several data
//! points for one day (one per gateway instance or query bin).

use crate::models::{
    ChartData, DailyUsage, SubscriptionUsage, TopConsumer, UsageSample, UsageSummary, UsageWindow,
};
use std::collections::BTreeMap;

/// Group `samples` by day for `subscription_id`. Samples belonging to other
/// subscriptions are ignored; no samples yields an empty summary.
pub fn summarize(subscription_id: &str, samples: &[UsageSample]) -> UsageSummary {
    let mut by_day: BTreeMap<_, DailyUsage> = BTreeMap::new();

    for sample in samples.iter().filter(|s| s.subscription_id == subscription_id) {
        by_day
            .entry(sample.date)
            .or_insert_with(|| DailyUsage::zero(sample.date))
            .absorb(&DailyUsage {
                date: sample.date,
                tokens: sample.tokens,
                prompt_tokens: sample.prompt_tokens,
                completion_tokens: sample.completion_tokens,
                requests: sample.requests,
            });
    }

    from_daily(subscription_id, by_day.into_values().collect())
}

/// Build a summary from an ascending, de-duplicated daily series.
fn from_daily(subscription_id: &str, daily: Vec<DailyUsage>) -> UsageSummary {
    UsageSummary {
        subscription_id: subscription_id.to_string(),
        window: None,
        total_tokens: saturating_sum(daily.iter().map(|d| d.tokens)),
        total_requests: saturating_sum(daily.iter().map(|d| d.requests)),
        daily,
    }
}

fn saturating_sum(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0, u64::saturating_add)
}

/// Attach the queried window to a summary.
pub fn with_window(mut summary: UsageSummary, window: UsageWindow) -> UsageSummary {
    summary.window = Some(window);
    summary
}

/// Insert zero rows for window days without samples. Summaries without a
/// window are returned unchanged.
pub fn fill_missing_days(summary: &UsageSummary) -> UsageSummary {
    let Some(window) = summary.window else {
        return summary.clone();
    };

    let mut by_day: BTreeMap<_, DailyUsage> =
        window.dates().map(|d| (d, DailyUsage::zero(d))).collect();
    for day in &summary.daily {
        by_day
            .entry(day.date)
            .or_insert_with(|| DailyUsage::zero(day.date))
            .absorb(day);
    }

    let mut filled = from_daily(&summary.subscription_id, by_day.into_values().collect());
    filled.window = summary.window;
    filled
}

/// Fold several summaries into one per-day series under `label`.
pub fn merge<'a>(
    label: &str,
    window: UsageWindow,
    summaries: impl IntoIterator<Item = &'a UsageSummary>,
) -> UsageSummary {
    let mut by_day: BTreeMap<_, DailyUsage> = BTreeMap::new();
    for summary in summaries {
        for day in &summary.daily {
            by_day
                .entry(day.date)
                .or_insert_with(|| DailyUsage::zero(day.date))
                .absorb(day);
        }
    }

    with_window(from_daily(label, by_day.into_values().collect()), window)
}

/// Largest consumers first (ties broken by id), with each one's share of
/// the combined total rounded to one decimal.
pub fn top_consumers(rows: &[SubscriptionUsage], limit: usize) -> Vec<TopConsumer> {
    let grand_total = saturating_sum(rows.iter().map(|r| r.summary.total_tokens));

    let mut ranked: Vec<&SubscriptionUsage> = rows.iter().collect();
    ranked.sort_by(|a, b| {
        b.summary
            .total_tokens
            .cmp(&a.summary.total_tokens)
            .then_with(|| a.subscription_id.cmp(&b.subscription_id))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|row| TopConsumer {
            subscription_id: row.subscription_id.clone(),
            display_name: row.display_name.clone(),
            total_tokens: row.summary.total_tokens,
            requests: row.summary.total_requests,
            percentage: percentage(row.summary.total_tokens, grand_total),
        })
        .collect()
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 1000.0).round() / 10.0
}

/// Chart-ready series (labels like `Mar 05`) over the summary's window.
pub fn chart_data(summary: &UsageSummary) -> ChartData {
    let filled = fill_missing_days(summary);

    ChartData {
        labels: filled
            .daily
            .iter()
            .map(|d| d.date.format("%b %d").to_string())
            .collect(),
        values: filled.daily.iter().map(|d| d.tokens).collect(),
        prompt_tokens: filled.daily.iter().map(|d| d.prompt_tokens).collect(),
        completion_tokens: filled.daily.iter().map(|d| d.completion_tokens).collect(),
    }
}
