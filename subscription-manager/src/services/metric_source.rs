use crate::error::ManagerError;
use crate::models::UsageSample;
use crate::services::metrics::record_backend_call;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use futures::{stream, StreamExt, TryStreamExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Source of raw per-subscription token usage.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Samples for `subscription_id` dated within `start..=end`.
    async fn fetch_samples(
        &self,
        subscription_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsageSample>, ManagerError>;

    /// Samples for every id in `subscription_ids` dated within `start..=end`.
    ///
    /// The default issues one `fetch_samples` per id with at most
    /// [`MAX_CONCURRENT_FETCHES`] in flight; backends that can answer for
    /// all subscriptions at once override it.
    async fn fetch_all_samples(
        &self,
        subscription_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsageSample>, ManagerError> {
        let fetches: Vec<_> = subscription_ids
            .iter()
            .map(|id| self.fetch_samples(id, start, end))
            .collect();
        let batches: Vec<Vec<UsageSample>> = stream::iter(fetches)
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }

    fn backend_name(&self) -> &'static str;
}

/// Upper bound on concurrent per-subscription fetches.
pub const MAX_CONCURRENT_FETCHES: usize = 4;

/// Deterministic synthetic usage: every `(subscription, day)` pair seeds its
/// own RNG, so the same query always returns the same samples.
#[derive(Debug, Default, Clone)]
pub struct MockMetricSource;

impl MockMetricSource {
    pub fn new() -> Self {
        Self
    }

    fn seed(subscription_id: &str, date: NaiveDate) -> u64 {
        let digest = Sha256::digest(format!("{}:{}", subscription_id, date).as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    /// One day of usage, split over one to three samples.
    fn samples_for_day(subscription_id: &str, date: NaiveDate) -> Vec<UsageSample> {
        let mut rng = StdRng::seed_from_u64(Self::seed(subscription_id, date));
        let is_weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);

        let base_tokens: u64 = if is_weekend {
            rng.gen_range(10_000..=50_000)
        } else {
            rng.gen_range(50_000..=200_000)
        };
        let variation: f64 = rng.gen_range(0.7..1.3);
        let tokens = (base_tokens as f64 * variation) as u64;
        let prompt_ratio: f64 = rng.gen_range(0.3..0.5);
        let prompt_tokens = (tokens as f64 * prompt_ratio) as u64;
        let completion_tokens = tokens - prompt_tokens;
        let requests: u64 = if is_weekend {
            rng.gen_range(100..=500)
        } else {
            rng.gen_range(300..=1500)
        };
        let parts: u64 = rng.gen_range(1..=3);

        (0..parts)
            .map(|i| {
                let share = |total: u64| {
                    let even = total / parts;
                    if i == parts - 1 {
                        total - even * (parts - 1)
                    } else {
                        even
                    }
                };
                UsageSample {
                    subscription_id: subscription_id.to_string(),
                    date,
                    tokens: share(tokens),
                    prompt_tokens: share(prompt_tokens),
                    completion_tokens: share(completion_tokens),
                    requests: share(requests),
                }
            })
            .collect()
    }
}

#[async_trait]
impl MetricSource for MockMetricSource {
    async fn fetch_samples(
        &self,
        subscription_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsageSample>, ManagerError> {
        record_backend_call(self.backend_name(), "fetch_samples", true);
        Ok(start
            .iter_days()
            .take_while(|d| *d <= end)
            .flat_map(|d| Self::samples_for_day(subscription_id, d))
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::aggregator::summarize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let source = MockMetricSource::new();
        let a = source.fetch_samples("sub-001", day(1, 1), day(1, 31)).await.unwrap();
        let b = source.fetch_samples("sub-001", day(1, 1), day(1, 31)).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_sub_ranges_agree_with_full_range() {
        let source = MockMetricSource::new();
        let full = source.fetch_samples("sub-002", day(2, 1), day(2, 10)).await.unwrap();
        let part = source.fetch_samples("sub-002", day(2, 5), day(2, 5)).await.unwrap();
        let expected: Vec<_> = full.into_iter().filter(|s| s.date == day(2, 5)).collect();
        assert_eq!(part, expected);
    }

    #[tokio::test]
    async fn test_subscriptions_differ() {
        let source = MockMetricSource::new();
        let a = source.fetch_samples("sub-001", day(3, 1), day(3, 14)).await.unwrap();
        let b = source.fetch_samples("sub-002", day(3, 1), day(3, 14)).await.unwrap();
        assert_ne!(
            summarize("sub-001", &a).total_tokens,
            summarize("sub-002", &b).total_tokens
        );
    }

    #[tokio::test]
    async fn test_samples_stay_inside_range_and_cover_every_day() {
        let source = MockMetricSource::new();
        let samples = source.fetch_samples("sub-003", day(4, 1), day(4, 7)).await.unwrap();

        assert!(samples.iter().all(|s| s.date >= day(4, 1) && s.date <= day(4, 7)));
        let summary = summarize("sub-003", &samples);
        assert_eq!(summary.daily.len(), 7);
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let source = MockMetricSource::new();
        let samples = source.fetch_samples("sub-001", day(5, 2), day(5, 1)).await.unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_covers_every_subscription() {
        let source = MockMetricSource::new();
        let ids = vec!["sub-001".to_string(), "sub-002".to_string()];
        let all = source.fetch_all_samples(&ids, day(7, 1), day(7, 3)).await.unwrap();

        for id in &ids {
            let own = source.fetch_samples(id, day(7, 1), day(7, 3)).await.unwrap();
            let from_all: Vec<_> = all.iter().filter(|s| &s.subscription_id == id).cloned().collect();
            assert_eq!(own, from_all);
        }
    }

    struct SlowSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MetricSource for SlowSource {
        async fn fetch_samples(
            &self,
            subscription_id: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<UsageSample>, ManagerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![UsageSample::new(subscription_id, start, 1)])
        }

        fn backend_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_default_fan_out_is_bounded() {
        let source = SlowSource {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let ids: Vec<String> = (0..40).map(|i| format!("sub-{:03}", i)).collect();

        let samples = source.fetch_all_samples(&ids, day(8, 1), day(8, 1)).await.unwrap();

        assert_eq!(samples.len(), 40);
        assert!(source.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_FETCHES);
    }

    #[test]
    fn test_day_split_preserves_totals() {
        for d in 1..=28 {
            let samples = MockMetricSource::samples_for_day("sub-004", day(6, d));
            assert!((1..=3).contains(&samples.len()));

            let tokens: u64 = samples.iter().map(|s| s.tokens).sum();
            let prompt: u64 = samples.iter().map(|s| s.prompt_tokens).sum();
            let completion: u64 = samples.iter().map(|s| s.completion_tokens).sum();
            assert_eq!(prompt + completion, tokens);
            assert!(tokens >= 7_000 && tokens <= 260_000);
        }
    }

    #[test]
    fn test_weekends_are_quieter_on_average() {
        let mut weekday_total = 0u64;
        let mut weekday_days = 0u64;
        let mut weekend_total = 0u64;
        let mut weekend_days = 0u64;

        for date in day(1, 1).iter_days().take(120) {
            let tokens: u64 = MockMetricSource::samples_for_day("sub-001", date)
                .iter()
                .map(|s| s.tokens)
                .sum();
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                weekend_total += tokens;
                weekend_days += 1;
            } else {
                weekday_total += tokens;
                weekday_days += 1;
            }
        }

        assert!(weekend_total / weekend_days < weekday_total / weekday_days);
    }
}
