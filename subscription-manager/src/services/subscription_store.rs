//! Subscription state: the management backend owns it, this layer relays
//! reads and forwards writes without caching anything between calls.

use crate::error::ManagerError;
use crate::models::Subscription;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Subscription, ManagerError>;

    /// All subscriptions, ordered by id.
    async fn list(&self) -> Result<Vec<Subscription>, ManagerError>;

    /// Setting the current value again is a successful no-op.
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Subscription, ManagerError>;

    /// `None` clears the limit; negative values fail with `InvalidLimit`.
    async fn set_limit(&self, id: &str, limit: Option<i64>) -> Result<Subscription, ManagerError>;

    /// Flip the enabled flag.
    async fn toggle(&self, id: &str) -> Result<Subscription, ManagerError> {
        let current = self.get(id).await?;
        self.set_enabled(id, !current.enabled).await
    }

    fn backend_name(&self) -> &'static str;
}

/// Reject negative limits before any backend is contacted.
pub fn validate_limit(limit: Option<i64>) -> Result<Option<u64>, ManagerError> {
    match limit {
        None => Ok(None),
        Some(value) if value < 0 => Err(ManagerError::InvalidLimit(value)),
        Some(value) => Ok(Some(value as u64)),
    }
}

/// In-memory store for local development and tests.
///
/// Each subscription sits behind its own mutex so concurrent writes to the
/// same id are serialised while different ids proceed independently.
pub struct MockSubscriptionStore {
    subscriptions: DashMap<String, Arc<Mutex<Subscription>>>,
}

impl MockSubscriptionStore {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        let map = DashMap::new();
        for subscription in subscriptions {
            map.insert(subscription.id.clone(), Arc::new(Mutex::new(subscription)));
        }
        Self { subscriptions: map }
    }

    /// Store seeded with the development fixtures.
    pub fn with_fixtures() -> Self {
        Self::new(fixture_subscriptions())
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<Subscription>>, ManagerError> {
        self.subscriptions
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl SubscriptionStore for MockSubscriptionStore {
    async fn get(&self, id: &str) -> Result<Subscription, ManagerError> {
        let entry = self.entry(id)?;
        let subscription = entry.lock().await;
        Ok(subscription.clone())
    }

    async fn list(&self) -> Result<Vec<Subscription>, ManagerError> {
        // Collect handles first so no map guard is held across an await
        let entries: Vec<Arc<Mutex<Subscription>>> = self
            .subscriptions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut subscriptions = Vec::with_capacity(entries.len());
        for entry in entries {
            subscriptions.push(entry.lock().await.clone());
        }
        subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subscriptions)
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Subscription, ManagerError> {
        let entry = self.entry(id)?;
        let mut subscription = entry.lock().await;
        if subscription.enabled != enabled {
            subscription.enabled = enabled;
            tracing::info!(subscription_id = %id, enabled, "[MOCK] Subscription state changed");
        }
        Ok(subscription.clone())
    }

    async fn set_limit(&self, id: &str, limit: Option<i64>) -> Result<Subscription, ManagerError> {
        let limit = validate_limit(limit)?;
        let entry = self.entry(id)?;
        let mut subscription = entry.lock().await;
        subscription.token_limit = limit;
        tracing::info!(subscription_id = %id, token_limit = ?limit, "[MOCK] Token limit updated");
        Ok(subscription.clone())
    }

    async fn toggle(&self, id: &str) -> Result<Subscription, ManagerError> {
        let entry = self.entry(id)?;
        let mut subscription = entry.lock().await;
        subscription.enabled = !subscription.enabled;
        tracing::info!(
            subscription_id = %id,
            enabled = subscription.enabled,
            "[MOCK] Subscription toggled"
        );
        Ok(subscription.clone())
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

/// Development fixtures mirroring a typical LLM gateway product.
pub fn fixture_subscriptions() -> Vec<Subscription> {
    let created = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single();
    let fixture = |id: &str, name: &str, enabled, limit, email: &str, date| Subscription {
        id: id.to_string(),
        display_name: name.to_string(),
        enabled,
        token_limit: limit,
        scope: "/products/llm-api".to_string(),
        owner_email: Some(email.to_string()),
        created_date: date,
    };

    vec![
        fixture(
            "sub-001",
            "Production API Access",
            true,
            Some(25_000_000),
            "team-a@example.com",
            created(2024, 1, 15),
        ),
        fixture(
            "sub-002",
            "Development Team",
            true,
            Some(3_500_000),
            "dev-team@example.com",
            created(2024, 2, 20),
        ),
        fixture(
            "sub-003",
            "Testing Environment",
            false,
            None,
            "qa@example.com",
            created(2024, 3, 10),
        ),
        fixture(
            "sub-004",
            "Partner Integration",
            true,
            Some(50_000_000),
            "partner@external.com",
            created(2024, 4, 5),
        ),
        fixture(
            "sub-005",
            "Internal Tools",
            true,
            Some(2_000_000),
            "internal@example.com",
            created(2024, 5, 1),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = MockSubscriptionStore::with_fixtures();
        let result = store.get("sub-404").await;
        assert!(matches!(result, Err(ManagerError::NotFound(id)) if id == "sub-404"));
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let store = MockSubscriptionStore::with_fixtures();
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["sub-001", "sub-002", "sub-003", "sub-004", "sub-005"]);
    }

    #[tokio::test]
    async fn test_set_enabled_is_idempotent() {
        let store = MockSubscriptionStore::with_fixtures();

        let first = store.set_enabled("sub-003", true).await.unwrap();
        let second = store.set_enabled("sub-003", true).await.unwrap();

        assert!(first.enabled);
        assert_eq!(first, second);
        assert_eq!(store.get("sub-003").await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let store = MockSubscriptionStore::with_fixtures();
        assert!(!store.toggle("sub-001").await.unwrap().enabled);
        assert!(store.toggle("sub-001").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_negative_limit_rejected_without_change() {
        let store = MockSubscriptionStore::with_fixtures();
        let result = store.set_limit("sub-001", Some(-1)).await;
        assert!(matches!(result, Err(ManagerError::InvalidLimit(-1))));
        assert_eq!(
            store.get("sub-001").await.unwrap().token_limit,
            Some(25_000_000)
        );
    }

    #[tokio::test]
    async fn test_invalid_limit_checked_before_lookup() {
        let store = MockSubscriptionStore::with_fixtures();
        let result = store.set_limit("sub-404", Some(-3)).await;
        assert!(matches!(result, Err(ManagerError::InvalidLimit(-3))));
    }

    #[tokio::test]
    async fn test_clear_and_zero_limits() {
        let store = MockSubscriptionStore::with_fixtures();
        assert_eq!(store.set_limit("sub-001", None).await.unwrap().token_limit, None);
        assert_eq!(
            store.set_limit("sub-001", Some(0)).await.unwrap().token_limit,
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_concurrent_toggles_do_not_lose_updates() {
        let store = Arc::new(MockSubscriptionStore::with_fixtures());
        let initial = store.get("sub-002").await.unwrap().enabled;

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.toggle("sub-002").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // An even number of flips lands back on the initial state
        assert_eq!(store.get("sub-002").await.unwrap().enabled, initial);
    }

    #[test]
    fn test_validate_limit() {
        assert_eq!(validate_limit(None).unwrap(), None);
        assert_eq!(validate_limit(Some(0)).unwrap(), Some(0));
        assert_eq!(validate_limit(Some(42)).unwrap(), Some(42));
        assert!(matches!(
            validate_limit(Some(-1)),
            Err(ManagerError::InvalidLimit(-1))
        ));
    }
}
