//! Coordinators keyed by configuration id
//!
//! Callers hold a registry handle and look coordinators up explicitly;
//! there is no process-wide instance.

use crate::coordinator::Coordinator;
use crate::error::CoreError;
use dashmap::DashMap;
use futures::future::join_all;
use redboard_types::CycleOutcome;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct CoordinatorRegistry {
    coordinators: DashMap<String, Arc<Coordinator>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a coordinator, returning the one it replaced
    pub fn insert(&self, coordinator: Arc<Coordinator>) -> Option<Arc<Coordinator>> {
        let id = coordinator.config_id().to_string();
        debug!(config_id = %id, "Coordinator registered");
        self.coordinators.insert(id, coordinator)
    }

    pub fn get(&self, config_id: &str) -> Result<Arc<Coordinator>, CoreError> {
        self.coordinators
            .get(config_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoreError::CoordinatorNotFound {
                config_id: config_id.to_string(),
            })
    }

    pub fn remove(&self, config_id: &str) -> Option<Arc<Coordinator>> {
        self.coordinators.remove(config_id).map(|(_, c)| c)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.coordinators.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    /// Refresh every coordinator concurrently; results sorted by id
    pub async fn refresh_all(&self) -> Vec<(String, Result<CycleOutcome, CoreError>)> {
        // Collect first so no map guard is held across an await
        let coordinators: Vec<Arc<Coordinator>> = self
            .coordinators
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut results = join_all(coordinators.iter().map(|c| async move {
            (c.config_id().to_string(), c.trigger_refresh().await)
        }))
        .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinatorConfig, Credentials};
    use crate::fetch::{FixtureFetcher, StaticAuthenticator};
    use crate::state::StateManager;

    fn coordinator(id: &str, state: &Arc<StateManager>) -> Arc<Coordinator> {
        Coordinator::new(
            CoordinatorConfig::new(id, Vec::new()),
            Arc::new(FixtureFetcher::new("/nonexistent")),
            Arc::new(StaticAuthenticator::new(Credentials::new(
                "me@example.com",
                "client-123",
                "s3cret",
            ))),
            Arc::clone(state),
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_unknown_id() {
        let registry = CoordinatorRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(CoreError::CoordinatorNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_insert_replace_remove() {
        let state = Arc::new(StateManager::in_memory().unwrap());
        let registry = CoordinatorRegistry::new();

        assert!(registry.insert(coordinator("b", &state)).is_none());
        assert!(registry.insert(coordinator("a", &state)).is_none());
        assert!(registry.insert(coordinator("a", &state)).is_some());

        assert_eq!(registry.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.get("b").unwrap().config_id(), "b");
        assert!(registry.remove("b").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_coordinator() {
        let state = Arc::new(StateManager::in_memory().unwrap());
        let registry = CoordinatorRegistry::new();
        registry.insert(coordinator("beta", &state));
        registry.insert(coordinator("alpha", &state));

        let results = registry.refresh_all().await;

        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        for (_, outcome) in results {
            assert_eq!(outcome.unwrap(), CycleOutcome::Updated);
        }
    }
}
