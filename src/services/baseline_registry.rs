//! Immutable per-location baseline registry (component C2).

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{Baseline, ItemKind, NetworkItem, SensorKind};
use crate::error::{CoreError, Result};
use crate::hydraulic::HydraulicEngine;
use crate::store::Store;
use crate::time::Clock;

/// Computes and persists the one-time hydraulic baseline for a network.
///
/// Baselines are immutable once computed: a second call is rejected with
/// [`CoreError::AlreadyComputed`] unless the caller explicitly passes
/// `recompute = true`.
pub struct BaselineRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl BaselineRegistry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Loads the network's `.inp` file with `engine`, solves once, and
    /// writes one [`NetworkItem`] per network element plus one [`Baseline`]
    /// per applicable `(item, sensor_kind)` pair:
    /// - junctions: pressure
    /// - pipes: flow
    /// - tanks: pressure and level (level falls back through
    ///   initial-level → elevation → pressure if the engine can't report a
    ///   direct tank level; this crate's `HydraulicEngine::expect` contract
    ///   already folds that fallback into a single `Level` read, so the
    ///   fallback chain lives in the adapter rather than here)
    pub async fn compute_baseline(
        &self,
        network_id: Uuid,
        mut engine: Box<dyn HydraulicEngine>,
        recompute: bool,
    ) -> Result<()> {
        let network = self
            .store
            .get_network(network_id)
            .await?
            .ok_or(CoreError::NetworkNotFound(network_id))?;

        if network.baseline_computed_at.is_some() && !recompute {
            return Err(CoreError::AlreadyComputed(network_id));
        }

        engine.solve()?;

        let enumerated = engine.enumerate_items();
        if enumerated.is_empty() {
            return Err(CoreError::EngineLoadError(format!(
                "no network items found for network {network_id}"
            )));
        }

        let items: Vec<NetworkItem> = enumerated
            .iter()
            .map(|(item_id, kind)| NetworkItem {
                network_id,
                item_id: item_id.clone(),
                kind: *kind,
            })
            .collect();

        let mut baselines = Vec::new();
        for (item_id, kind) in &enumerated {
            match kind {
                ItemKind::Junction => {
                    if let Some(value) = engine.expect(item_id, SensorKind::Pressure) {
                        baselines.push(Baseline {
                            network_id,
                            location_id: item_id.clone(),
                            sensor_kind: SensorKind::Pressure,
                            value,
                        });
                    }
                }
                ItemKind::Pipe => {
                    if let Some(value) = engine.expect(item_id, SensorKind::Flow) {
                        baselines.push(Baseline {
                            network_id,
                            location_id: item_id.clone(),
                            sensor_kind: SensorKind::Flow,
                            value,
                        });
                    }
                }
                ItemKind::Tank => {
                    if let Some(value) = engine.expect(item_id, SensorKind::Pressure) {
                        baselines.push(Baseline {
                            network_id,
                            location_id: item_id.clone(),
                            sensor_kind: SensorKind::Pressure,
                            value,
                        });
                    }
                    if let Some(value) = engine.expect(item_id, SensorKind::Level) {
                        baselines.push(Baseline {
                            network_id,
                            location_id: item_id.clone(),
                            sensor_kind: SensorKind::Level,
                            value,
                        });
                    }
                }
            }
        }

        if baselines.is_empty() {
            return Err(CoreError::EngineLoadError(format!(
                "no baseline values computed for network {network_id}"
            )));
        }

        let computed_at = self.clock.now();
        self.store
            .commit_baseline(network_id, &items, &baselines, computed_at)
            .await?;

        tracing::info!(
            network_id = %network_id,
            items = items.len(),
            baselines = baselines.len(),
            "baseline computed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Network;
    use crate::store::memory::MemoryStore;
    use crate::time::SystemClock;

    fn test_registry() -> (BaselineRegistry, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let network_id = Uuid::new_v4();
        store.seed_network(Network {
            id: network_id,
            name: "test".into(),
            inp_path: "net.inp".into(),
            baseline_computed_at: None,
        });
        let registry = BaselineRegistry::new(store.clone(), Arc::new(SystemClock));
        (registry, store, network_id)
    }

    fn stub_engine() -> Box<dyn HydraulicEngine> {
        Box::new(crate::test_support::stub_engine())
    }

    #[tokio::test]
    async fn computes_baseline_for_every_item_kind() {
        let (registry, store, network_id) = test_registry();
        registry
            .compute_baseline(network_id, stub_engine(), false)
            .await
            .unwrap();

        let baselines = store.list_baselines(network_id).await.unwrap();
        assert_eq!(baselines.len(), 4); // J-1 pressure, P-1 flow, T-1 pressure+level

        let items = store.list_network_items(network_id).await.unwrap();
        assert_eq!(items.len(), 3);

        let network = store.get_network(network_id).await.unwrap().unwrap();
        assert!(network.baseline_computed_at.is_some());
    }

    #[tokio::test]
    async fn rejects_recompute_without_explicit_flag() {
        let (registry, _store, network_id) = test_registry();
        registry
            .compute_baseline(network_id, stub_engine(), false)
            .await
            .unwrap();

        let err = registry
            .compute_baseline(network_id, stub_engine(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyComputed(id) if id == network_id));
    }

    #[tokio::test]
    async fn allows_recompute_when_explicitly_requested() {
        let (registry, _store, network_id) = test_registry();
        registry
            .compute_baseline(network_id, stub_engine(), false)
            .await
            .unwrap();

        registry
            .compute_baseline(network_id, stub_engine(), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_network_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let registry = BaselineRegistry::new(store, Arc::new(SystemClock));
        let err = registry
            .compute_baseline(Uuid::new_v4(), stub_engine(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NetworkNotFound(_)));
    }
}
