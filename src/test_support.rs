//! Shared test fixtures, used from `#[cfg(test)]` modules across the crate.
//!
//! Mirrors the teacher's `test_support.rs::test_state()` in spirit: one
//! place that builds a ready-to-use in-memory world, so individual test
//! modules don't each hand-roll a `Store`/`HydraulicEngine` double.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{ItemKind, Network, NetworkItem, SensorKind};
use crate::hydraulic::MemoryEngine;
use crate::store::memory::MemoryStore;

/// A fresh in-memory `Store` seeded with one network and three items
/// (a junction, a pipe, and a tank) — enough surface for baseline
/// computation, simulation, and monitoring tests without a real database.
pub fn memory_store() -> (Arc<MemoryStore>, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let network_id = Uuid::new_v4();
    store.seed_network(Network {
        id: network_id,
        name: "demo".into(),
        inp_path: "demo.inp".into(),
        baseline_computed_at: None,
    });
    (store, network_id)
}

/// `network_items` for the network `memory_store` seeds, matching the
/// items `stub_engine` knows about.
pub fn demo_network_items(network_id: Uuid) -> Vec<NetworkItem> {
    vec![
        NetworkItem {
            network_id,
            item_id: "J-1".into(),
            kind: ItemKind::Junction,
        },
        NetworkItem {
            network_id,
            item_id: "P-1".into(),
            kind: ItemKind::Pipe,
        },
        NetworkItem {
            network_id,
            item_id: "T-1".into(),
            kind: ItemKind::Tank,
        },
    ]
}

/// A `MemoryEngine` pre-loaded with plausible values for `demo_network_items`.
pub fn stub_engine() -> MemoryEngine {
    MemoryEngine::new()
        .with_item("J-1", ItemKind::Junction)
        .with_item("P-1", ItemKind::Pipe)
        .with_tank("T-1")
        .with_value("J-1", SensorKind::Pressure, 50.0)
        .with_value("P-1", SensorKind::Flow, 12.0)
        .with_value("T-1", SensorKind::Pressure, 8.0)
        .with_value("T-1", SensorKind::Level, 8.0)
}

pub fn utc_now() -> chrono::DateTime<Utc> {
    Utc::now()
}
