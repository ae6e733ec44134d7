//! Dashboard aggregator (§4.6): a pure derived view over a recent time
//! window, computed fresh on every call rather than maintained incrementally.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{ItemKind, SensorKind};
use crate::error::Result;
use crate::store::Store;
use crate::time::Clock;

/// Health status band, derived from [`DashboardMetrics::health_score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    fn from_score(score: f64) -> HealthStatus {
        if score >= 80.0 {
            HealthStatus::Excellent
        } else if score >= 60.0 {
            HealthStatus::Good
        } else if score >= 40.0 {
            HealthStatus::Fair
        } else {
            HealthStatus::Poor
        }
    }
}

/// Per-tank level deviation, broken out of the aggregate pressure figures
/// since a tank's level behaves differently from a junction's pressure and
/// the original's `tank_levels` list reports it separately.
#[derive(Debug, Clone, Serialize)]
pub struct TankLevelDeviation {
    pub location_id: String,
    pub avg_level_scada: f64,
    pub avg_level_expected: f64,
    pub deviation_percent: f64,
}

/// Derived metrics for a network over `[t_now - window, t_now]` (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct DashboardMetrics {
    pub total_demand_scada: f64,
    pub total_demand_expected: f64,
    pub demand_deviation_percent: f64,
    pub avg_pressure_scada: f64,
    pub avg_pressure_expected: f64,
    pub pressure_deviation_percent: f64,
    pub sensor_coverage_percent: f64,
    pub anomaly_rate_percent: f64,
    pub health_score: f64,
    pub health_status: HealthStatus,
    pub tank_levels: Vec<TankLevelDeviation>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn relative_deviation_percent(actual: f64, expected: f64) -> f64 {
    if expected > 0.0 {
        (actual - expected) / expected * 100.0
    } else {
        0.0
    }
}

/// Computes [`DashboardMetrics`] for `network_id` over the trailing
/// `window_minutes`. Grounded verbatim on
/// `monitoring_router.py::get_dashboard_metrics`: the 0.4/0.3/0.2/0.1 health
/// weights and 2/5/3.33 normalization slopes are copied exactly (spec §4.6,
/// §9 Q3 — preserved as documented magic constants, not re-derived).
pub async fn dashboard_metrics(
    store: &Arc<dyn Store>,
    clock: &Arc<dyn Clock>,
    network_id: Uuid,
    window_minutes: f64,
) -> Result<DashboardMetrics> {
    let now = clock.now();
    let since = now - ChronoDuration::milliseconds((window_minutes * 60_000.0) as i64);

    let readings = store.readings_in_window(network_id, since, now).await?;
    let expected_values = store.expected_values_in_window(network_id, since, now).await?;
    let anomalies = store.anomalies_in_window(network_id, since, now).await?;
    let items = store.list_network_items(network_id).await?;

    let total_demand_scada: f64 = readings
        .iter()
        .filter(|r| r.sensor_kind == SensorKind::Flow)
        .map(|r| r.value)
        .sum();
    let total_demand_expected: f64 = expected_values
        .iter()
        .filter(|v| v.sensor_kind == SensorKind::Flow)
        .map(|v| v.expected_value)
        .sum();
    let demand_deviation_percent = relative_deviation_percent(total_demand_scada, total_demand_expected);

    let pressure_readings: Vec<f64> = readings
        .iter()
        .filter(|r| r.sensor_kind == SensorKind::Pressure)
        .map(|r| r.value)
        .collect();
    let pressure_expected: Vec<f64> = expected_values
        .iter()
        .filter(|v| v.sensor_kind == SensorKind::Pressure)
        .map(|v| v.expected_value)
        .collect();
    let avg_pressure_scada = mean(&pressure_readings);
    let avg_pressure_expected = mean(&pressure_expected);
    let pressure_deviation_percent = relative_deviation_percent(avg_pressure_scada, avg_pressure_expected);

    let distinct_locations: std::collections::HashSet<&str> =
        readings.iter().map(|r| r.location_id.as_str()).collect();
    let sensor_coverage_percent = if items.is_empty() {
        0.0
    } else {
        distinct_locations.len() as f64 / items.len() as f64 * 100.0
    };

    let anomaly_rate_percent = if readings.is_empty() {
        0.0
    } else {
        anomalies.len() as f64 / readings.len() as f64 * 100.0
    };

    let tank_levels: Vec<TankLevelDeviation> = items
        .iter()
        .filter(|item| item.kind == ItemKind::Tank)
        .map(|tank| {
            let scada: Vec<f64> = readings
                .iter()
                .filter(|r| r.sensor_kind == SensorKind::Level && r.location_id == tank.item_id)
                .map(|r| r.value)
                .collect();
            let expected: Vec<f64> = expected_values
                .iter()
                .filter(|v| v.sensor_kind == SensorKind::Level && v.location_id == tank.item_id)
                .map(|v| v.expected_value)
                .collect();
            let avg_level_scada = mean(&scada);
            let avg_level_expected = mean(&expected);
            TankLevelDeviation {
                location_id: tank.item_id.clone(),
                avg_level_scada,
                avg_level_expected,
                deviation_percent: relative_deviation_percent(avg_level_scada, avg_level_expected),
            }
        })
        .collect();

    let anomaly_score = (100.0 - 2.0 * anomaly_rate_percent).clamp(0.0, 100.0);
    let pressure_score = (100.0 - 5.0 * pressure_deviation_percent.abs()).clamp(0.0, 100.0);
    let demand_score = (100.0 - 3.33 * demand_deviation_percent.abs()).clamp(0.0, 100.0);
    let coverage_score = sensor_coverage_percent;
    let health_score =
        (0.4 * anomaly_score + 0.3 * pressure_score + 0.2 * demand_score + 0.1 * coverage_score).clamp(0.0, 100.0);

    Ok(DashboardMetrics {
        total_demand_scada,
        total_demand_expected,
        demand_deviation_percent,
        avg_pressure_scada,
        avg_pressure_expected,
        pressure_deviation_percent,
        sensor_coverage_percent,
        anomaly_rate_percent,
        health_score,
        health_status: HealthStatus::from_score(health_score),
        tank_levels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Anomaly, ExpectedValue, ItemKind, Network, NetworkItem, ScadaReading, Severity};
    use crate::store::memory::MemoryStore;
    use crate::time::test_support::FixedClock;
    use chrono::{TimeZone, Utc};

    fn setup(network_id: Uuid, t0: chrono::DateTime<Utc>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_network(Network {
            id: network_id,
            name: "test".into(),
            inp_path: "net.inp".into(),
            baseline_computed_at: Some(t0),
        });
        store
    }

    #[tokio::test]
    async fn perfect_conditions_yield_excellent_health() {
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let store = setup(network_id, t0);
        tokio_test_insert_items(&store, network_id).await;

        for loc in ["J-1", "J-2"] {
            store
                .insert_readings(&[ScadaReading {
                    network_id,
                    sensor_id: format!("PRESSURE_{loc}"),
                    sensor_kind: SensorKind::Pressure,
                    location_id: loc.into(),
                    value: 50.0,
                    timestamp: t0,
                }])
                .await
                .unwrap();
            store
                .insert_expected_values(&[ExpectedValue {
                    network_id,
                    timestamp: t0,
                    location_id: loc.into(),
                    sensor_kind: SensorKind::Pressure,
                    expected_value: 50.0,
                    eps_hour: 12.0,
                }])
                .await
                .unwrap();
        }

        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0));
        let store_dyn: Arc<dyn Store> = store;
        let metrics = dashboard_metrics(&store_dyn, &clock, network_id, 15.0).await.unwrap();

        assert_eq!(metrics.anomaly_rate_percent, 0.0);
        assert_eq!(metrics.pressure_deviation_percent, 0.0);
        assert_eq!(metrics.sensor_coverage_percent, 100.0);
        assert!((metrics.health_score - 100.0).abs() < 1e-6);
        assert_eq!(metrics.health_status, HealthStatus::Excellent);
    }

    #[tokio::test]
    async fn degraded_conditions_yield_poor_health() {
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let store = setup(network_id, t0);
        tokio_test_insert_items(&store, network_id).await;

        // Two readings, one flagged as an anomaly -> 50% anomaly rate.
        store
            .insert_readings(&[
                ScadaReading {
                    network_id,
                    sensor_id: "PRESSURE_J-1".into(),
                    sensor_kind: SensorKind::Pressure,
                    location_id: "J-1".into(),
                    value: 60.0,
                    timestamp: t0,
                },
                ScadaReading {
                    network_id,
                    sensor_id: "PRESSURE_J-1".into(),
                    sensor_kind: SensorKind::Pressure,
                    location_id: "J-1".into(),
                    value: 60.0,
                    timestamp: t0,
                },
            ])
            .await
            .unwrap();
        store
            .insert_expected_values(&[ExpectedValue {
                network_id,
                timestamp: t0,
                location_id: "J-1".into(),
                sensor_kind: SensorKind::Pressure,
                expected_value: 50.0, // actual 60 vs expected 50 -> 20% deviation
                eps_hour: 12.0,
            }])
            .await
            .unwrap();
        store
            .insert_anomalies(&[Anomaly {
                network_id,
                timestamp: t0,
                sensor_id: "PRESSURE_J-1".into(),
                sensor_kind: SensorKind::Pressure,
                location_id: "J-1".into(),
                actual_value: 60.0,
                expected_value: 50.0,
                deviation_percent: 20.0,
                threshold_percent: 10.0,
                severity: Severity::High,
            }])
            .await
            .unwrap();

        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0));
        let store_dyn: Arc<dyn Store> = store;
        let metrics = dashboard_metrics(&store_dyn, &clock, network_id, 15.0).await.unwrap();

        assert_eq!(metrics.anomaly_rate_percent, 50.0);
        // only J-1 covered out of J-1/J-2 -> 50%
        assert_eq!(metrics.sensor_coverage_percent, 50.0);
        assert!(metrics.health_score < 60.0);
        assert_ne!(metrics.health_status, HealthStatus::Excellent);
    }

    #[tokio::test]
    async fn tank_level_deviation_is_broken_out_per_tank() {
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let store = setup(network_id, t0);
        store
            .insert_network_items(&[NetworkItem {
                network_id,
                item_id: "T-1".into(),
                kind: ItemKind::Tank,
            }])
            .await
            .unwrap();
        store
            .insert_readings(&[ScadaReading {
                network_id,
                sensor_id: "LEVEL_T-1".into(),
                sensor_kind: SensorKind::Level,
                location_id: "T-1".into(),
                value: 9.0,
                timestamp: t0,
            }])
            .await
            .unwrap();
        store
            .insert_expected_values(&[ExpectedValue {
                network_id,
                timestamp: t0,
                location_id: "T-1".into(),
                sensor_kind: SensorKind::Level,
                expected_value: 8.0,
                eps_hour: 12.0,
            }])
            .await
            .unwrap();

        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0));
        let store_dyn: Arc<dyn Store> = store;
        let metrics = dashboard_metrics(&store_dyn, &clock, network_id, 15.0).await.unwrap();

        assert_eq!(metrics.tank_levels.len(), 1);
        let tank = &metrics.tank_levels[0];
        assert_eq!(tank.location_id, "T-1");
        assert_eq!(tank.avg_level_scada, 9.0);
        assert_eq!(tank.avg_level_expected, 8.0);
        assert!((tank.deviation_percent - 12.5).abs() < 1e-9);
    }

    async fn tokio_test_insert_items(store: &Arc<MemoryStore>, network_id: Uuid) {
        store
            .insert_network_items(&[
                NetworkItem {
                    network_id,
                    item_id: "J-1".into(),
                    kind: ItemKind::Junction,
                },
                NetworkItem {
                    network_id,
                    item_id: "J-2".into(),
                    kind: ItemKind::Junction,
                },
            ])
            .await
            .unwrap();
    }
}
