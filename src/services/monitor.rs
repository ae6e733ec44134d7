//! Hydraulic-model-backed anomaly detector (component C5).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration as ChronoDuration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{
    deviation_percent, Anomaly, ExpectedValue, ItemKind, NetworkItem, ScadaReading, SensorKind,
    Severity,
};
use crate::error::{CoreError, Result};
use crate::hydraulic::HydraulicEngine;
use crate::status::{EpsSynchronization, LastCheckStats, MonStatus, ServiceState};
use crate::store::Store;
use crate::time::Clock;

/// Tunable parameters for the monitor. `lookback_window` bounds how far back
/// the watermark query looks on the very first cycle (before any reading has
/// been processed); each `*_threshold_percent` is the deviation ratio
/// denominator fed to [`Severity::classify`] for its sensor kind.
#[derive(Debug, Clone)]
pub struct MonConfig {
    pub check_interval: StdDuration,
    pub lookback_window: ChronoDuration,
    pub pressure_threshold_percent: f64,
    pub flow_threshold_percent: f64,
    pub level_threshold_percent: f64,
    pub enable_tank_feedback: bool,
}

impl Default for MonConfig {
    fn default() -> Self {
        Self {
            check_interval: StdDuration::from_secs(60),
            lookback_window: ChronoDuration::minutes(15),
            pressure_threshold_percent: 10.0,
            flow_threshold_percent: 15.0,
            level_threshold_percent: 10.0,
            enable_tank_feedback: true,
        }
    }
}

impl MonConfig {
    fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "check_interval must be non-zero".into(),
            ));
        }
        let minutes = self.check_interval.as_secs_f64() / 60.0;
        if !(0.1..=1440.0).contains(&minutes) {
            return Err(CoreError::InvalidConfig(
                "monitoring_interval_minutes must be in [0.1, 1440]".into(),
            ));
        }
        let window_minutes = self.lookback_window.num_seconds() as f64 / 60.0;
        if !(0.1..=60.0).contains(&window_minutes) {
            return Err(CoreError::InvalidConfig(
                "time_window_minutes must be in [0.1, 60]".into(),
            ));
        }
        for (name, value) in [
            ("pressure_threshold_percent", self.pressure_threshold_percent),
            ("flow_threshold_percent", self.flow_threshold_percent),
            ("level_threshold_percent", self.level_threshold_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(CoreError::InvalidConfig(format!("{name} must be in [0, 100]")));
            }
        }
        Ok(())
    }

    fn threshold_for_kind(&self, kind: SensorKind) -> f64 {
        match kind {
            SensorKind::Pressure => self.pressure_threshold_percent,
            SensorKind::Flow => self.flow_threshold_percent,
            SensorKind::Level => self.level_threshold_percent,
        }
    }
}

/// Applicable `(location_id, sensor_kind)` pairs for a network item, mirroring
/// [`crate::services::baseline_registry`]'s per-kind mapping: junction →
/// pressure, pipe → flow, tank → pressure + level.
fn applicable_sensor_kinds(item: &NetworkItem) -> Vec<SensorKind> {
    match item.kind {
        ItemKind::Junction => vec![SensorKind::Pressure],
        ItemKind::Pipe => vec![SensorKind::Flow],
        ItemKind::Tank => vec![SensorKind::Pressure, SensorKind::Level],
    }
}

/// Detects anomalies by comparing live SCADA readings against a hydraulic
/// engine's expected values for the same location/sensor.
///
/// # Open question: EPS synchronization
/// The original advances "EPS time" by re-solving the complete hydraulic
/// network once per monitoring cycle and treating the current wall-clock
/// hour as the EPS hour, rather than stepping the solver's own Extended
/// Period Simulation clock forward in lockstep with real time. This crate
/// keeps that behavior rather than reimplementing true step-wise EPS
/// advancement, since the monitoring core's contract is with
/// [`HydraulicEngine::solve`], not with any particular solver's internal
/// clock. `eps_synchronization` on [`MonStatus`] reports `current_eps_hour`
/// as this wall-clock hour so the approximation is visible to callers.
pub struct Monitor {
    network_id: Uuid,
    config: MonConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    status: Arc<AsyncMutex<MonStatus>>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(network_id: Uuid, config: MonConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            network_id,
            config,
            store,
            clock,
            status: Arc::new(AsyncMutex::new(MonStatus::new(network_id))),
            cancel: None,
            handle: None,
        }
    }

    pub async fn status(&self) -> MonStatus {
        self.status.lock().await.clone()
    }

    /// Takes exclusive ownership of `engine` for the lifetime of the
    /// background task — no other code ever touches it concurrently.
    pub async fn start(&mut self, mut engine: Box<dyn HydraulicEngine>) -> Result<()> {
        if self.cancel.is_some() {
            return Err(CoreError::AlreadyRunning);
        }
        self.config.validate()?;

        let network = self
            .store
            .get_network(self.network_id)
            .await?
            .ok_or(CoreError::NetworkNotFound(self.network_id))?;
        if network.baseline_computed_at.is_none() {
            return Err(CoreError::BaselineMissing(self.network_id));
        }

        let items = self.store.list_network_items(self.network_id).await?;
        if items.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "no network items found for network {}",
                self.network_id
            )));
        }

        // Initial solve, performed synchronously at start() so the engine is
        // in a consistent state before the background loop's first tick.
        engine
            .solve()
            .map_err(|e| CoreError::EngineLoadError(format!("initial EPS solve failed: {e}")))?;

        {
            let mut status = self.status.lock().await;
            status.state = ServiceState::Starting;
            status.error = None;
            status.eps_synchronization = EpsSynchronization {
                synced: true,
                current_eps_hour: self.clock.fractional_hour_of_day(),
                real_time_hour: self.clock.fractional_hour_of_day(),
            };
        }

        let cancel = CancellationToken::new();
        let cycle = CycleContext {
            network_id: self.network_id,
            config: self.config.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            status: self.status.clone(),
            items,
            engine: AsyncMutex::new(engine),
        };

        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cycle.config.check_interval);
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = cycle.run_cycle().await {
                            match err {
                                CoreError::StoreFatal(_) => {
                                    let mut status = cycle.status.lock().await;
                                    status.state = ServiceState::Error;
                                    status.error = Some(err.to_string());
                                    break;
                                }
                                other => {
                                    tracing::warn!(error = %other, "monitor cycle failed, continuing");
                                    let mut status = cycle.status.lock().await;
                                    status.error = Some(other.to_string());
                                }
                            }
                        }
                    }
                }
            }
        });

        self.cancel = Some(cancel);
        self.handle = Some(handle);

        let mut status = self.status.lock().await;
        status.state = ServiceState::Running;
        status.started_at = Some(self.clock.now());
        Ok(())
    }

    /// Cancels the background task, awaits its graceful termination, then
    /// closes the engine on every exit path (normal or mid-cycle abort).
    pub async fn stop(&mut self) -> Result<()> {
        let Some(cancel) = self.cancel.take() else {
            return Err(CoreError::NotRunning);
        };
        cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        let mut status = self.status.lock().await;
        status.state = ServiceState::Stopped;
        Ok(())
    }
}

struct CycleContext {
    network_id: Uuid,
    config: MonConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    status: Arc<AsyncMutex<MonStatus>>,
    items: Vec<NetworkItem>,
    engine: AsyncMutex<Box<dyn HydraulicEngine>>,
}

impl CycleContext {
    async fn run_cycle(&self) -> Result<()> {
        let loop_start = self.clock.now();
        let current_hour = self.clock.fractional_hour_of_day();

        let since = {
            let status = self.status.lock().await;
            status
                .last_processed_timestamp
                .unwrap_or(loop_start - self.config.lookback_window)
                .max(loop_start - self.config.lookback_window)
        };
        let readings = self
            .store
            .readings_since(self.network_id, since, loop_start)
            .await?;

        let mut engine = self.engine.lock().await;
        engine
            .solve()
            .map_err(|e| CoreError::CycleError(format!("EPS sync failed: {e}")))?;

        let mut anomalies = Vec::new();
        for reading in &readings {
            let Some(expected) = engine.expect(&reading.location_id, reading.sensor_kind) else {
                continue;
            };
            let dev_percent = deviation_percent(reading.value, expected);
            let threshold = self.config.threshold_for_kind(reading.sensor_kind);
            if dev_percent > threshold {
                anomalies.push(Anomaly {
                    network_id: self.network_id,
                    timestamp: loop_start,
                    sensor_id: reading.sensor_id.clone(),
                    sensor_kind: reading.sensor_kind,
                    location_id: reading.location_id.clone(),
                    actual_value: reading.value,
                    expected_value: expected,
                    deviation_percent: dev_percent,
                    threshold_percent: threshold,
                    severity: Severity::classify(dev_percent, threshold),
                });
            }
        }

        // Expected values are emitted for every network item's applicable
        // sensor kinds, independent of whether a reading arrived this cycle
        // (spec §4.5 step 6) — not derived from `readings` above.
        let mut expected_values = Vec::new();
        for item in &self.items {
            for kind in applicable_sensor_kinds(item) {
                if let Some(expected) = engine.expect(&item.item_id, kind) {
                    expected_values.push(ExpectedValue {
                        network_id: self.network_id,
                        timestamp: loop_start,
                        location_id: item.item_id.clone(),
                        sensor_kind: kind,
                        expected_value: expected,
                        eps_hour: current_hour,
                    });
                }
            }
        }

        // Feed observed tank levels back *after* comparing and emitting this
        // cycle's expected values, per-location, so the feedback only shapes
        // the next cycle's `solve()` rather than this cycle's own deviations
        // and ExpectedValue rows (spec §4.5 ordering: compare → store
        // expected → feedback). A single bad tank reading doesn't abort the
        // whole cycle.
        if self.config.enable_tank_feedback {
            for reading in readings
                .iter()
                .filter(|r| r.sensor_kind == SensorKind::Level && engine.is_tank(&r.location_id))
            {
                if let Err(err) = engine.set_tank_level(&reading.location_id, reading.value) {
                    tracing::warn!(
                        location_id = %reading.location_id,
                        error = %err,
                        "failed to feed back tank level, continuing"
                    );
                }
            }
        }
        drop(engine);

        // Anomalies are the system-of-record; expected values are a lossy
        // diagnostic persisted in a separate transaction. If this insert
        // fails after anomalies already landed, the watermark still
        // advances below rather than re-processing the same readings
        // next cycle (spec §5 ordering).
        if !anomalies.is_empty() {
            self.store.insert_anomalies(&anomalies).await?;
        }
        if !expected_values.is_empty() {
            if let Err(err) = self.store.insert_expected_values(&expected_values).await {
                tracing::warn!(error = %err, "failed to persist expected values, watermark still advances");
            }
        }

        let last_processed_timestamp = readings
            .iter()
            .map(|r: &ScadaReading| r.timestamp)
            .max()
            .or(Some(loop_start));

        let comparison_time_ms = (self.clock.now() - loop_start).num_milliseconds() as f64;
        let mut status = self.status.lock().await;
        status.last_check_time = Some(loop_start);
        status.last_processed_timestamp = last_processed_timestamp;
        status.total_anomalies_detected += anomalies.len() as u64;
        status.eps_synchronization = EpsSynchronization {
            synced: true,
            current_eps_hour: current_hour,
            real_time_hour: current_hour,
        };
        status.last_check_stats = LastCheckStats {
            readings_processed: readings.len(),
            anomalies_found: anomalies.len(),
            comparison_time_ms,
        };
        status.error = None;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Network, SensorKind};
    use crate::hydraulic::MemoryEngine;
    use crate::store::memory::MemoryStore;
    use crate::time::test_support::FixedClock;
    use chrono::{TimeZone, Utc};

    fn stub_engine() -> Box<dyn HydraulicEngine> {
        Box::new(
            MemoryEngine::new()
                .with_item("J-1", ItemKind::Junction)
                .with_value("J-1", SensorKind::Pressure, 50.0)
                .with_tank("T-1")
                .with_value("T-1", SensorKind::Pressure, 5.0)
                .with_value("T-1", SensorKind::Level, 5.0),
        )
    }

    async fn seeded_store(network_id: Uuid, baseline_computed_at: Option<chrono::DateTime<Utc>>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_network(Network {
            id: network_id,
            name: "test".into(),
            inp_path: "net.inp".into(),
            baseline_computed_at,
        });
        store
            .insert_network_items(&[
                crate::domain::NetworkItem {
                    network_id,
                    item_id: "J-1".into(),
                    kind: ItemKind::Junction,
                },
                crate::domain::NetworkItem {
                    network_id,
                    item_id: "T-1".into(),
                    kind: ItemKind::Tank,
                },
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn start_requires_baseline() {
        let network_id = Uuid::new_v4();
        let store = seeded_store(network_id, None).await;
        let mut monitor = Monitor::new(
            network_id,
            MonConfig::default(),
            store,
            Arc::new(crate::time::SystemClock),
        );
        let err = monitor.start(stub_engine()).await.unwrap_err();
        assert!(matches!(err, CoreError::BaselineMissing(_)));
    }

    #[tokio::test]
    async fn lifecycle_transitions_and_rejects_double_start() {
        let network_id = Uuid::new_v4();
        let store = seeded_store(network_id, Some(Utc::now())).await;
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()));
        let mut monitor = Monitor::new(network_id, MonConfig::default(), store, clock);

        monitor.start(stub_engine()).await.unwrap();
        assert_eq!(monitor.status().await.state, ServiceState::Running);

        let err = monitor.start(stub_engine()).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning));

        monitor.stop().await.unwrap();
        assert_eq!(monitor.status().await.state, ServiceState::Stopped);

        let err = monitor.stop().await.unwrap_err();
        assert!(matches!(err, CoreError::NotRunning));
    }

    #[tokio::test]
    async fn cycle_flags_deviation_past_threshold_and_advances_watermark() {
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let store = seeded_store(network_id, Some(t0)).await;
        store
            .insert_readings(&[ScadaReading {
                network_id,
                sensor_id: "PRESSURE_J-1".into(),
                sensor_kind: SensorKind::Pressure,
                location_id: "J-1".into(),
                value: 65.0, // 30% above the 50.0 expected value
                timestamp: t0 - ChronoDuration::seconds(30),
            }])
            .await
            .unwrap();

        let clock = Arc::new(FixedClock::new(t0));
        let cycle = CycleContext {
            network_id,
            config: MonConfig::default(),
            store: store.clone(),
            clock,
            status: Arc::new(AsyncMutex::new(MonStatus::new(network_id))),
            items: store.list_network_items(network_id).await.unwrap(),
            engine: AsyncMutex::new(stub_engine()),
        };

        cycle.run_cycle().await.unwrap();

        let anomalies = store.list_anomalies(network_id).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::Critical);

        let status = cycle.status.lock().await;
        assert_eq!(status.last_check_stats.readings_processed, 1);
        assert_eq!(status.last_check_stats.anomalies_found, 1);
        assert_eq!(status.total_anomalies_detected, 1);
        assert_eq!(status.last_processed_timestamp, Some(t0 - ChronoDuration::seconds(30)));
    }

    #[tokio::test]
    async fn expected_values_emitted_for_every_item_even_without_a_reading() {
        // J-1 and T-1 both exist in the network, but no readings arrive this
        // cycle for either. Spec §4.5 step 6 requires an ExpectedValue per
        // applicable sensor kind for every NetworkItem regardless.
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let store = seeded_store(network_id, Some(t0)).await;

        let clock = Arc::new(FixedClock::new(t0));
        let cycle = CycleContext {
            network_id,
            config: MonConfig::default(),
            store: store.clone(),
            clock,
            status: Arc::new(AsyncMutex::new(MonStatus::new(network_id))),
            items: store.list_network_items(network_id).await.unwrap(),
            engine: AsyncMutex::new(stub_engine()),
        };

        cycle.run_cycle().await.unwrap();

        let expected = store
            .expected_values_in_window(network_id, t0 - ChronoDuration::minutes(1), t0 + ChronoDuration::minutes(1))
            .await
            .unwrap();
        // J-1 pressure, T-1 pressure, T-1 level
        assert_eq!(expected.len(), 3);
        assert!(expected.iter().any(|v| v.location_id == "T-1" && v.sensor_kind == SensorKind::Level));
    }

    #[tokio::test]
    async fn tank_feedback_is_skipped_when_disabled() {
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let store = seeded_store(network_id, Some(t0)).await;
        store
            .insert_readings(&[ScadaReading {
                network_id,
                sensor_id: "LEVEL_T-1".into(),
                sensor_kind: SensorKind::Level,
                location_id: "T-1".into(),
                value: 7.5,
                timestamp: t0 - ChronoDuration::seconds(10),
            }])
            .await
            .unwrap();

        let clock = Arc::new(FixedClock::new(t0));
        let mut config = MonConfig::default();
        config.enable_tank_feedback = false;
        let cycle = CycleContext {
            network_id,
            config,
            store: store.clone(),
            clock,
            status: Arc::new(AsyncMutex::new(MonStatus::new(network_id))),
            items: store.list_network_items(network_id).await.unwrap(),
            engine: AsyncMutex::new(stub_engine()),
        };

        cycle.run_cycle().await.unwrap();

        let expected = store
            .expected_values_in_window(network_id, t0 - ChronoDuration::minutes(1), t0 + ChronoDuration::minutes(1))
            .await
            .unwrap();
        let level = expected
            .iter()
            .find(|v| v.location_id == "T-1" && v.sensor_kind == SensorKind::Level)
            .unwrap();
        // feedback disabled: the engine's original 5.0 level stays the expected value,
        // not the 7.5 just read.
        assert_eq!(level.expected_value, 5.0);
    }

    #[tokio::test]
    async fn tank_feedback_applies_after_comparison_and_expected_value_emission() {
        // With feedback enabled, a tank-level reading that deviates from the
        // engine's expected value must still (a) be flagged as an anomaly
        // and (b) produce a model-derived ExpectedValue for this cycle —
        // both computed against the pre-feedback model state. Only the
        // *next* cycle's `solve()` should see the fed-back level.
        let network_id = Uuid::new_v4();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let store = seeded_store(network_id, Some(t0)).await;
        store
            .insert_readings(&[ScadaReading {
                network_id,
                sensor_id: "LEVEL_T-1".into(),
                sensor_kind: SensorKind::Level,
                location_id: "T-1".into(),
                value: 7.5, // 50% above the 5.0 expected value
                timestamp: t0 - ChronoDuration::seconds(10),
            }])
            .await
            .unwrap();

        let clock = Arc::new(FixedClock::new(t0));
        let mut config = MonConfig::default();
        config.enable_tank_feedback = true;
        let engine = stub_engine();
        let cycle = CycleContext {
            network_id,
            config,
            store: store.clone(),
            clock,
            status: Arc::new(AsyncMutex::new(MonStatus::new(network_id))),
            items: store.list_network_items(network_id).await.unwrap(),
            engine: AsyncMutex::new(engine),
        };

        cycle.run_cycle().await.unwrap();

        let anomalies = store.list_anomalies(network_id).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].location_id, "T-1");
        assert_eq!(anomalies[0].sensor_kind, SensorKind::Level);
        assert_eq!(anomalies[0].expected_value, 5.0);

        let expected = store
            .expected_values_in_window(network_id, t0 - ChronoDuration::minutes(1), t0 + ChronoDuration::minutes(1))
            .await
            .unwrap();
        let level = expected
            .iter()
            .find(|v| v.location_id == "T-1" && v.sensor_kind == SensorKind::Level)
            .unwrap();
        // model-derived, not the just-observed 7.5 — feedback hasn't happened yet
        // when this cycle's ExpectedValue is computed.
        assert_eq!(level.expected_value, 5.0);
    }
}
