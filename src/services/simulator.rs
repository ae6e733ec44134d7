//! SCADA telemetry simulator (component C4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration as ChronoDuration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::diurnal::diurnal_multiplier;
use crate::domain::{sensor_id, GenerationLog, ItemKind, ScadaReading, SensorKind};
use crate::error::{CoreError, Result};
use crate::random::Random;
use crate::status::{ServiceState, SimCurrentCycle, SimStatus};
use crate::store::Store;
use crate::time::Clock;

/// Tunable parameters for the simulator, mirroring the original's defaults:
/// 5-minute generation cadence, ~10% mean data loss, a 0-10 minute
/// truncated-normal transmission delay, and per-sensor-kind noise bands.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub generation_interval: StdDuration,
    pub data_loss_proportion: f64,
    pub data_loss_variance: f64,
    pub delay_mean_minutes: f64,
    pub delay_std_dev_minutes: f64,
    pub delay_max_minutes: f64,
    pub pressure_noise_percent: f64,
    pub flow_noise_percent: f64,
    pub tank_level_noise_percent: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            generation_interval: StdDuration::from_secs(5 * 60),
            data_loss_proportion: 0.10,
            data_loss_variance: 0.05,
            delay_mean_minutes: 2.5,
            delay_std_dev_minutes: 2.0,
            delay_max_minutes: 10.0,
            pressure_noise_percent: 2.0,
            flow_noise_percent: 3.0,
            tank_level_noise_percent: 1.0,
        }
    }
}

impl SimConfig {
    fn validate(&self) -> Result<()> {
        let minutes = self.generation_interval.as_secs_f64() / 60.0;
        if !(0.1..=1440.0).contains(&minutes) {
            return Err(CoreError::InvalidConfig(
                "generation_interval_minutes must be in [0.1, 1440]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.data_loss_proportion) {
            return Err(CoreError::InvalidConfig(
                "data_loss_mean must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=0.5).contains(&self.data_loss_variance) {
            return Err(CoreError::InvalidConfig(
                "data_loss_variance must be in [0, 0.5]".into(),
            ));
        }
        if self.delay_mean_minutes >= self.delay_max_minutes {
            return Err(CoreError::InvalidConfig(
                "delay_mean_minutes must be less than delay_max_minutes".into(),
            ));
        }
        for (name, value) in [
            ("pressure_noise_percent", self.pressure_noise_percent),
            ("flow_noise_percent", self.flow_noise_percent),
            ("tank_level_noise_percent", self.tank_level_noise_percent),
        ] {
            if !(0.0..=50.0).contains(&value) {
                return Err(CoreError::InvalidConfig(format!("{name} must be in [0, 50]")));
            }
        }
        Ok(())
    }

    fn noise_percent(&self, kind: SensorKind) -> f64 {
        match kind {
            SensorKind::Pressure => self.pressure_noise_percent,
            SensorKind::Flow => self.flow_noise_percent,
            SensorKind::Level => self.tank_level_noise_percent,
        }
    }
}

struct NetworkItems {
    junctions: Vec<String>,
    pipes: Vec<String>,
    tanks: Vec<String>,
}

/// Generates synthetic SCADA readings for a network at a configured cadence,
/// simulating realistic data loss, transmission delay, and sensor noise
/// around the network's immutable baselines.
pub struct Simulator {
    network_id: Uuid,
    config: SimConfig,
    store: Arc<dyn Store>,
    random: Arc<dyn Random>,
    clock: Arc<dyn Clock>,
    status: Arc<AsyncMutex<SimStatus>>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Simulator {
    pub fn new(
        network_id: Uuid,
        config: SimConfig,
        store: Arc<dyn Store>,
        random: Arc<dyn Random>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            network_id,
            config,
            store,
            random,
            clock,
            status: Arc::new(AsyncMutex::new(SimStatus::new(network_id))),
            cancel: None,
            handle: None,
        }
    }

    pub async fn status(&self) -> SimStatus {
        self.status.lock().await.clone()
    }

    /// Loads network items and baselines, then spawns the generation loop.
    /// Fails with [`CoreError::AlreadyRunning`] if already started, or
    /// [`CoreError::BaselineMissing`] if the network has no baseline yet.
    pub async fn start(&mut self) -> Result<()> {
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

        let all_items = self.store.list_network_items(self.network_id).await?;
        let mut items = NetworkItems {
            junctions: Vec::new(),
            pipes: Vec::new(),
            tanks: Vec::new(),
        };
        for item in all_items {
            match item.kind {
                ItemKind::Junction => items.junctions.push(item.item_id),
                ItemKind::Pipe => items.pipes.push(item.item_id),
                ItemKind::Tank => items.tanks.push(item.item_id),
            }
        }
        if items.junctions.is_empty() && items.pipes.is_empty() && items.tanks.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "no network items found for network {}",
                self.network_id
            )));
        }

        let baselines = self.store.list_baselines(self.network_id).await?;
        let mut baseline_map = HashMap::new();
        for b in baselines {
            baseline_map.insert((b.location_id, b.sensor_kind), b.value);
        }
        if baseline_map.is_empty() {
            return Err(CoreError::BaselineMissing(self.network_id));
        }

        {
            let mut status = self.status.lock().await;
            status.state = ServiceState::Starting;
            status.error = None;
        }

        let cancel = CancellationToken::new();
        let cycle = CycleContext {
            network_id: self.network_id,
            config: self.config.clone(),
            store: self.store.clone(),
            random: self.random.clone(),
            clock: self.clock.clone(),
            status: self.status.clone(),
            items,
            baselines: baseline_map,
        };

        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cycle.config.generation_interval);
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
                                    tracing::warn!(error = %other, "simulator cycle failed, continuing");
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

    /// Cancels the background task and awaits its graceful termination.
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
    config: SimConfig,
    store: Arc<dyn Store>,
    random: Arc<dyn Random>,
    clock: Arc<dyn Clock>,
    status: Arc<AsyncMutex<SimStatus>>,
    items: NetworkItems,
    baselines: HashMap<(String, SensorKind), f64>,
}

impl CycleContext {
    async fn run_cycle(&self) -> Result<()> {
        let generation_start = self.clock.now();
        let current_hour = self.clock.fractional_hour_of_day();

        let selected_junctions = select_items(&*self.random, &self.items.junctions, &self.config);
        let selected_pipes = select_items(&*self.random, &self.items.pipes, &self.config);
        let selected_tanks = select_items(&*self.random, &self.items.tanks, &self.config);

        let mut readings = Vec::new();
        for (locations, kind) in [
            (&selected_junctions, SensorKind::Pressure),
            (&selected_pipes, SensorKind::Flow),
            (&selected_tanks, SensorKind::Level),
        ] {
            for location_id in locations {
                if let Some(value) = self.generate_reading(location_id, kind, current_hour) {
                    let delay_minutes = self.random.truncated_normal(
                        self.config.delay_mean_minutes,
                        self.config.delay_std_dev_minutes,
                        self.config.delay_max_minutes,
                    );
                    let timestamp =
                        generation_start - ChronoDuration::milliseconds((delay_minutes * 60_000.0) as i64);
                    readings.push(ScadaReading {
                        network_id: self.network_id,
                        sensor_id: sensor_id(kind, location_id),
                        sensor_kind: kind,
                        location_id: location_id.clone(),
                        value,
                        timestamp,
                    });
                }
            }
        }

        let log = GenerationLog {
            network_id: self.network_id,
            generation_start,
            junctions_selected: selected_junctions.len(),
            pipes_selected: selected_pipes.len(),
            tanks_selected: selected_tanks.len(),
            readings_generated: readings.len(),
        };
        self.store.insert_generation_cycle(&readings, &log).await?;

        let mut status = self.status.lock().await;
        status.current_cycle = SimCurrentCycle {
            junctions_selected: selected_junctions.len(),
            pipes_selected: selected_pipes.len(),
            tanks_selected: selected_tanks.len(),
            readings_generated: readings.len(),
        };
        status.error = None;

        Ok(())
    }

    fn generate_reading(&self, location_id: &str, kind: SensorKind, current_hour: f64) -> Option<f64> {
        let baseline = *self.baselines.get(&(location_id.to_string(), kind))?;
        let multiplier = diurnal_multiplier(current_hour);
        let noise_percent = self.config.noise_percent(kind);
        let noise = self.random.uniform(-noise_percent / 100.0, noise_percent / 100.0);
        Some(baseline * multiplier * (1.0 + noise))
    }
}

/// Selects the items kept this cycle (data-loss simulation). `data_loss_proportion`
/// is the mean proportion of items *lost*; the kept proportion is randomized
/// around `1 - data_loss_proportion` using a Gaussian with the configured
/// variance, clamped to `[0, 1]`, and at least one item is always kept.
fn select_items(random: &dyn Random, items: &[String], config: &SimConfig) -> Vec<String> {
    if items.is_empty() {
        return Vec::new();
    }
    let random_loss = random
        .gaussian(config.data_loss_proportion, config.data_loss_variance)
        .clamp(0.0, 1.0);
    let keep_proportion = 1.0 - random_loss;
    let select_count = ((items.len() as f64) * keep_proportion).floor().max(1.0) as usize;
    random.sample_without_replacement(items, select_count)
}
