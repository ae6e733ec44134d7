//! Process-scoped registry (§9): replaces the original's module-level
//! mutable singleton with one explicit, constructed object. Singleton
//! discipline ("exactly one `Simulator` and one `Monitor` running per
//! process", §5) is enforced here by holding at most one instance of each
//! behind its own lock, rather than relying on language-level statics.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Anomaly, AnomalyFilter, Page};
use crate::error::{CoreError, Result};
use crate::hydraulic::HydraulicEngine;
use crate::random::Random;
use crate::services::aggregator::{self, DashboardMetrics};
use crate::services::baseline_registry::BaselineRegistry;
use crate::services::monitor::{MonConfig, Monitor};
use crate::services::simulator::{SimConfig, Simulator};
use crate::status::{MonStatus, SimStatus};
use crate::store::Store;
use crate::time::Clock;

/// The one constructed object that owns the shared handles (`Store`,
/// `Clock`, `Random`) and the at-most-one running `Simulator`/`Monitor` for
/// this process. A REST/CLI collaborator holds one `Registry` and routes
/// every `start`/`stop`/`status`/`query` call through it.
pub struct Registry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn Random>,
    simulator: tokio::sync::Mutex<Option<Simulator>>,
    monitor: tokio::sync::Mutex<Option<Monitor>>,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, random: Arc<dyn Random>) -> Self {
        Self {
            store,
            clock,
            random,
            simulator: tokio::sync::Mutex::new(None),
            monitor: tokio::sync::Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn baseline_registry(&self) -> BaselineRegistry {
        BaselineRegistry::new(self.store.clone(), self.clock.clone())
    }

    /// Starts the process-wide `Simulator` for `network_id`. Fails with
    /// [`CoreError::AlreadyRunning`] if one is already running (for this or
    /// any other network — a single process instance monitors one network
    /// at a time, per spec §1 Non-goals).
    pub async fn start_simulator(&self, network_id: Uuid, config: SimConfig) -> Result<()> {
        let mut slot = self.simulator.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.status().await.state != crate::status::ServiceState::Stopped {
                return Err(CoreError::AlreadyRunning);
            }
        }
        let mut simulator = Simulator::new(
            network_id,
            config,
            self.store.clone(),
            self.random.clone(),
            self.clock.clone(),
        );
        simulator.start().await?;
        *slot = Some(simulator);
        Ok(())
    }

    pub async fn stop_simulator(&self) -> Result<()> {
        let mut slot = self.simulator.lock().await;
        match slot.as_mut() {
            Some(simulator) => simulator.stop().await,
            None => Err(CoreError::NotRunning),
        }
    }

    pub async fn simulator_status(&self) -> Result<SimStatus> {
        let slot = self.simulator.lock().await;
        match slot.as_ref() {
            Some(simulator) => Ok(simulator.status().await),
            None => Err(CoreError::NotRunning),
        }
    }

    /// Starts the process-wide `Monitor` for `network_id`, loading a fresh
    /// engine via `load_engine`. The engine is owned exclusively by the
    /// `Monitor` task from this point on (§3 ownership & lifecycle).
    pub async fn start_monitor(
        &self,
        network_id: Uuid,
        config: MonConfig,
        engine: Box<dyn HydraulicEngine>,
    ) -> Result<()> {
        let mut slot = self.monitor.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.status().await.state != crate::status::ServiceState::Stopped {
                return Err(CoreError::AlreadyRunning);
            }
        }
        let mut monitor = Monitor::new(network_id, config, self.store.clone(), self.clock.clone());
        monitor.start(engine).await?;
        *slot = Some(monitor);
        Ok(())
    }

    pub async fn stop_monitor(&self) -> Result<()> {
        let mut slot = self.monitor.lock().await;
        match slot.as_mut() {
            Some(monitor) => monitor.stop().await,
            None => Err(CoreError::NotRunning),
        }
    }

    pub async fn monitor_status(&self) -> Result<MonStatus> {
        let slot = self.monitor.lock().await;
        match slot.as_ref() {
            Some(monitor) => Ok(monitor.status().await),
            None => Err(CoreError::NotRunning),
        }
    }

    pub async fn dashboard_metrics(&self, network_id: Uuid, window_minutes: f64) -> Result<DashboardMetrics> {
        aggregator::dashboard_metrics(&self.store, &self.clock, network_id, window_minutes).await
    }

    pub async fn query_anomalies(&self, network_id: Uuid, filter: AnomalyFilter) -> Result<Page<Anomaly>> {
        self.store.query_anomalies(network_id, filter).await
    }
}
