//! Typed in-memory status records (§9: replaces the dynamic dict-shaped
//! status of the original with fixed-field structs).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimCurrentCycle {
    pub junctions_selected: usize,
    pub pipes_selected: usize,
    pub tanks_selected: usize,
    pub readings_generated: usize,
}

impl Default for SimCurrentCycle {
    fn default() -> Self {
        Self {
            junctions_selected: 0,
            pipes_selected: 0,
            tanks_selected: 0,
            readings_generated: 0,
        }
    }
}

/// Status of a [`crate::services::simulator::Simulator`] instance.
#[derive(Debug, Clone, Serialize)]
pub struct SimStatus {
    pub state: ServiceState,
    pub network_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub current_cycle: SimCurrentCycle,
    pub error: Option<String>,
}

impl SimStatus {
    pub fn new(network_id: Uuid) -> Self {
        Self {
            state: ServiceState::Stopped,
            network_id,
            started_at: None,
            current_cycle: SimCurrentCycle::default(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EpsSynchronization {
    pub synced: bool,
    pub current_eps_hour: f64,
    pub real_time_hour: f64,
}

impl Default for EpsSynchronization {
    fn default() -> Self {
        Self {
            synced: false,
            current_eps_hour: 0.0,
            real_time_hour: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LastCheckStats {
    pub readings_processed: usize,
    pub anomalies_found: usize,
    pub comparison_time_ms: f64,
}

impl Default for LastCheckStats {
    fn default() -> Self {
        Self {
            readings_processed: 0,
            anomalies_found: 0,
            comparison_time_ms: 0.0,
        }
    }
}

/// Status of a [`crate::services::monitor::Monitor`] instance.
#[derive(Debug, Clone, Serialize)]
pub struct MonStatus {
    pub state: ServiceState,
    pub network_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_processed_timestamp: Option<DateTime<Utc>>,
    pub total_anomalies_detected: u64,
    pub eps_synchronization: EpsSynchronization,
    pub last_check_stats: LastCheckStats,
    pub error: Option<String>,
}

impl MonStatus {
    pub fn new(network_id: Uuid) -> Self {
        Self {
            state: ServiceState::Stopped,
            network_id,
            started_at: None,
            last_check_time: None,
            last_processed_timestamp: None,
            total_anomalies_detected: 0,
            eps_synchronization: EpsSynchronization::default(),
            last_check_stats: LastCheckStats::default(),
            error: None,
        }
    }
}
