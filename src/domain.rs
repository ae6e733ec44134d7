//! Core entities of the water-distribution digital twin (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Junction,
    Pipe,
    Tank,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Junction => "junction",
            ItemKind::Pipe => "pipe",
            ItemKind::Tank => "tank",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Pressure,
    Flow,
    Level,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Pressure => "pressure",
            SensorKind::Flow => "flow",
            SensorKind::Level => "level",
        }
    }
}

/// A water-distribution network under management. Carries `baseline_computed_at`
/// so operations can distinguish "not yet baselined" from "baselined".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: Uuid,
    pub name: String,
    pub inp_path: String,
    pub baseline_computed_at: Option<DateTime<Utc>>,
}

/// One physical element of a network (junction, pipe, or tank).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkItem {
    pub network_id: Uuid,
    pub item_id: String,
    pub kind: ItemKind,
}

/// Immutable per-location baseline value, computed once when the baseline
/// registry solves the network's initial hydraulic state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub network_id: Uuid,
    pub location_id: String,
    pub sensor_kind: SensorKind,
    pub value: f64,
}

/// A simulated SCADA telemetry sample produced by the [`crate::services::simulator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScadaReading {
    pub network_id: Uuid,
    pub sensor_id: String,
    pub sensor_kind: SensorKind,
    pub location_id: String,
    pub value: f64,
    /// When the reading was nominally taken — in the past relative to
    /// generation time, per the configured delay distribution.
    pub timestamp: DateTime<Utc>,
}

/// One generation cycle's bookkeeping, written once per [`crate::services::simulator`] tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationLog {
    pub network_id: Uuid,
    pub generation_start: DateTime<Utc>,
    pub junctions_selected: usize,
    pub pipes_selected: usize,
    pub tanks_selected: usize,
    pub readings_generated: usize,
}

/// Hydraulic-engine-predicted value for a location/sensor pair at a given
/// monitoring cycle, persisted for trend/accuracy analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedValue {
    pub network_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub location_id: String,
    pub sensor_kind: SensorKind,
    pub expected_value: f64,
    pub eps_hour: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Classifies severity by how far the deviation ratio sits past the
    /// threshold: `[1, 1.5)` medium, `[1.5, 2.0)` high, `>= 2.0` critical.
    pub fn classify(deviation_percent: f64, threshold_percent: f64) -> Severity {
        let ratio = deviation_percent / threshold_percent;
        if ratio >= 2.0 {
            Severity::Critical
        } else if ratio >= 1.5 {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

/// A detected deviation between an actual SCADA reading and the hydraulic
/// engine's expected value for the same location/sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub network_id: Uuid,
    /// Detection time (loop start), not the reading's own timestamp.
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub sensor_kind: SensorKind,
    pub location_id: String,
    pub actual_value: f64,
    pub expected_value: f64,
    pub deviation_percent: f64,
    pub threshold_percent: f64,
    pub severity: Severity,
}

/// Filter/pagination parameters for `Store::query_anomalies` (§6).
#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    pub severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl AnomalyFilter {
    /// Clamps `limit` to the documented `<= 1000` ceiling, defaulting to 100
    /// when unset (`limit == 0`).
    pub fn normalized(mut self) -> Self {
        self.limit = if self.limit == 0 { 100 } else { self.limit.min(1000) };
        self
    }
}

/// A page of results plus the total count matching the filter, so callers
/// can compute whether further pages exist without a second round-trip.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// Deterministic sensor ID for a given kind/location pair: `"<KIND>_<location_id>"`.
pub fn sensor_id(kind: SensorKind, location_id: &str) -> String {
    format!("{}_{location_id}", kind.as_str().to_uppercase())
}

/// Percentage deviation of `actual` from `expected`, with the original's
/// near-zero-expected fallback to an absolute difference to avoid dividing
/// by (near) zero.
pub fn deviation_percent(actual: f64, expected: f64) -> f64 {
    if expected.abs() > 0.0001 {
        (actual - expected).abs() / expected.abs() * 100.0
    } else {
        (actual - expected).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_thresholds_match_ratio_bands() {
        assert_eq!(Severity::classify(10.0, 10.0), Severity::Medium);
        assert_eq!(Severity::classify(14.9, 10.0), Severity::Medium);
        assert_eq!(Severity::classify(15.0, 10.0), Severity::High);
        assert_eq!(Severity::classify(19.9, 10.0), Severity::High);
        assert_eq!(Severity::classify(20.0, 10.0), Severity::Critical);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn deviation_percent_uses_absolute_fallback_near_zero() {
        assert_eq!(deviation_percent(0.5, 0.0), 0.5);
        assert!((deviation_percent(110.0, 100.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sensor_id_is_deterministic() {
        assert_eq!(sensor_id(SensorKind::Pressure, "J-12"), "PRESSURE_J-12");
        assert_eq!(sensor_id(SensorKind::Level, "T-1"), "LEVEL_T-1");
    }

    #[test]
    fn anomaly_filter_normalizes_limit() {
        let f = AnomalyFilter::default().normalized();
        assert_eq!(f.limit, 100);

        let f = AnomalyFilter {
            limit: 5000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(f.limit, 1000);
    }
}
