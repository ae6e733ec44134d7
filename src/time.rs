use chrono::{DateTime, Timelike, Utc};

/// Source of wall-clock time for the services in this crate.
///
/// Abstracted behind a trait so tests can drive deterministic timestamps
/// instead of depending on the real clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Hour of day (0-23) used to index [`crate::diurnal::diurnal_multiplier`].
    ///
    /// The monitoring loop also treats this as "the EPS hour" when asking the
    /// hydraulic engine to advance (see `services::monitor`) — the engine is
    /// always re-solved for the current wall-clock hour rather than stepped
    /// through simulation time one interval at a time.
    fn hour_of_day(&self) -> u32 {
        self.now().hour()
    }

    /// Fractional hour of day (e.g. `14.5` for 14:30), the precision
    /// [`crate::diurnal::diurnal_multiplier`] actually interpolates over.
    fn fractional_hour_of_day(&self) -> f64 {
        let now = self.now();
        now.hour() as f64 + now.minute() as f64 / 60.0 + now.second() as f64 / 3600.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A clock that starts at a fixed instant and can be advanced manually.
    pub struct FixedClock {
        micros: AtomicI64,
    }

    impl FixedClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                micros: AtomicI64::new(start.timestamp_micros()),
            }
        }

        pub fn advance(&self, delta: chrono::Duration) {
            self.micros
                .fetch_add(delta.num_microseconds().unwrap_or(0), Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst))
                .expect("valid fixed timestamp")
        }
    }
}
