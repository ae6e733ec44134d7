//! Deterministic time-of-day demand/flow multiplier (component C1).

/// Anchor points of the piecewise-linear diurnal pattern: `(hour, multiplier)`.
///
/// Night bottoms out around 0.7-0.8, morning ramps to a 1.4 peak by 8am,
/// eases off across midday, dips to 0.6 in early afternoon, climbs back to
/// an evening peak of 1.3 by 7pm, then decays back toward night levels.
const ANCHORS: &[(f64, f64)] = &[
    (0.0, 0.8),
    (6.0, 0.7),
    (8.0, 1.4),
    (10.0, 1.4),
    (12.0, 1.0),
    (14.0, 0.6),
    (18.0, 0.9),
    (20.0, 1.3),
    (22.0, 1.0),
    (24.0, 0.8),
];

/// Returns the diurnal multiplier for a given hour of day, normalized to
/// `[0, 24)` and linearly interpolated between the nearest anchor points.
pub fn diurnal_multiplier(hour: f64) -> f64 {
    let hour = hour.rem_euclid(24.0);

    for window in ANCHORS.windows(2) {
        let (h0, v0) = window[0];
        let (h1, v1) = window[1];
        if hour >= h0 && hour < h1 {
            let frac = (hour - h0) / (h1 - h0);
            return v0 + frac * (v1 - v0);
        }
    }

    // hour == 24.0 after rem_euclid never happens, but guard anyway.
    ANCHORS.last().expect("anchors non-empty").1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn matches_documented_anchor_values() {
        approx(diurnal_multiplier(0.0), 0.8);
        approx(diurnal_multiplier(6.0), 0.7);
        approx(diurnal_multiplier(8.0), 1.4);
        approx(diurnal_multiplier(9.0), 1.4);
        approx(diurnal_multiplier(12.0), 1.0);
        approx(diurnal_multiplier(14.0), 0.6);
        approx(diurnal_multiplier(19.0), 0.9 + 0.5 * 0.4); // halfway through evening rise
        approx(diurnal_multiplier(23.0), 1.0 - (1.0 / 2.0) * 0.2);
    }

    #[test]
    fn interpolates_morning_rise() {
        // hour=7 is halfway between (6, 0.7) and (8, 1.4)
        approx(diurnal_multiplier(7.0), 0.7 + 0.5 * 0.7);
    }

    #[test]
    fn wraps_negative_and_overflowing_hours() {
        approx(diurnal_multiplier(-1.0), diurnal_multiplier(23.0));
        approx(diurnal_multiplier(25.0), diurnal_multiplier(1.0));
    }

    #[test]
    fn stays_within_documented_bounds() {
        let mut hour = 0.0;
        while hour < 24.0 {
            let m = diurnal_multiplier(hour);
            assert!((0.6..=1.4).contains(&m), "multiplier {m} at hour {hour} out of bounds");
            hour += 0.25;
        }
    }
}
