//! Multiplier Curve
//!
//! Maps elapsed flight time to the payout multiplier and to a normalized
//! flight-path position. This is the single source of truth for the
//! multiplier shown at any instant; the ledger pays out from it.

use std::f64::consts::PI;

use serde::{Serialize, Deserialize};

/// Elapsed seconds per e-fold of the multiplier.
pub const GROWTH_SECONDS: f64 = 4.0;

/// Path rises by this many percentage points over a flight.
const CLIMB: f64 = 30.0;

/// Amplitude of the path's wobble.
const WOBBLE: f64 = 8.0;

/// Vertical bounds of the path.
const Y_MIN: f64 = 15.0;
const Y_MAX: f64 = 85.0;

/// Nose-down trim applied to the heading.
const ANGLE_TRIM: f64 = 8.0;

/// One point on the curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlightSample {
    /// Payout multiplier, `>= 1.0`.
    pub multiplier: f64,
    /// Horizontal position, `0..=100`.
    pub x: f64,
    /// Vertical position, `15..=85`.
    pub y: f64,
    /// Heading in degrees.
    pub angle: f64,
    /// Fraction of the flight completed, `0..=1`.
    pub progress: f64,
}

/// Sample the curve at `elapsed` seconds into a flight of `flight_duration` seconds.
///
/// Elapsed time is clamped to the flight duration so the final position
/// holds once the flight is over.
pub fn sample(elapsed: f64, flight_duration: f64) -> FlightSample {
    let clamped = elapsed.min(flight_duration).max(0.0);
    let multiplier = (clamped / GROWTH_SECONDS).exp();

    let progress = if flight_duration > 0.0 {
        (clamped / flight_duration).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let x = (progress * 100.0).clamp(0.0, 100.0);
    let y = (50.0 - progress * CLIMB + (progress * 2.0 * PI).sin() * WOBBLE).clamp(Y_MIN, Y_MAX);
    let angle = (progress * CLIMB).atan2(1.0).to_degrees() - ANGLE_TRIM;

    FlightSample {
        multiplier,
        x,
        y,
        angle,
        progress,
    }
}

/// Multiplier only, for callers that do not need the path.
#[inline]
pub fn multiplier_at(elapsed: f64, flight_duration: f64) -> f64 {
    sample(elapsed, flight_duration).multiplier
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_at_one() {
        for d in [2.0, 7.5, 50.0] {
            let s = sample(0.0, d);
            assert_eq!(s.multiplier, 1.0);
            assert_eq!(s.x, 0.0);
            assert_eq!(s.y, 50.0);
            assert_eq!(s.angle, -8.0);
        }
    }

    #[test]
    fn test_four_seconds_is_e() {
        let m = multiplier_at(4.0, 10.0);
        assert!((m - std::f64::consts::E).abs() < 1e-12);
    }

    #[test]
    fn test_clamped_after_flight_end() {
        let at_end = sample(5.0, 5.0);
        let past_end = sample(30.0, 5.0);
        assert_eq!(at_end, past_end);
        assert_eq!(past_end.x, 100.0);
        assert_eq!(past_end.progress, 1.0);
    }

    #[test]
    fn test_zero_duration() {
        let s = sample(3.0, 0.0);
        assert_eq!(s.multiplier, 1.0);
        assert_eq!(s.progress, 0.0);
    }

    #[test]
    fn test_midflight_position() {
        // progress 0.5: sin(pi) ~ 0, so y ~ 50 - 15
        let s = sample(5.0, 10.0);
        assert_eq!(s.x, 50.0);
        assert!((s.y - 35.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_multiplier_non_decreasing(
            d in 2.0f64..50.0,
            a in 0.0f64..60.0,
            b in 0.0f64..60.0,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(multiplier_at(lo, d) <= multiplier_at(hi, d));
        }

        #[test]
        fn prop_position_in_bounds(d in 2.0f64..50.0, t in 0.0f64..60.0) {
            let s = sample(t, d);
            prop_assert!(s.multiplier >= 1.0);
            prop_assert!((0.0..=100.0).contains(&s.x));
            prop_assert!((15.0..=85.0).contains(&s.y));
        }
    }
}
