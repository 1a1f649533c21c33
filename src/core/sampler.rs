//! Round Distribution Sampler
//!
//! Piecewise mixtures over uniform sub-ranges. Each table row is a band:
//! a selector draw below `upper` picks the band, then a second draw is
//! spread over `[base, base + span)`.
//!
//! The band boundaries and ranges are part of the game's payout contract.

use super::rng::RandomSource;

/// One band of a piecewise distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    /// Cumulative selector probability at which this band ends.
    pub upper: f64,
    /// Lowest value in the band.
    pub base: f64,
    /// Width of the band.
    pub span: f64,
}

impl Band {
    const fn new(upper: f64, base: f64, span: f64) -> Self {
        Self { upper, base, span }
    }
}

/// Smallest crash point ever produced.
pub const MIN_CRASH_POINT: f64 = 1.0;

/// Shortest flight in seconds.
pub const MIN_FLIGHT_SECONDS: f64 = 2.0;

/// Longest flight in seconds.
pub const MAX_FLIGHT_SECONDS: f64 = 50.0;

/// Crash point bands: 70% in [1,2), 20% in [2,5), 8% in [5,20), 2% in [20,100).
pub const CRASH_POINT_BANDS: [Band; 4] = [
    Band::new(0.70, 1.0, 1.0),
    Band::new(0.90, 2.0, 3.0),
    Band::new(0.98, 5.0, 15.0),
    Band::new(1.00, 20.0, 80.0),
];

/// Flight duration bands: 60% in [2,10), 25% in [10,25), 10% in [25,40), 5% in [40,50).
pub const FLIGHT_DURATION_BANDS: [Band; 4] = [
    Band::new(0.60, 2.0, 8.0),
    Band::new(0.85, 10.0, 15.0),
    Band::new(0.95, 25.0, 15.0),
    Band::new(1.00, 40.0, 10.0),
];

/// Settlement multiplier bands: 1-4, 5-14, 15-29, 30-99.
pub const SETTLEMENT_BANDS: [Band; 4] = [
    Band::new(0.60, 1.0, 4.0),
    Band::new(0.85, 5.0, 10.0),
    Band::new(0.95, 15.0, 15.0),
    Band::new(1.00, 30.0, 70.0),
];

/// Pick the band for a selector draw. Draws past the last boundary fall into
/// the last band.
fn select(bands: &[Band], selector: f64) -> &Band {
    bands
        .iter()
        .find(|band| selector < band.upper)
        .unwrap_or(&bands[bands.len() - 1])
}

/// Draw a continuous value from a band table. Consumes two samples.
pub fn draw<R: RandomSource + ?Sized>(bands: &[Band], rng: &mut R) -> f64 {
    let band = select(bands, rng.next_unit());
    band.base + rng.next_unit() * band.span
}

/// Draw an integer value from a band table. Consumes two samples.
pub fn draw_whole<R: RandomSource + ?Sized>(bands: &[Band], rng: &mut R) -> u32 {
    let band = select(bands, rng.next_unit());
    (rng.next_unit() * band.span).floor() as u32 + band.base as u32
}

/// Sample the crash point for a round. Always `>= 1.0`.
pub fn sample_crash_point<R: RandomSource + ?Sized>(rng: &mut R) -> f64 {
    draw(&CRASH_POINT_BANDS, rng).max(MIN_CRASH_POINT)
}

/// Sample the flight duration for a round, in seconds, within `[2, 50]`.
pub fn sample_flight_duration<R: RandomSource + ?Sized>(rng: &mut R) -> f64 {
    draw(&FLIGHT_DURATION_BANDS, rng).clamp(MIN_FLIGHT_SECONDS, MAX_FLIGHT_SECONDS)
}

/// Sample the multiplier shown when a staked round settles as a loss.
pub fn sample_settlement_multiplier<R: RandomSource + ?Sized>(rng: &mut R) -> u32 {
    draw_whole(&SETTLEMENT_BANDS, rng)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::{DeterministicRng, SequenceSource};
    use proptest::prelude::*;

    const SAMPLES: usize = 100_000;
    const TOLERANCE: f64 = 0.01;

    fn fraction(values: &[f64], lo: f64, hi: f64) -> f64 {
        values.iter().filter(|v| **v >= lo && **v < hi).count() as f64 / values.len() as f64
    }

    #[test]
    fn test_crash_point_band_fractions() {
        let mut rng = DeterministicRng::new(2024);
        let points: Vec<f64> = (0..SAMPLES).map(|_| sample_crash_point(&mut rng)).collect();

        assert!(points.iter().all(|p| *p >= 1.0));
        assert!((fraction(&points, 1.0, 2.0) - 0.70).abs() < TOLERANCE);
        assert!((fraction(&points, 2.0, 5.0) - 0.20).abs() < TOLERANCE);
        assert!((fraction(&points, 5.0, 20.0) - 0.08).abs() < TOLERANCE);
        assert!((fraction(&points, 20.0, 100.0 + f64::EPSILON) - 0.02).abs() < TOLERANCE);
    }

    #[test]
    fn test_flight_duration_band_fractions() {
        let mut rng = DeterministicRng::new(77);
        let durations: Vec<f64> = (0..SAMPLES).map(|_| sample_flight_duration(&mut rng)).collect();

        assert!(durations.iter().all(|d| (2.0..=50.0).contains(d)));
        assert!((fraction(&durations, 2.0, 10.0) - 0.60).abs() < TOLERANCE);
        assert!((fraction(&durations, 10.0, 25.0) - 0.25).abs() < TOLERANCE);
        assert!((fraction(&durations, 25.0, 40.0) - 0.10).abs() < TOLERANCE);
        assert!((fraction(&durations, 40.0, 50.0 + f64::EPSILON) - 0.05).abs() < TOLERANCE);
    }

    #[test]
    fn test_settlement_multiplier_ranges() {
        let mut rng = DeterministicRng::new(5);
        for _ in 0..SAMPLES {
            let m = sample_settlement_multiplier(&mut rng);
            assert!((1..=99).contains(&m), "out of range: {m}");
        }
    }

    #[test]
    fn test_scripted_band_selection() {
        // selector 0.5 -> first band, value 0.25 of the way in
        let mut rng = SequenceSource::new(vec![0.5, 0.25]);
        assert_eq!(sample_crash_point(&mut rng), 1.25);

        // selector 0.95 -> third band: 5 + 0.5 * 15
        let mut rng = SequenceSource::new(vec![0.95, 0.5]);
        assert_eq!(sample_crash_point(&mut rng), 12.5);

        // selector 0.99 -> tail band: 20 + 0.5 * 80
        let mut rng = SequenceSource::new(vec![0.99, 0.5]);
        assert_eq!(sample_crash_point(&mut rng), 60.0);
    }

    #[test]
    fn test_band_boundaries_are_exclusive() {
        // exactly 0.70 belongs to the second band
        let mut rng = SequenceSource::new(vec![0.70, 0.0]);
        assert_eq!(sample_crash_point(&mut rng), 2.0);

        let mut rng = SequenceSource::new(vec![0.60, 0.0]);
        assert_eq!(sample_flight_duration(&mut rng), 10.0);

        let mut rng = SequenceSource::new(vec![0.85, 0.0]);
        assert_eq!(sample_settlement_multiplier(&mut rng), 15);
    }

    #[test]
    fn test_settlement_multiplier_scripted() {
        let mut rng = SequenceSource::new(vec![0.1, 0.99]);
        assert_eq!(sample_settlement_multiplier(&mut rng), 4);

        let mut rng = SequenceSource::new(vec![0.97, 0.0]);
        assert_eq!(sample_settlement_multiplier(&mut rng), 30);
    }

    proptest! {
        #[test]
        fn prop_crash_point_at_least_one(selector in 0.0f64..1.0, value in 0.0f64..1.0) {
            let mut rng = SequenceSource::new(vec![selector, value]);
            prop_assert!(sample_crash_point(&mut rng) >= 1.0);
        }

        #[test]
        fn prop_flight_duration_bounded(selector in 0.0f64..1.0, value in 0.0f64..1.0) {
            let mut rng = SequenceSource::new(vec![selector, value]);
            let d = sample_flight_duration(&mut rng);
            prop_assert!((MIN_FLIGHT_SECONDS..=MAX_FLIGHT_SECONDS).contains(&d));
        }
    }
}
