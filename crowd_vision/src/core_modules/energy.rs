// THEORY:
// The `energy` module scores how vigorously people move. For every pair of
// consecutive samples it computes a speed (pixels per second) and squares it into a
// kinetic-style energy, `0.5 * speed^2`. The unit is meaningless on purpose; the
// score is only ever compared against other scores from the same recording.
//
// Key architectural principles:
// 1.  **Two Views of the Same Samples**: Downstream wants both the flat population of
//     step energies (for a distribution) and one aggregate per track (for behavioural
//     features). Both are derived from the same per-step computation.
// 2.  **Optional Rest Trimming**: A person standing still for a minute contributes a
//     long tail of near-zero samples that drowns the distribution. When trimming is
//     enabled, a sample that is within `rest_distance` of where the object was
//     `rest_window` samples earlier is considered resting, and resting samples split
//     the track into moving segments. Steps are only measured inside a segment, never
//     across a rest.
// 3.  **No Energy from Nothing**: A track (or segment) with fewer than two points has
//     no step, so it yields no samples and no aggregate.

use crate::core_modules::stats;
use crate::core_modules::track::{Point, Track};
use crate::error::{AnalyticsError, AnalyticsResult};
use serde::Serialize;

/// Resting-interval detection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestTrimming {
    /// Displacement, in pixels, at or below which the object is resting.
    pub distance: f64,
    /// How many samples back the displacement is measured against.
    pub window: usize,
}

/// Aggregate energy of one track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackEnergy {
    pub track_id: u64,
    pub sample_count: usize,
    pub total_energy: f64,
    pub mean_energy: f64,
    pub peak_energy: f64,
}

/// Computes step energies from tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyEstimator {
    time_step_seconds: f64,
    rest: Option<RestTrimming>,
}

impl EnergyEstimator {
    /// Fails when the time step cannot produce a finite speed.
    pub fn new(time_step_seconds: f64) -> AnalyticsResult<Self> {
        if !(time_step_seconds.is_finite() && time_step_seconds > 0.0) {
            return Err(AnalyticsError::invalid_parameter(
                "time_step_seconds",
                format!("must be positive, got {time_step_seconds}"),
            ));
        }
        Ok(Self {
            time_step_seconds,
            rest: None,
        })
    }

    /// Enables rest trimming. A zero window disables it again. Fails on a negative
    /// or non-finite rest distance.
    pub fn with_rest_trimming(mut self, distance: f64, window: usize) -> AnalyticsResult<Self> {
        if !(distance.is_finite() && distance >= 0.0) {
            return Err(AnalyticsError::invalid_parameter(
                "rest_distance",
                format!("must be a non-negative number, got {distance}"),
            ));
        }
        self.rest = (window > 0).then_some(RestTrimming { distance, window });
        Ok(self)
    }

    pub fn rest_trimming(&self) -> Option<RestTrimming> {
        self.rest
    }

    /// Energy of a single step.
    pub fn step_energy(&self, from: &Point, to: &Point) -> f64 {
        let speed = from.distance(to) / self.time_step_seconds;
        0.5 * speed * speed
    }

    /// One energy per consecutive pair of `points`.
    pub fn step_energies(&self, points: &[Point]) -> Vec<f64> {
        points
            .windows(2)
            .map(|pair| self.step_energy(&pair[0], &pair[1]))
            .collect()
    }

    /// The parts of the track energy is measured over: the whole track, or its moving
    /// segments when trimming is enabled.
    pub fn moving_segments<'a>(&self, track: &'a Track) -> Vec<&'a [Point]> {
        match self.rest {
            Some(rest) => split_at_rest(track.points(), rest.distance, rest.window),
            None if track.len() >= 2 => vec![track.points()],
            None => Vec::new(),
        }
    }

    /// Step energies of one track, in order.
    pub fn track_samples(&self, track: &Track) -> Vec<f64> {
        self.moving_segments(track)
            .into_iter()
            .flat_map(|segment| self.step_energies(segment))
            .collect()
    }

    /// Aggregate energy of one track, or `None` when it contributes no step.
    pub fn track_energy(&self, track: &Track) -> Option<TrackEnergy> {
        let samples = self.track_samples(track);
        if samples.is_empty() {
            return None;
        }
        let total_energy: f64 = samples.iter().sum();
        Some(TrackEnergy {
            track_id: track.id(),
            sample_count: samples.len(),
            total_energy,
            mean_energy: total_energy / samples.len() as f64,
            peak_energy: stats::max(&samples),
        })
    }

    /// Every step energy of every track, flattened in track order.
    pub fn flatten<'a, I>(&self, tracks: I) -> Vec<f64>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        tracks
            .into_iter()
            .flat_map(|track| self.track_samples(track))
            .collect()
    }

    /// One aggregate per track that contributed at least one step.
    pub fn per_track<'a, I>(&self, tracks: I) -> Vec<TrackEnergy>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        tracks
            .into_iter()
            .filter_map(|track| self.track_energy(track))
            .collect()
    }
}

/// Splits `points` into maximal runs of moving samples.
///
/// Sample `i` (for `i >= window`) is resting when it lies within `rest_distance` of
/// sample `i - window`. Resting samples are dropped and end the current run. Runs with
/// fewer than two points are discarded. A zero window never rests.
pub fn split_at_rest(points: &[Point], rest_distance: f64, window: usize) -> Vec<&[Point]> {
    let mut segments = Vec::new();
    let mut start = 0;

    for i in window.max(1)..points.len() {
        let resting = window > 0 && points[i].distance(&points[i - window]) <= rest_distance;
        if resting {
            if i - start >= 2 {
                segments.push(&points[start..i]);
            }
            start = i + 1;
        }
    }
    if points.len().saturating_sub(start) >= 2 {
        segments.push(&points[start..]);
    }
    segments
}

/// A single histogram bin over energy values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Distributional summary of the flattened step energies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyDistribution {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// `mean ^ 1.05`: the level above which a step is considered unusually energetic.
    pub acceptable_level: f64,
    pub histogram: Vec<HistogramBin>,
}

impl EnergyDistribution {
    pub fn from_samples(samples: &[f64], bins: usize) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mean = stats::mean(samples);
        Self {
            count: samples.len(),
            mean,
            std: stats::sample_std_dev(samples),
            min: stats::min(samples),
            max: stats::max(samples),
            acceptable_level: mean.powf(1.05),
            histogram: histogram(samples, bins),
        }
    }
}

/// Equal-width histogram spanning `[min, max]`. The last bin is closed on the right.
pub fn histogram(samples: &[f64], bins: usize) -> Vec<HistogramBin> {
    if samples.is_empty() || bins == 0 {
        return Vec::new();
    }
    let lo = stats::min(samples);
    let hi = stats::max(samples);
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0usize; bins];
    for &value in samples {
        let index = if width > 0.0 {
            (((value - lo) / width) as usize).min(bins - 1)
        } else {
            0
        };
        counts[index] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: lo + width * i as f64,
            upper: if i + 1 == bins { hi } else { lo + width * (i + 1) as f64 },
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: u64, points: &[(i32, i32)]) -> Track {
        Track::new(id, points.iter().map(|&(x, y)| Point::new(x, y)).collect()).unwrap()
    }

    #[test]
    fn energy_is_half_speed_squared() {
        let estimator = EnergyEstimator::new(0.5).unwrap();
        // 5 px in 0.5 s = 10 px/s, energy 50.
        let energy = estimator.step_energy(&Point::new(0, 0), &Point::new(3, 4));
        assert!((energy - 50.0).abs() < 1e-9);
    }

    #[test]
    fn short_tracks_yield_nothing() {
        let estimator = EnergyEstimator::new(1.0).unwrap();
        let single = track(1, &[(3, 3)]);
        assert!(estimator.track_samples(&single).is_empty());
        assert!(estimator.track_energy(&single).is_none());
        assert!(estimator.per_track([&single]).is_empty());
    }

    #[test]
    fn per_track_aggregates_sum_samples() {
        let estimator = EnergyEstimator::new(1.0).unwrap();
        let walker = track(9, &[(0, 0), (2, 0), (2, 4)]);
        let energy = estimator.track_energy(&walker).unwrap();
        assert_eq!(energy.track_id, 9);
        assert_eq!(energy.sample_count, 2);
        assert!((energy.total_energy - 10.0).abs() < 1e-9);
        assert!((energy.mean_energy - 5.0).abs() < 1e-9);
        assert!((energy.peak_energy - 8.0).abs() < 1e-9);
    }

    #[test]
    fn flatten_concatenates_tracks() {
        let estimator = EnergyEstimator::new(1.0).unwrap();
        let a = track(1, &[(0, 0), (1, 0)]);
        let b = track(2, &[(0, 0), (0, 2), (0, 4)]);
        assert_eq!(estimator.flatten([&a, &b]), vec![0.5, 2.0, 2.0]);
    }

    #[test]
    fn rest_trimming_removes_resting_samples() {
        // Moves, stands still for four samples, then moves again.
        let path = [(0, 0), (10, 0), (20, 0), (20, 0), (20, 0), (20, 0), (30, 0), (40, 0)];
        let points: Vec<Point> = path
            .iter()
            .map(|&(x, y)| Point::new(x, y))
            .collect();
        let segments = split_at_rest(&points, 1.0, 1);
        assert_eq!(segments, vec![&points[0..3], &points[6..8]]);

        let estimator = EnergyEstimator::new(1.0)
            .unwrap()
            .with_rest_trimming(1.0, 1)
            .unwrap();
        let walker = Track::new(3, points.clone()).unwrap();
        assert_eq!(estimator.track_samples(&walker), vec![50.0, 50.0, 50.0]);
    }

    #[test]
    fn rest_window_looks_back() {
        let points: Vec<Point> = (0..6).map(|i| Point::new(i, 0)).collect();
        // Two samples back is 2 px: resting under a 3 px threshold, moving under 1 px.
        // The first `window` samples have nothing to look back at and always move.
        assert_eq!(split_at_rest(&points, 3.0, 2), vec![&points[0..2]]);
        assert_eq!(split_at_rest(&points, 1.0, 2), vec![&points[..]]);
    }

    #[test]
    fn rejects_degenerate_rest_distance() {
        let estimator = EnergyEstimator::new(1.0).unwrap();
        for distance in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                estimator.with_rest_trimming(distance, 3),
                Err(AnalyticsError::InvalidParameter { name: "rest_distance", .. })
            ));
        }
        let disabled = estimator.with_rest_trimming(2.0, 0).unwrap();
        assert!(disabled.rest_trimming().is_none());
    }

    #[test]
    fn rejects_non_positive_time_step() {
        assert!(EnergyEstimator::new(0.0).is_err());
        assert!(EnergyEstimator::new(-1.0).is_err());
    }

    #[test]
    fn distribution_and_histogram() {
        let samples = [0.0, 1.0, 2.0, 3.0, 4.0];
        let distribution = EnergyDistribution::from_samples(&samples, 2);
        assert_eq!(distribution.count, 5);
        assert!((distribution.mean - 2.0).abs() < 1e-12);
        assert!((distribution.acceptable_level - 2.0f64.powf(1.05)).abs() < 1e-12);
        let counts: Vec<usize> = distribution.histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 3]);
        assert_eq!(EnergyDistribution::from_samples(&[], 10), EnergyDistribution::default());
    }
}
