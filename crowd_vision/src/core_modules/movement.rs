// THEORY:
// The `movement` module condenses each track into the handful of numbers the
// behavioural layer reasons about, and rolls those numbers up into population-level
// movement statistics.
//
// Key architectural principles:
// 1.  **One Vector per Usable Track**: A track needs at least two points to have a
//     path. Shorter tracks produce no vector and are simply absent from the output.
// 2.  **Sample Units**: Duration is a sample count and speed is pixels per sample.
//     Both are only meaningful relative to other tracks from the same recording,
//     which is all the clusterer needs after standardization.
// 3.  **Summary Owns the Clustering Result**: The population statistics and the
//     cluster summary are reported together, because both describe the same set of
//     feature vectors.

use crate::core_modules::clustering::{ClusterSummary, PatternClusterer};
use crate::core_modules::stats::{self, Summary};
use crate::core_modules::track::Track;
use serde::Serialize;

/// Number of features per track vector.
pub const FEATURE_DIMENSIONS: usize = 3;

/// Behavioural features of one track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackFeatureVector {
    pub track_id: u64,
    /// Number of samples in the track.
    pub duration: usize,
    /// Sum of the Euclidean step lengths, in pixels.
    pub total_distance: f64,
    /// `total_distance / duration`.
    pub avg_speed: f64,
}

impl TrackFeatureVector {
    /// `None` for tracks with fewer than two points.
    pub fn from_track(track: &Track) -> Option<Self> {
        if !track.has_at_least(2) {
            return None;
        }
        let duration = track.len();
        let total_distance = track.path_distance();
        Some(Self {
            track_id: track.id(),
            duration,
            total_distance,
            avg_speed: total_distance / duration as f64,
        })
    }

    pub fn as_array(&self) -> [f64; FEATURE_DIMENSIONS] {
        [self.duration as f64, self.total_distance, self.avg_speed]
    }
}

/// Feature vectors for every usable track, in input order.
pub fn feature_vectors<'a, I>(tracks: I) -> Vec<TrackFeatureVector>
where
    I: IntoIterator<Item = &'a Track>,
{
    tracks
        .into_iter()
        .filter_map(TrackFeatureVector::from_track)
        .collect()
}

/// Population statistics over the track feature vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MovementPatterns {
    pub total_tracks: usize,
    pub avg_track_duration: f64,
    pub avg_total_distance: f64,
    pub avg_speed: f64,
    pub track_duration_distribution: Summary,
    #[serde(flatten)]
    pub clusters: ClusterSummary,
}

impl MovementPatterns {
    /// Summarizes `features` and clusters them. No features yields the zero value.
    pub fn analyze(features: &[TrackFeatureVector], clusterer: &PatternClusterer) -> Self {
        if features.is_empty() {
            return Self::default();
        }
        let durations: Vec<f64> = features.iter().map(|f| f.duration as f64).collect();
        let distances: Vec<f64> = features.iter().map(|f| f.total_distance).collect();
        let speeds: Vec<f64> = features.iter().map(|f| f.avg_speed).collect();

        Self {
            total_tracks: features.len(),
            avg_track_duration: stats::mean(&durations),
            avg_total_distance: stats::mean(&distances),
            avg_speed: stats::mean(&speeds),
            track_duration_distribution: Summary::of(&durations),
            clusters: clusterer.cluster(features),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::track::Point;

    fn track(id: u64, points: &[(i32, i32)]) -> Track {
        Track::new(id, points.iter().map(|&(x, y)| Point::new(x, y)).collect()).unwrap()
    }

    #[test]
    fn single_point_track_has_no_vector() {
        assert!(TrackFeatureVector::from_track(&track(1, &[(4, 4)])).is_none());
    }

    #[test]
    fn features_from_path() {
        let walker = track(7, &[(0, 0), (3, 4), (3, 10)]);
        let feature = TrackFeatureVector::from_track(&walker).unwrap();
        assert_eq!(feature.track_id, 7);
        assert_eq!(feature.duration, 3);
        assert!((feature.total_distance - 11.0).abs() < 1e-12);
        assert!((feature.avg_speed - 11.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn feature_vectors_skip_short_tracks() {
        let tracks = [
            track(1, &[(0, 0)]),
            track(2, &[(0, 0), (1, 0)]),
            track(3, &[(5, 5), (5, 6), (5, 7)]),
        ];
        let ids: Vec<u64> = feature_vectors(&tracks).iter().map(|f| f.track_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn patterns_report_means_and_clusters() {
        let tracks: Vec<Track> = (0..3)
            .map(|i| track(i, &[(0, 0), (10, 0)]))
            .chain((3..5).map(|i| track(i, &[(0, 0), (0, 10), (0, 20), (0, 30)])))
            .collect();
        let features = feature_vectors(&tracks);
        let patterns = MovementPatterns::analyze(&features, &PatternClusterer::default());

        assert_eq!(patterns.total_tracks, 5);
        assert!((patterns.avg_track_duration - 14.0 / 5.0).abs() < 1e-12);
        assert!((patterns.avg_total_distance - 90.0 / 5.0).abs() < 1e-12);
        assert_eq!(patterns.track_duration_distribution.count, 5);
        assert_eq!(patterns.track_duration_distribution.max, 4.0);
        // Three identical short walks form a cluster; the two long walks are too few.
        assert_eq!(patterns.clusters.movement_clusters, 1);
        assert_eq!(patterns.clusters.noise_tracks, 2);
    }

    #[test]
    fn no_features_is_zero() {
        assert_eq!(
            MovementPatterns::analyze(&[], &PatternClusterer::default()),
            MovementPatterns::default()
        );
    }
}
