// THEORY:
// The `stationary` module finds where people stop. It walks a single track once,
// front to back, and carries a tiny state machine: an anchor point and the length of
// the run of samples that have stayed within `dwell_distance` of that anchor.
//
// - A sample close to the anchor extends the run.
// - A sample that has wandered off closes the run. If the run lasted at least
//   `dwell_samples`, it is emitted as a `StationarySegment`. Either way the wandering
//   sample becomes the new anchor with a run length of one.
// - At the end of the track, a run that is still long enough is emitted too.
//
// The anchor is the first point of the run, not a centroid, so a slow drift is
// measured against where the object first stopped. There is no look-back and no
// smoothing; the output depends on sample order and nothing else.

use crate::core_modules::track::{Point, Track};
use crate::error::{AnalyticsError, AnalyticsResult};
use serde::{Deserialize, Serialize};

/// A dwell: where an object stopped and for how many samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationarySegment {
    /// First point of the dwell run.
    pub anchor: Point,
    /// Number of samples the object stayed within the dwell radius.
    pub duration: usize,
}

/// Scans tracks for dwell runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationaryDetector {
    dwell_distance: f64,
    dwell_samples: usize,
}

impl StationaryDetector {
    /// `dwell_distance` is exclusive: a sample exactly that far away has moved on.
    /// Fails on a non-positive distance or a zero minimum length.
    pub fn new(dwell_distance: f64, dwell_samples: usize) -> AnalyticsResult<Self> {
        if !(dwell_distance.is_finite() && dwell_distance > 0.0) {
            return Err(AnalyticsError::invalid_parameter(
                "dwell_distance",
                format!("must be positive, got {dwell_distance}"),
            ));
        }
        if dwell_samples == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "dwell_samples",
                "must be at least one sample",
            ));
        }
        Ok(Self {
            dwell_distance,
            dwell_samples,
        })
    }

    pub fn dwell_distance(&self) -> f64 {
        self.dwell_distance
    }

    pub fn dwell_samples(&self) -> usize {
        self.dwell_samples
    }

    /// Emits the dwell segments of one track in the order they occur.
    pub fn detect(&self, track: &Track) -> Vec<StationarySegment> {
        self.detect_points(track.points())
    }

    /// Same as `detect`, over a bare point sequence.
    pub fn detect_points(&self, points: &[Point]) -> Vec<StationarySegment> {
        let mut segments = Vec::new();
        let Some((&first, rest)) = points.split_first() else {
            return segments;
        };
        if rest.is_empty() {
            return segments;
        }

        let mut anchor = first;
        let mut run_length = 1usize;

        for &point in rest {
            if point.distance(&anchor) < self.dwell_distance {
                run_length += 1;
            } else {
                if run_length >= self.dwell_samples {
                    segments.push(StationarySegment {
                        anchor,
                        duration: run_length,
                    });
                }
                anchor = point;
                run_length = 1;
            }
        }

        if run_length >= self.dwell_samples {
            segments.push(StationarySegment {
                anchor,
                duration: run_length,
            });
        }

        segments
    }

    /// Dwell segments of every track, flattened in track order.
    pub fn detect_all<'a, I>(&self, tracks: I) -> Vec<StationarySegment>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        tracks.into_iter().flat_map(|track| self.detect(track)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(points: &[(i32, i32)]) -> Track {
        Track::new(1, points.iter().map(|&(x, y)| Point::new(x, y)).collect()).unwrap()
    }

    #[test]
    fn motionless_track_is_one_segment() {
        let detector = StationaryDetector::new(5.0, 4).unwrap();
        let still = track(&[(50, 50); 10]);
        assert_eq!(
            detector.detect(&still),
            vec![StationarySegment {
                anchor: Point::new(50, 50),
                duration: 10
            }]
        );
    }

    #[test]
    fn single_point_track_has_no_segments() {
        let detector = StationaryDetector::new(5.0, 1).unwrap();
        assert!(detector.detect(&track(&[(1, 1)])).is_empty());
    }

    #[test]
    fn emits_runs_that_reach_minimum_only() {
        let detector = StationaryDetector::new(5.0, 3).unwrap();
        // Dwell of 3 at origin, a lone step, then a dwell of 2 that is too short.
        let path = track(&[(0, 0), (1, 0), (0, 2), (40, 40), (80, 80), (81, 81)]);
        assert_eq!(
            detector.detect(&path),
            vec![StationarySegment {
                anchor: Point::new(0, 0),
                duration: 3
            }]
        );
    }

    #[test]
    fn anchor_is_first_point_not_centroid() {
        let detector = StationaryDetector::new(5.0, 2).unwrap();
        // Drifts away from the anchor one pixel at a time until it crosses the radius.
        let path = track(&[(0, 0), (2, 0), (4, 0), (6, 0), (7, 0)]);
        assert_eq!(
            detector.detect(&path),
            vec![
                StationarySegment {
                    anchor: Point::new(0, 0),
                    duration: 3
                },
                StationarySegment {
                    anchor: Point::new(6, 0),
                    duration: 2
                },
            ]
        );
    }

    #[test]
    fn degenerate_thresholds_are_rejected() {
        for distance in [f64::NAN, 0.0, -3.0, f64::INFINITY] {
            assert!(matches!(
                StationaryDetector::new(distance, 2),
                Err(AnalyticsError::InvalidParameter { name: "dwell_distance", .. })
            ));
        }
        assert!(matches!(
            StationaryDetector::new(5.0, 0),
            Err(AnalyticsError::InvalidParameter { name: "dwell_samples", .. })
        ));
    }

    #[test]
    fn detect_all_flattens_in_track_order() {
        let detector = StationaryDetector::new(5.0, 2).unwrap();
        let first = track(&[(10, 10), (10, 11)]);
        let walker = track(&[(0, 0), (20, 0), (40, 0)]);
        let second = track(&[(90, 90), (91, 90), (90, 91)]);
        let anchors: Vec<Point> = detector
            .detect_all([&first, &walker, &second])
            .iter()
            .map(|segment| segment.anchor)
            .collect();
        assert_eq!(anchors, vec![Point::new(10, 10), Point::new(90, 90)]);
    }

    #[test]
    fn distance_threshold_is_exclusive() {
        let detector = StationaryDetector::new(5.0, 2).unwrap();
        let path = track(&[(0, 0), (3, 4), (6, 8)]);
        assert!(detector.detect(&path).is_empty());
    }
}
