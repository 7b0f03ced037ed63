// THEORY:
// The `config` module is where wall-clock and frame-size policy is turned into the
// sample counts and pixel distances the core components actually work with. The core
// never sees frames per second or seconds; it sees "12 samples" and "54 pixels".
//
// One canonical derivation is used everywhere:
// - `time_step = data_record_frame_interval / video_fps` seconds per recorded sample.
// - `samples_for(seconds) = max(1, ceil(seconds / time_step))`.
// - every distance threshold is `frame_width * fraction`.
//
// Validation lives here too. A zero frame rate or a negative fraction is a caller
// mistake that would quietly produce nonsense thresholds, so it fails fast with an
// `InvalidParameter` error instead.

use crate::core_modules::clustering::ClusteringConfig;
use crate::core_modules::heatmap::HeatmapConfig;
use crate::error::{AnalyticsError, AnalyticsResult};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Format of `START_TIME` in the recorder's metadata file.
pub const START_TIME_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

/// Height-to-width ratio assumed when only the processed width is known (16:9).
const DEFAULT_ASPECT_RATIO: f64 = 0.5625;

/// Slack when converting seconds to samples, so exact multiples are not rounded up
/// by floating point noise.
const SAMPLE_EPSILON: f64 = 1e-9;

/// Recording metadata written next to the frame and movement exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    /// Frame rate of the source video.
    #[serde(rename = "VID_FPS", alias = "vid_fps")]
    pub video_fps: f64,
    /// One data record was written every this many video frames.
    #[serde(rename = "DATA_RECORD_FRAME", alias = "data_record_frame")]
    pub data_record_frame_interval: u32,
    /// Width in pixels of the frames the tracker worked on.
    #[serde(rename = "PROCESSED_FRAME_SIZE", alias = "frame_width")]
    pub frame_width: u32,
    #[serde(
        rename = "PROCESSED_FRAME_HEIGHT",
        alias = "frame_height",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_height: Option<u32>,
    #[serde(
        rename = "START_TIME",
        alias = "start_time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<String>,
    #[serde(rename = "IS_CAM", alias = "is_cam", default)]
    pub is_camera: bool,
}

impl RecordingMetadata {
    pub fn new(video_fps: f64, data_record_frame_interval: u32, frame_width: u32) -> Self {
        Self {
            video_fps,
            data_record_frame_interval,
            frame_width,
            frame_height: None,
            start_time: None,
            is_camera: false,
        }
    }

    /// Checks every field the thresholds depend on.
    pub fn validate(&self) -> AnalyticsResult<()> {
        if !self.video_fps.is_finite() || self.video_fps <= 0.0 {
            return Err(AnalyticsError::invalid_parameter(
                "video_fps",
                format!("must be a positive number, got {}", self.video_fps),
            ));
        }
        if self.data_record_frame_interval == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "data_record_frame_interval",
                "must be at least one frame",
            ));
        }
        if self.frame_width == 0 {
            return Err(AnalyticsError::invalid_parameter("frame_width", "must be non-zero"));
        }
        if self.frame_height == Some(0) {
            return Err(AnalyticsError::invalid_parameter("frame_height", "must be non-zero"));
        }
        self.start_time()?;
        Ok(())
    }

    /// Frame height, derived as 16:9 when the recorder did not store one.
    pub fn frame_height(&self) -> u32 {
        self.frame_height
            .unwrap_or_else(|| ((self.frame_width as f64) * DEFAULT_ASPECT_RATIO).round() as u32)
    }

    /// Seconds between two consecutive data records.
    pub fn time_step_seconds(&self) -> AnalyticsResult<f64> {
        self.validate()?;
        Ok(self.data_record_frame_interval as f64 / self.video_fps)
    }

    /// Parsed recording start, if the recorder stored one.
    pub fn start_time(&self) -> AnalyticsResult<Option<NaiveDateTime>> {
        self.start_time
            .as_deref()
            .map(|raw| {
                NaiveDateTime::parse_from_str(raw.trim(), START_TIME_FORMAT)
                    .map_err(|e| AnalyticsError::InvalidTimestamp(format!("{raw}: {e}")))
            })
            .transpose()
    }

    /// Wall-clock time of the record at `frame_index`. The first record is stamped
    /// one time step after the start, as the recorder writes it at the end of its
    /// sampling interval.
    pub fn frame_timestamp(&self, frame_index: u64) -> AnalyticsResult<Option<NaiveDateTime>> {
        let step = self.time_step_seconds()?;
        let Some(start) = self.start_time()? else {
            return Ok(None);
        };
        let offset_ms = ((frame_index as f64 + 1.0) * step * 1000.0).round() as i64;
        Ok(Some(start + Duration::milliseconds(offset_ms)))
    }
}

/// Converts a wall-clock duration into a number of recorded samples.
pub fn samples_for(seconds: f64, time_step_seconds: f64) -> usize {
    let samples = (seconds / time_step_seconds - SAMPLE_EPSILON).ceil();
    if samples.is_finite() && samples > 1.0 {
        samples as usize
    } else {
        1
    }
}

/// How long and how close an object must stay to count as dwelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    pub seconds: f64,
    pub distance_fraction: f64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            seconds: 2.0,
            distance_fraction: 0.05,
        }
    }
}

/// Resting-interval trimming applied before energy estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub enabled: bool,
    /// Look-back window, matching the tracker's maximum track age.
    pub seconds: f64,
    pub distance_fraction: f64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seconds: 3.0,
            distance_fraction: 0.01,
        }
    }
}

/// Minimum path lengths per consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackPolicy {
    pub metadata_columns: usize,
    pub heatmap_min_points: usize,
    pub energy_min_points: usize,
}

impl Default for TrackPolicy {
    fn default() -> Self {
        Self {
            metadata_columns: crate::core_modules::track::DEFAULT_METADATA_COLUMNS,
            heatmap_min_points: 3,
            energy_min_points: 6,
        }
    }
}

/// Every tunable of the analytics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub dwell: DwellConfig,
    pub rest: RestConfig,
    pub heatmap: HeatmapConfig,
    pub clustering: ClusteringConfig,
    pub tracks: TrackPolicy,
    pub energy_histogram_bins: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            dwell: DwellConfig::default(),
            rest: RestConfig::default(),
            heatmap: HeatmapConfig::default(),
            clustering: ClusteringConfig::default(),
            tracks: TrackPolicy::default(),
            energy_histogram_bins: 50,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl AnalyticsConfig {
    /// Defaults overridden by `CROWD_*` environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            dwell: DwellConfig {
                seconds: env_or("CROWD_DWELL_SECONDS", base.dwell.seconds),
                distance_fraction: env_or(
                    "CROWD_DWELL_DISTANCE_FRACTION",
                    base.dwell.distance_fraction,
                ),
            },
            rest: RestConfig {
                enabled: env_or("CROWD_TRIM_RESTING", base.rest.enabled),
                seconds: env_or("CROWD_REST_SECONDS", base.rest.seconds),
                distance_fraction: env_or(
                    "CROWD_REST_DISTANCE_FRACTION",
                    base.rest.distance_fraction,
                ),
            },
            clustering: ClusteringConfig {
                radius: env_or("CROWD_CLUSTER_RADIUS", base.clustering.radius),
                min_samples: env_or("CROWD_CLUSTER_MIN_SAMPLES", base.clustering.min_samples),
                ..base.clustering
            },
            energy_histogram_bins: env_or("CROWD_ENERGY_BINS", base.energy_histogram_bins),
            ..base
        }
    }

    /// Rejects out-of-domain values.
    pub fn validate(&self) -> AnalyticsResult<()> {
        positive("dwell.seconds", self.dwell.seconds)?;
        positive("dwell.distance_fraction", self.dwell.distance_fraction)?;
        positive("rest.seconds", self.rest.seconds)?;
        positive("rest.distance_fraction", self.rest.distance_fraction)?;
        self.heatmap.validate()?;
        self.clustering.validate()?;
        if self.energy_histogram_bins == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "energy_histogram_bins",
                "must be at least one bin",
            ));
        }
        Ok(())
    }

    /// Resolves the configured policy against a recording.
    pub fn derive(&self, metadata: &RecordingMetadata) -> AnalyticsResult<DerivedThresholds> {
        self.validate()?;
        let time_step_seconds = metadata.time_step_seconds()?;
        let width = metadata.frame_width as f64;
        Ok(DerivedThresholds {
            time_step_seconds,
            frame_width: metadata.frame_width,
            frame_height: metadata.frame_height(),
            dwell_distance: width * self.dwell.distance_fraction,
            dwell_samples: samples_for(self.dwell.seconds, time_step_seconds),
            rest_distance: width * self.rest.distance_fraction,
            rest_samples: samples_for(self.rest.seconds, time_step_seconds),
        })
    }
}

fn positive(name: &'static str, value: f64) -> AnalyticsResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AnalyticsError::invalid_parameter(
            name,
            format!("must be a positive number, got {value}"),
        ))
    }
}

/// The concrete thresholds handed to the core components for one recording. Only
/// `AnalyticsConfig::derive` builds one, from validated metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedThresholds {
    time_step_seconds: f64,
    frame_width: u32,
    frame_height: u32,
    dwell_distance: f64,
    dwell_samples: usize,
    rest_distance: f64,
    rest_samples: usize,
}

impl DerivedThresholds {
    /// Seconds between two consecutive records.
    pub fn time_step_seconds(&self) -> f64 {
        self.time_step_seconds
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    /// Maximum drift, in pixels, that still counts as dwelling.
    pub fn dwell_distance(&self) -> f64 {
        self.dwell_distance
    }

    /// Minimum dwell length in samples.
    pub fn dwell_samples(&self) -> usize {
        self.dwell_samples
    }

    /// Displacement, in pixels, below which an object is considered resting.
    pub fn rest_distance(&self) -> f64 {
        self.rest_distance
    }

    /// Look-back window in samples for rest detection.
    pub fn rest_samples(&self) -> usize {
        self.rest_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> RecordingMetadata {
        RecordingMetadata::new(30.0, 5, 1080)
    }

    #[test]
    fn derives_canonical_thresholds() {
        let thresholds = AnalyticsConfig::default().derive(&metadata()).unwrap();
        assert!((thresholds.time_step_seconds() - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(thresholds.dwell_samples(), 12);
        assert_eq!(thresholds.rest_samples(), 18);
        assert!((thresholds.dwell_distance() - 54.0).abs() < 1e-9);
        assert!((thresholds.rest_distance() - 10.8).abs() < 1e-9);
        assert_eq!(thresholds.frame_height(), 608);
    }

    #[test]
    fn zero_or_negative_frame_rate_fails_fast() {
        for fps in [0.0, -25.0, f64::NAN] {
            let meta = RecordingMetadata::new(fps, 5, 1080);
            let err = AnalyticsConfig::default().derive(&meta).unwrap_err();
            assert!(matches!(
                err,
                AnalyticsError::InvalidParameter { name: "video_fps", .. }
            ));
        }
    }

    #[test]
    fn zero_record_interval_is_rejected() {
        let meta = RecordingMetadata::new(30.0, 0, 1080);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn samples_round_up_but_never_below_one() {
        assert_eq!(samples_for(2.0, 1.0 / 6.0), 12);
        assert_eq!(samples_for(2.1, 1.0 / 6.0), 13);
        assert_eq!(samples_for(0.01, 1.0), 1);
    }

    #[test]
    fn parses_start_time_and_stamps_frames() {
        let mut meta = metadata();
        meta.start_time = Some("05/11/2020, 00:00:00".to_string());
        let first = meta.frame_timestamp(0).unwrap().unwrap();
        let start = meta.start_time().unwrap().unwrap();
        assert_eq!((first - start).num_milliseconds(), 167);

        meta.start_time = Some("yesterday".to_string());
        assert!(matches!(meta.validate(), Err(AnalyticsError::InvalidTimestamp(_))));
    }

    #[test]
    fn metadata_reads_recorder_json() {
        let json = r#"{"VID_FPS": 25, "DATA_RECORD_FRAME": 5, "PROCESSED_FRAME_SIZE": 1280,
                       "START_TIME": "05/11/2020, 09:30:00", "IS_CAM": false}"#;
        let meta: RecordingMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.frame_width, 1280);
        assert_eq!(meta.frame_height(), 720);
        assert!((meta.time_step_seconds().unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn metadata_accepts_lowercase_keys() {
        let json =
            r#"{"vid_fps": 30, "data_record_frame": 3, "frame_width": 640, "frame_height": 480}"#;
        let meta: RecordingMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.frame_height(), 480);
        assert!((meta.time_step_seconds().unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn config_rejects_negative_fractions() {
        let mut config = AnalyticsConfig::default();
        config.dwell.distance_fraction = -0.1;
        assert!(config.validate().is_err());
    }
}
