// THEORY:
// The `crowd_metrics` module is the frame-level half of the engine. It never looks at
// a single person; it looks at the per-frame counters the detector wrote (how many
// people, how many distancing violations, whether a restricted zone was entered,
// whether abnormal activity was flagged) and rolls the whole recording up into a few
// numbers and a list of time intervals.
//
// Key architectural principles:
// 1.  **Total Over Its Input**: An empty frame stream is "no data", not a failure. Every
//     statistic has a zero value, and the aggregate reports `total_frames: 0`.
// 2.  **Strict Adjacency**: Flagged frames form one period only when their indices
//     differ by exactly one. A single unflagged frame between two flagged ones splits
//     them. The scanner runs in stream order and never reorders.
// 3.  **One Scanner, Two Flags**: Abnormal activity and restricted entry are both
//     boolean per-frame flags, so both are reduced by the same period scanner.
// 4.  **Format Is Not Decision**: The one-sentence summaries are a projection of the
//     numbers already computed. They add no thresholds of their own.

use crate::config::RecordingMetadata;
use crate::core_modules::stats;
use crate::error::AnalyticsResult;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the per-frame crowd export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrowdFrameRecord {
    pub frame_index: u64,
    pub human_count: u32,
    pub violation_count: u32,
    pub restricted_entry: bool,
    pub abnormal_activity: bool,
}

/// A maximal run of consecutive flagged frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlaggedPeriod {
    pub start_frame: u64,
    pub end_frame: u64,
    /// `end_frame - start_frame + 1`.
    pub duration: u64,
}

pub type AbnormalPeriod = FlaggedPeriod;

impl FlaggedPeriod {
    fn single(frame: u64) -> Self {
        Self {
            start_frame: frame,
            end_frame: frame,
            duration: 1,
        }
    }

    /// Wall-clock bounds of the period, when the recording has a start time.
    pub fn wall_clock(
        &self,
        metadata: &RecordingMetadata,
    ) -> AnalyticsResult<Option<(NaiveDateTime, NaiveDateTime)>> {
        let start = metadata.frame_timestamp(self.start_frame)?;
        let end = metadata.frame_timestamp(self.end_frame)?;
        Ok(start.zip(end))
    }
}

/// Merges flagged frame indices, in the order given, into maximal periods.
pub fn contiguous_periods<I>(flagged_frames: I) -> Vec<FlaggedPeriod>
where
    I: IntoIterator<Item = u64>,
{
    let mut periods = Vec::new();
    let mut current: Option<FlaggedPeriod> = None;

    for frame in flagged_frames {
        current = Some(match current {
            Some(mut period) if period.end_frame.checked_add(1) == Some(frame) => {
                period.end_frame = frame;
                period.duration += 1;
                period
            }
            Some(period) => {
                periods.push(period);
                FlaggedPeriod::single(frame)
            }
            None => FlaggedPeriod::single(frame),
        });
    }
    periods.extend(current);
    periods
}

/// Wall-clock rendering of a period for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodTimes {
    pub start_frame: u64,
    pub start_time: String,
    pub end_time: String,
}

fn period_times(
    periods: &[FlaggedPeriod],
    metadata: &RecordingMetadata,
) -> AnalyticsResult<Vec<PeriodTimes>> {
    let mut times = Vec::with_capacity(periods.len());
    for period in periods {
        if let Some((start, end)) = period.wall_clock(metadata)? {
            times.push(PeriodTimes {
                start_frame: period.start_frame,
                start_time: start.format("%Y-%m-%d %H:%M:%S").to_string(),
                end_time: end.format("%Y-%m-%d %H:%M:%S").to_string(),
            });
        }
    }
    Ok(times)
}

fn rate(flagged: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { flagged as f64 / total as f64 }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DensityStats {
    pub total_frames: usize,
    pub avg_crowd_size: f64,
    pub max_crowd_size: u32,
    pub min_crowd_size: u32,
    /// Sample standard deviation of the per-frame head count.
    pub std_crowd_size: f64,
    /// Head count → number of frames with that count.
    pub density_distribution: BTreeMap<u32, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViolationStats {
    pub total_violations: u64,
    /// Fraction of frames with at least one violation.
    pub violation_rate: f64,
    pub avg_violations_per_frame: f64,
    pub max_violations_per_frame: u32,
    /// Pearson correlation between head count and violations; zero without variance.
    pub crowd_size_correlation: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AbnormalActivityStats {
    pub abnormal_frames: usize,
    pub abnormal_rate: f64,
    pub total_frames_analyzed: usize,
    pub abnormal_periods: Vec<AbnormalPeriod>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub period_times: Vec<PeriodTimes>,
}

impl AbnormalActivityStats {
    /// Adds wall-clock bounds to every period. A recording without a start time adds
    /// nothing.
    pub fn with_wall_clock(mut self, metadata: &RecordingMetadata) -> AnalyticsResult<Self> {
        self.period_times = period_times(&self.abnormal_periods, metadata)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestrictedEntryStats {
    pub restricted_frames: usize,
    pub restricted_rate: f64,
    pub restricted_periods: Vec<FlaggedPeriod>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub period_times: Vec<PeriodTimes>,
}

impl RestrictedEntryStats {
    pub fn with_wall_clock(mut self, metadata: &RecordingMetadata) -> AnalyticsResult<Self> {
        self.period_times = period_times(&self.restricted_periods, metadata)?;
        Ok(self)
    }
}

/// Every frame-level statistic of one recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrowdMetrics {
    pub crowd_density: DensityStats,
    pub social_distancing: ViolationStats,
    pub abnormal_activity: AbnormalActivityStats,
    pub restricted_entry: RestrictedEntryStats,
}

impl CrowdMetrics {
    pub fn total_frames(&self) -> usize {
        self.crowd_density.total_frames
    }

    pub fn is_empty(&self) -> bool {
        self.total_frames() == 0
    }
}

/// Reduces a frame stream to `CrowdMetrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrowdMetricsAggregator;

impl CrowdMetricsAggregator {
    pub fn aggregate(&self, frames: &[CrowdFrameRecord]) -> CrowdMetrics {
        CrowdMetrics {
            crowd_density: self.density(frames),
            social_distancing: self.violations(frames),
            abnormal_activity: self.abnormal_activity(frames),
            restricted_entry: self.restricted_entry(frames),
        }
    }

    pub fn density(&self, frames: &[CrowdFrameRecord]) -> DensityStats {
        if frames.is_empty() {
            return DensityStats::default();
        }
        let counts: Vec<f64> = frames.iter().map(|f| f.human_count as f64).collect();
        let mut density_distribution = BTreeMap::new();
        for frame in frames {
            *density_distribution.entry(frame.human_count).or_insert(0) += 1;
        }

        DensityStats {
            total_frames: frames.len(),
            avg_crowd_size: stats::mean(&counts),
            max_crowd_size: frames.iter().map(|f| f.human_count).max().unwrap_or(0),
            min_crowd_size: frames.iter().map(|f| f.human_count).min().unwrap_or(0),
            std_crowd_size: stats::sample_std_dev(&counts),
            density_distribution,
        }
    }

    pub fn violations(&self, frames: &[CrowdFrameRecord]) -> ViolationStats {
        if frames.is_empty() {
            return ViolationStats::default();
        }
        let counts: Vec<f64> = frames.iter().map(|f| f.human_count as f64).collect();
        let violations: Vec<f64> = frames.iter().map(|f| f.violation_count as f64).collect();
        let violating = frames.iter().filter(|f| f.violation_count > 0).count();

        ViolationStats {
            total_violations: frames.iter().map(|f| f.violation_count as u64).sum(),
            violation_rate: rate(violating, frames.len()),
            avg_violations_per_frame: stats::mean(&violations),
            max_violations_per_frame: frames.iter().map(|f| f.violation_count).max().unwrap_or(0),
            crowd_size_correlation: stats::pearson(&counts, &violations),
        }
    }

    pub fn abnormal_activity(&self, frames: &[CrowdFrameRecord]) -> AbnormalActivityStats {
        let flagged = frames.iter().filter(|f| f.abnormal_activity).count();
        AbnormalActivityStats {
            abnormal_frames: flagged,
            abnormal_rate: rate(flagged, frames.len()),
            total_frames_analyzed: frames.len(),
            abnormal_periods: contiguous_periods(
                frames.iter().filter(|f| f.abnormal_activity).map(|f| f.frame_index),
            ),
            period_times: Vec::new(),
        }
    }

    pub fn restricted_entry(&self, frames: &[CrowdFrameRecord]) -> RestrictedEntryStats {
        let flagged = frames.iter().filter(|f| f.restricted_entry).count();
        RestrictedEntryStats {
            restricted_frames: flagged,
            restricted_rate: rate(flagged, frames.len()),
            restricted_periods: contiguous_periods(
                frames.iter().filter(|f| f.restricted_entry).map(|f| f.frame_index),
            ),
            period_times: Vec::new(),
        }
    }
}

/// One human-readable sentence per analysis that had data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsightSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crowd_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_summary: Option<String>,
}

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

impl InsightSummary {
    /// `tracked_individuals` is the number of usable tracks, when movement data exists.
    pub fn from_metrics(metrics: &CrowdMetrics, tracked_individuals: Option<usize>) -> Self {
        let has_frames = !metrics.is_empty();
        Self {
            crowd_summary: has_frames.then(|| {
                format!(
                    "Average crowd size: {:.1}, Peak: {}",
                    metrics.crowd_density.avg_crowd_size, metrics.crowd_density.max_crowd_size
                )
            }),
            safety_summary: has_frames.then(|| {
                format!(
                    "Social distancing violation rate: {}",
                    percent(metrics.social_distancing.violation_rate)
                )
            }),
            activity_summary: tracked_individuals
                .filter(|&count| count > 0)
                .map(|count| format!("Total unique individuals tracked: {count}")),
            security_summary: has_frames.then(|| {
                format!(
                    "Abnormal activity detected in {} of frames",
                    percent(metrics.abnormal_activity.abnormal_rate)
                )
            }),
        }
    }
}
