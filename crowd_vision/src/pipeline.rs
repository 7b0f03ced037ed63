// THEORY:
// The `pipeline` module is the top-level API of the analytics engine. It wires the
// core components together in the order the data flows through them, and hands back
// one `AnalysisReport` per recording.
//
// Key architectural principles:
// 1.  **Validate Once, Up Front**: Building a pipeline resolves the configuration
//     against the recording metadata. Every parameter-domain mistake surfaces here,
//     before a single track is touched; after construction nothing can fail on data.
// 2.  **Two Independent Branches**: Tracks flow through ingestion, dwell detection and
//     the heatmap on one side, and energy and feature extraction on the other, ending
//     in clustering. Frame records flow through the crowd metrics aggregator. The two
//     branches only meet in the final `Insights`.
// 3.  **The Track Is the Unit of Work**: Everything that happens to a single track is
//     bundled into `TrackAnalyzer::analyze`, which touches no shared state. The
//     synchronous pipeline runs it in a loop; `parallel_pipeline` runs it on a worker
//     pool. Both reassemble through the same `assemble` step, so their results are
//     identical.
// 4.  **Progress via Observer**: Each stage reports to an `AnalysisObserver`; the core
//     itself never logs.

use crate::config::{AnalyticsConfig, DerivedThresholds, RecordingMetadata, TrackPolicy};
use crate::core_modules::clustering::PatternClusterer;
use crate::core_modules::crowd_metrics::{CrowdFrameRecord, CrowdMetrics, CrowdMetricsAggregator};
use crate::core_modules::energy::{EnergyDistribution, EnergyEstimator, TrackEnergy};
use crate::core_modules::heatmap::{HeatmapAccumulator, HeatmapGrid};
use crate::core_modules::movement::{MovementPatterns, TrackFeatureVector};
use crate::core_modules::stationary::{StationaryDetector, StationarySegment};
use crate::core_modules::track::{Track, TrackIngestor, TrackRow};
use crate::error::AnalyticsResult;
use crate::observer::{AnalysisObserver, AnalysisStage, NoopObserver};
use serde::Serialize;
use std::sync::Arc;

// Re-export key data structures for the public API.
pub use crate::core_modules::clustering::{ClusterAssignment, ClusterLabel, ClusterSummary};
pub use crate::core_modules::crowd_metrics::{
    AbnormalActivityStats, DensityStats, InsightSummary, RestrictedEntryStats, ViolationStats,
};

/// Everything derived from one track in isolation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAnalysis {
    pub track_id: u64,
    /// Dwell segments, empty when the track is too short for the heatmap.
    pub segments: Vec<StationarySegment>,
    /// Step energies, empty when the track is too short for energy estimation.
    pub energy_samples: Vec<f64>,
    pub energy: Option<TrackEnergy>,
    pub features: Option<TrackFeatureVector>,
}

/// The per-track unit of work. Cheap to copy into worker tasks.
#[derive(Debug, Clone, Copy)]
pub struct TrackAnalyzer {
    detector: StationaryDetector,
    estimator: EnergyEstimator,
    heatmap_min_points: usize,
    energy_min_points: usize,
}

impl TrackAnalyzer {
    pub fn new(
        detector: StationaryDetector,
        estimator: EnergyEstimator,
        policy: &TrackPolicy,
    ) -> Self {
        Self {
            detector,
            estimator,
            heatmap_min_points: policy.heatmap_min_points,
            energy_min_points: policy.energy_min_points,
        }
    }

    pub fn analyze(&self, track: &Track) -> TrackAnalysis {
        let segments = if track.has_at_least(self.heatmap_min_points) {
            self.detector.detect(track)
        } else {
            Vec::new()
        };
        let (energy_samples, energy) = if track.has_at_least(self.energy_min_points) {
            let samples = self.estimator.track_samples(track);
            (samples, self.estimator.track_energy(track))
        } else {
            (Vec::new(), None)
        };

        TrackAnalysis {
            track_id: track.id(),
            segments,
            energy_samples,
            energy,
            features: TrackFeatureVector::from_track(track),
        }
    }

    pub fn analyze_all(&self, tracks: &[Track]) -> Vec<TrackAnalysis> {
        tracks.iter().map(|track| self.analyze(track)).collect()
    }

    pub fn heatmap_min_points(&self) -> usize {
        self.heatmap_min_points
    }

    pub fn energy_min_points(&self) -> usize {
        self.energy_min_points
    }
}

/// Movement-side results of one recording.
#[derive(Debug, Clone)]
pub struct MovementAnalysis {
    pub heatmap: HeatmapGrid,
    pub stationary_segments: Vec<StationarySegment>,
    /// Every step energy, flattened in track order.
    pub energy_samples: Vec<f64>,
    pub energy_distribution: EnergyDistribution,
    pub track_energies: Vec<TrackEnergy>,
    pub features: Vec<TrackFeatureVector>,
    pub patterns: MovementPatterns,
}

/// The JSON-serializable roll-up of a recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub crowd_density: DensityStats,
    pub social_distancing: ViolationStats,
    pub movement_patterns: MovementPatterns,
    pub abnormal_activity: AbnormalActivityStats,
    pub restricted_entry: RestrictedEntryStats,
    pub energy: EnergyDistribution,
    pub thresholds: DerivedThresholds,
    pub summary: InsightSummary,
}

/// The primary output of the pipeline for one recording.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub insights: Insights,
    pub movement: MovementAnalysis,
}

/// The main, top-level struct for the analytics engine.
pub struct AnalyticsPipeline {
    config: AnalyticsConfig,
    metadata: RecordingMetadata,
    thresholds: DerivedThresholds,
    clusterer: PatternClusterer,
    observer: Arc<dyn AnalysisObserver>,
}

impl AnalyticsPipeline {
    /// Resolves `config` against `metadata`. Fails on any out-of-domain parameter.
    pub fn new(config: AnalyticsConfig, metadata: RecordingMetadata) -> AnalyticsResult<Self> {
        let thresholds = config.derive(&metadata)?;
        let clusterer = PatternClusterer::new(config.clustering.clone())?;
        Ok(Self {
            config,
            metadata,
            thresholds,
            clusterer,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn AnalysisObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    pub fn thresholds(&self) -> &DerivedThresholds {
        &self.thresholds
    }

    pub fn observer(&self) -> &Arc<dyn AnalysisObserver> {
        &self.observer
    }

    pub fn ingestor(&self) -> TrackIngestor {
        TrackIngestor::new(self.config.tracks.metadata_columns)
    }

    pub fn stationary_detector(&self) -> AnalyticsResult<StationaryDetector> {
        StationaryDetector::new(
            self.thresholds.dwell_distance(),
            self.thresholds.dwell_samples(),
        )
    }

    pub fn energy_estimator(&self) -> AnalyticsResult<EnergyEstimator> {
        let estimator = EnergyEstimator::new(self.thresholds.time_step_seconds())?;
        if !self.config.rest.enabled {
            return Ok(estimator);
        }
        estimator.with_rest_trimming(
            self.thresholds.rest_distance(),
            self.thresholds.rest_samples(),
        )
    }

    pub fn track_analyzer(&self) -> AnalyticsResult<TrackAnalyzer> {
        Ok(TrackAnalyzer::new(
            self.stationary_detector()?,
            self.energy_estimator()?,
            &self.config.tracks,
        ))
    }

    /// An empty accumulator sized to the processed frame.
    pub fn heatmap_accumulator(&self) -> AnalyticsResult<HeatmapAccumulator> {
        HeatmapAccumulator::new(
            self.thresholds.frame_width(),
            self.thresholds.frame_height(),
            self.config.heatmap.clone(),
        )
    }

    /// Parses raw rows into tracks, dropping rows with no usable point.
    pub fn ingest(&self, rows: &[TrackRow]) -> Vec<Track> {
        self.observer.on_stage_started(AnalysisStage::Ingest);
        let ingestor = self.ingestor();
        let tracks: Vec<Track> = rows.iter().filter_map(|row| ingestor.ingest_row(row)).collect();
        self.observer
            .on_tracks_dropped("no usable coordinates", rows.len() - tracks.len());
        self.observer.on_stage_completed(AnalysisStage::Ingest, tracks.len());
        tracks
    }

    /// Runs the movement branch over already-ingested tracks.
    pub fn analyze_tracks(&self, tracks: &[Track]) -> AnalyticsResult<MovementAnalysis> {
        let analyzer = self.track_analyzer()?;
        self.notify_track_stages_started();
        let analyses = analyzer.analyze_all(tracks);

        let mut heatmap = self.heatmap_accumulator()?;
        heatmap.add_segments(analyses.iter().flat_map(|a| a.segments.iter()));
        Ok(self.assemble(tracks, analyses, heatmap))
    }

    pub(crate) fn notify_track_stages_started(&self) {
        self.observer.on_stage_started(AnalysisStage::Dwell);
        self.observer.on_stage_started(AnalysisStage::Energy);
    }

    /// Joins per-track results, in track order, into the movement analysis. The
    /// heatmap already holds every segment of `analyses`.
    pub(crate) fn assemble(
        &self,
        tracks: &[Track],
        analyses: Vec<TrackAnalysis>,
        heatmap: HeatmapAccumulator,
    ) -> MovementAnalysis {
        let policy = &self.config.tracks;
        let too_short = |min: usize| tracks.iter().filter(|t| !t.has_at_least(min)).count();
        self.observer
            .on_tracks_dropped("too short for heatmap", too_short(policy.heatmap_min_points));
        self.observer
            .on_tracks_dropped("too short for energy", too_short(policy.energy_min_points));

        let mut stationary_segments = Vec::new();
        let mut energy_samples = Vec::new();
        let mut track_energies = Vec::new();
        let mut features = Vec::new();
        for analysis in analyses {
            stationary_segments.extend(analysis.segments);
            energy_samples.extend(analysis.energy_samples);
            track_energies.extend(analysis.energy);
            features.extend(analysis.features);
        }
        self.observer
            .on_stage_completed(AnalysisStage::Dwell, stationary_segments.len());

        self.observer.on_stage_started(AnalysisStage::Heatmap);
        let heatmap = heatmap.finish();
        self.observer
            .on_stage_completed(AnalysisStage::Heatmap, heatmap.covered_cells());

        let energy_distribution =
            EnergyDistribution::from_samples(&energy_samples, self.config.energy_histogram_bins);
        self.observer
            .on_stage_completed(AnalysisStage::Energy, energy_samples.len());

        self.observer.on_stage_started(AnalysisStage::Clustering);
        let patterns = MovementPatterns::analyze(&features, &self.clusterer);
        self.observer
            .on_stage_completed(AnalysisStage::Clustering, patterns.clusters.movement_clusters);

        MovementAnalysis {
            heatmap,
            stationary_segments,
            energy_samples,
            energy_distribution,
            track_energies,
            features,
            patterns,
        }
    }

    /// Runs the frame branch, stamping periods with wall-clock bounds when the
    /// recording has a start time.
    pub fn analyze_frames(&self, frames: &[CrowdFrameRecord]) -> AnalyticsResult<CrowdMetrics> {
        self.observer.on_stage_started(AnalysisStage::CrowdMetrics);
        let mut metrics = CrowdMetricsAggregator.aggregate(frames);
        metrics.abnormal_activity = metrics.abnormal_activity.with_wall_clock(&self.metadata)?;
        metrics.restricted_entry = metrics.restricted_entry.with_wall_clock(&self.metadata)?;
        self.observer
            .on_stage_completed(AnalysisStage::CrowdMetrics, metrics.total_frames());
        Ok(metrics)
    }

    /// Combines both branches into the serializable insights.
    pub fn insights(&self, crowd: CrowdMetrics, movement: &MovementAnalysis) -> Insights {
        let tracked = Some(movement.patterns.total_tracks);
        let summary = InsightSummary::from_metrics(&crowd, tracked);
        Insights {
            crowd_density: crowd.crowd_density,
            social_distancing: crowd.social_distancing,
            movement_patterns: movement.patterns.clone(),
            abnormal_activity: crowd.abnormal_activity,
            restricted_entry: crowd.restricted_entry,
            energy: movement.energy_distribution.clone(),
            thresholds: self.thresholds.clone(),
            summary,
        }
    }

    /// Full analysis of one recording.
    pub fn run(
        &self,
        frames: &[CrowdFrameRecord],
        rows: &[TrackRow],
    ) -> AnalyticsResult<AnalysisReport> {
        let tracks = self.ingest(rows);
        let movement = self.analyze_tracks(&tracks)?;
        let crowd = self.analyze_frames(frames)?;
        Ok(AnalysisReport {
            insights: self.insights(crowd, &movement),
            movement,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core_modules::track::Point;
    use crate::observer::tests::RecordingObserver;

    /// One record per second, 200 px wide: dwell needs 2 samples within 10 px.
    pub(crate) fn metadata() -> RecordingMetadata {
        RecordingMetadata::new(10.0, 10, 200)
    }

    pub(crate) fn rows() -> Vec<TrackRow> {
        let mut rows = Vec::new();
        // Five walkers with the same gait, one lingerer, one unreadable row.
        for id in 0..5 {
            let path: Vec<String> = (0..8).map(|i| format!("{} {}", i * 10, 50 + id)).collect();
            rows.push(TrackRow {
                track_id: id.to_string(),
                metadata: vec!["m".into(), "m".into()],
                coordinates: vec![path.join(" ")],
            });
        }
        rows.push(TrackRow {
            track_id: "9".into(),
            metadata: vec![],
            coordinates: vec!["100 100 101 100 100 101 101 101".into()],
        });
        rows.push(TrackRow {
            track_id: "bad".into(),
            metadata: vec![],
            coordinates: vec!["1 2".into()],
        });
        rows
    }

    pub(crate) fn frames() -> Vec<CrowdFrameRecord> {
        [(3, 0, false), (5, 2, true), (4, 1, true), (2, 0, false)]
            .iter()
            .enumerate()
            .map(|(i, &(humans, violations, abnormal))| CrowdFrameRecord {
                frame_index: i as u64,
                human_count: humans,
                violation_count: violations,
                restricted_entry: false,
                abnormal_activity: abnormal,
            })
            .collect()
    }

    #[test]
    fn zero_frame_rate_fails_at_construction() {
        let metadata = RecordingMetadata::new(0.0, 10, 200);
        assert!(AnalyticsPipeline::new(AnalyticsConfig::default(), metadata).is_err());
    }

    #[test]
    fn ingest_drops_unreadable_rows() {
        let pipeline = AnalyticsPipeline::new(AnalyticsConfig::default(), metadata()).unwrap();
        let tracks = pipeline.ingest(&rows());
        assert_eq!(tracks.len(), 6);
        assert_eq!(tracks[5].id(), 9);
    }

    #[test]
    fn single_point_track_contributes_nothing() {
        let pipeline = AnalyticsPipeline::new(AnalyticsConfig::default(), metadata()).unwrap();
        let lone = Track::new(1, vec![Point::new(3, 3)]).unwrap();
        let analysis = pipeline.track_analyzer().unwrap().analyze(&lone);
        assert!(analysis.segments.is_empty());
        assert!(analysis.energy_samples.is_empty());
        assert!(analysis.features.is_none());
    }

    #[test]
    fn full_run_produces_insights() {
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = AnalyticsPipeline::new(AnalyticsConfig::default(), metadata())
            .unwrap()
            .with_observer(observer.clone());
        let report = pipeline.run(&frames(), &rows()).unwrap();
        let insights = &report.insights;

        assert_eq!(insights.crowd_density.total_frames, 4);
        assert_eq!(insights.abnormal_activity.abnormal_periods.len(), 1);
        assert_eq!(insights.movement_patterns.total_tracks, 6);
        assert_eq!(insights.movement_patterns.clusters.movement_clusters, 1);
        assert_eq!(
            insights.summary.activity_summary.as_deref(),
            Some("Total unique individuals tracked: 6")
        );

        // Only the lingerer dwells.
        assert_eq!(report.movement.stationary_segments.len(), 1);
        assert!(report.movement.heatmap.peak() > 0);
        // Walkers move 10 px per second: 7 steps of energy 50 each.
        assert_eq!(report.movement.track_energies.len(), 5);
        assert!(report.movement.energy_samples.iter().all(|&e| (e - 50.0).abs() < 1e-9));

        let stages: Vec<AnalysisStage> = observer.completed().iter().map(|&(s, _)| s).collect();
        assert!(stages.contains(&AnalysisStage::Clustering));
        assert!(stages.contains(&AnalysisStage::CrowdMetrics));
    }

    #[test]
    fn insights_serialize_to_plain_json() {
        let pipeline = AnalyticsPipeline::new(AnalyticsConfig::default(), metadata()).unwrap();
        let report = pipeline.run(&frames(), &rows()).unwrap();
        let json = serde_json::to_value(&report.insights).unwrap();
        assert_eq!(json["crowd_density"]["max_crowd_size"], 5);
        assert_eq!(json["movement_patterns"]["movement_clusters"], 1);
        assert!(json["summary"]["crowd_summary"].is_string());
    }

    #[test]
    fn empty_inputs_are_not_errors() {
        let pipeline = AnalyticsPipeline::new(AnalyticsConfig::default(), metadata()).unwrap();
        let report = pipeline.run(&[], &[]).unwrap();
        assert_eq!(report.insights.crowd_density.total_frames, 0);
        assert_eq!(report.insights.movement_patterns, MovementPatterns::default());
        assert_eq!(report.movement.heatmap.peak(), 0);
    }
}
