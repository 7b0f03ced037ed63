// THEORY:
// The `parallel_pipeline` module runs the movement branch on a worker pool. Tracks
// have no dependencies on each other, which makes the track the one safe unit of
// parallelism: every worker gets its own share of tracks, its own heatmap
// accumulator, and touches nothing another worker can see.
//
// Key architectural principles:
// 1.  **Round-Robin Dispatch**: Tracks are dealt to `worker_count` workers in turn, so
//     long and short tracks spread evenly without any sizing heuristics. The pool is
//     sized by `num_cpus` unless the caller says otherwise.
// 2.  **Blocking Work Off the Runtime**: The per-track analysis is pure CPU work, so
//     each worker runs on `tokio::task::spawn_blocking` and the async side only waits.
// 3.  **Order Restored, Heatmaps Merged**: Workers tag every result with the track's
//     input position. Once all workers are joined, results are put back into input
//     order and handed to the same `assemble` step the synchronous pipeline uses.
//     Heatmap sums are exact, so merging the workers' accumulators gives the grid a
//     single accumulator would have produced.
// 4.  **Failures Surface**: A worker that panics or is cancelled turns into an
//     `AnalyticsError::Worker`; a partial result is never returned.

use crate::core_modules::crowd_metrics::{CrowdFrameRecord, CrowdMetrics};
use crate::core_modules::heatmap::HeatmapAccumulator;
use crate::core_modules::track::{Track, TrackRow};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::pipeline::{AnalysisReport, AnalyticsPipeline, MovementAnalysis, TrackAnalysis};
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};

type WorkerOutput = (Vec<(usize, TrackAnalysis)>, HeatmapAccumulator);

fn worker_error(err: JoinError) -> AnalyticsError {
    AnalyticsError::Worker(err.to_string())
}

/// Deals `count` positions to `workers` workers in turn.
pub fn round_robin(count: usize, workers: usize) -> Vec<Vec<usize>> {
    let workers = workers.max(1);
    let mut batches = vec![Vec::with_capacity(count / workers + 1); workers];
    let mut worker_idx = 0;
    for position in 0..count {
        batches[worker_idx].push(position);
        worker_idx = (worker_idx + 1) % workers;
    }
    batches
}

/// Runs an `AnalyticsPipeline` with the movement branch spread over a worker pool.
pub struct ParallelPipeline {
    pipeline: Arc<AnalyticsPipeline>,
    worker_count: usize,
}

impl ParallelPipeline {
    pub fn new(pipeline: AnalyticsPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            worker_count: num_cpus::get().max(1),
        }
    }

    /// Overrides the pool size. Zero is treated as one.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn pipeline(&self) -> &AnalyticsPipeline {
        &self.pipeline
    }

    /// Workers actually started for `track_count` tracks. Every worker owns a
    /// full-frame accumulator, so the pool never outnumbers the tracks.
    pub fn workers_for(&self, track_count: usize) -> usize {
        self.worker_count.min(track_count).max(1)
    }

    /// Movement branch over `tracks`; same result as `AnalyticsPipeline::analyze_tracks`.
    pub async fn analyze_tracks(&self, tracks: Vec<Track>) -> AnalyticsResult<MovementAnalysis> {
        let analyzer = self.pipeline.track_analyzer()?;
        self.pipeline.notify_track_stages_started();

        let tracks: Arc<[Track]> = tracks.into();
        let workers = self.workers_for(tracks.len());
        let mut handles: Vec<JoinHandle<WorkerOutput>> = Vec::with_capacity(workers);
        for batch in round_robin(tracks.len(), workers) {
            if batch.is_empty() {
                continue;
            }
            let tracks = Arc::clone(&tracks);
            let mut heatmap = self.pipeline.heatmap_accumulator()?;
            handles.push(tokio::task::spawn_blocking(move || {
                let mut results = Vec::with_capacity(batch.len());
                for position in batch {
                    let analysis = analyzer.analyze(&tracks[position]);
                    heatmap.add_segments(&analysis.segments);
                    results.push((position, analysis));
                }
                (results, heatmap)
            }));
        }

        let mut slots: Vec<Option<TrackAnalysis>> = vec![None; tracks.len()];
        let mut merged = self.pipeline.heatmap_accumulator()?;
        for joined in join_all(handles).await {
            let (results, heatmap) = joined.map_err(worker_error)?;
            merged.merge(&heatmap)?;
            for (position, analysis) in results {
                slots[position] = Some(analysis);
            }
        }

        let analyses: Vec<TrackAnalysis> = slots.into_iter().flatten().collect();
        if analyses.len() != tracks.len() {
            return Err(AnalyticsError::Worker(format!(
                "expected {} track results, got {}",
                tracks.len(),
                analyses.len()
            )));
        }
        Ok(self.pipeline.assemble(&tracks, analyses, merged))
    }

    /// Full analysis of one recording. The frame branch runs alongside the track
    /// workers.
    pub async fn run(
        &self,
        frames: Vec<CrowdFrameRecord>,
        rows: Vec<TrackRow>,
    ) -> AnalyticsResult<AnalysisReport> {
        let tracks = self.pipeline.ingest(&rows);

        let pipeline = Arc::clone(&self.pipeline);
        let crowd_task: JoinHandle<AnalyticsResult<CrowdMetrics>> =
            tokio::task::spawn_blocking(move || pipeline.analyze_frames(&frames));

        let (movement, crowd) = tokio::join!(self.analyze_tracks(tracks), crowd_task);
        let movement = movement?;
        let crowd = crowd.map_err(worker_error)??;

        Ok(AnalysisReport {
            insights: self.pipeline.insights(crowd, &movement),
            movement,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::pipeline::tests::{frames, metadata, rows};

    fn pipeline() -> AnalyticsPipeline {
        AnalyticsPipeline::new(AnalyticsConfig::default(), metadata()).unwrap()
    }

    #[test]
    fn round_robin_deals_in_turn() {
        assert_eq!(round_robin(5, 2), vec![vec![0, 2, 4], vec![1, 3]]);
        assert_eq!(round_robin(2, 0), vec![vec![0, 1]]);
        assert_eq!(round_robin(1, 3), vec![vec![0], vec![], vec![]]);
    }

    #[test]
    fn pool_never_outnumbers_tracks() {
        let parallel = ParallelPipeline::new(pipeline()).with_workers(16);
        assert_eq!(parallel.workers_for(3), 3);
        assert_eq!(parallel.workers_for(40), 16);
        assert_eq!(parallel.workers_for(0), 1);
        assert!(round_robin(3, parallel.workers_for(3)).iter().all(|b| !b.is_empty()));
    }

    #[tokio::test]
    async fn matches_sequential_pipeline() {
        let sequential = pipeline();
        let tracks = sequential.ingest(&rows());
        let expected = sequential.analyze_tracks(&tracks).unwrap();

        for workers in [1, 3, 16] {
            let parallel = ParallelPipeline::new(pipeline()).with_workers(workers);
            let actual = parallel.analyze_tracks(tracks.clone()).await.unwrap();
            assert_eq!(actual.heatmap, expected.heatmap);
            assert_eq!(actual.stationary_segments, expected.stationary_segments);
            assert_eq!(actual.energy_samples, expected.energy_samples);
            assert_eq!(actual.track_energies, expected.track_energies);
            assert_eq!(actual.features, expected.features);
            assert_eq!(actual.patterns, expected.patterns);
        }
    }

    #[tokio::test]
    async fn full_run_matches_sequential_insights() {
        let expected = pipeline().run(&frames(), &rows()).unwrap();
        let actual = ParallelPipeline::new(pipeline())
            .with_workers(2)
            .run(frames(), rows())
            .await
            .unwrap();
        assert_eq!(actual.insights, expected.insights);
    }

    #[tokio::test]
    async fn no_tracks_is_empty_analysis() {
        let parallel = ParallelPipeline::new(pipeline());
        let movement = parallel.analyze_tracks(Vec::new()).await.unwrap();
        assert!(movement.features.is_empty());
        assert_eq!(movement.heatmap.peak(), 0);
    }
}
