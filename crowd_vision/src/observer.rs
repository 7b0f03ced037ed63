// THEORY:
// The core components are pure functions of their inputs and never log. Progress is
// still worth seeing on a long recording, so the pipelines report it through this
// narrow observer interface instead of reaching for a global logger. The default
// methods do nothing, so an observer implements only the notifications it cares
// about.

use std::fmt;
use tracing::{debug, info};

/// A step of the analysis, in the order the pipelines run them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisStage {
    Ingest,
    Dwell,
    Heatmap,
    Energy,
    Clustering,
    CrowdMetrics,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Ingest => "ingest",
            AnalysisStage::Dwell => "dwell",
            AnalysisStage::Heatmap => "heatmap",
            AnalysisStage::Energy => "energy",
            AnalysisStage::Clustering => "clustering",
            AnalysisStage::CrowdMetrics => "crowd_metrics",
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives progress notifications from a pipeline run.
pub trait AnalysisObserver: Send + Sync {
    fn on_stage_started(&self, _stage: AnalysisStage) {}

    /// `items` is whatever the stage produces: tracks, segments, samples, frames.
    fn on_stage_completed(&self, _stage: AnalysisStage, _items: usize) {}

    /// Tracks left out of a stage because they were too short.
    fn on_tracks_dropped(&self, _reason: &str, _count: usize) {}
}

/// Ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl AnalysisObserver for NoopObserver {}

/// Forwards notifications to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AnalysisObserver for TracingObserver {
    fn on_stage_started(&self, stage: AnalysisStage) {
        debug!(target: "crowd_vision", stage = %stage, "Stage started");
    }

    fn on_stage_completed(&self, stage: AnalysisStage, items: usize) {
        info!(target: "crowd_vision", stage = %stage, items, "Stage completed");
    }

    fn on_tracks_dropped(&self, reason: &str, count: usize) {
        if count > 0 {
            debug!(target: "crowd_vision", reason, count, "Tracks dropped");
        }
    }
}
