// THEORY:
// This file is the main entry point for the `crowd_vision` library crate. It defines
// the public API exposed to consumers such as the reporting layer or a dashboard.
//
// The primary goal is to export the `AnalyticsPipeline` (and its parallel twin) with
// the data structures they consume and produce as the high-level interface to the
// engine. The core components live in `core_modules` and stay usable on their own:
// each one is a pure function of its inputs and its thresholds. `config`, `error`
// and `observer` are the ambient layers around them, and `recording` is the only
// module that touches the file system.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod observer;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod recording;

pub use config::{AnalyticsConfig, DerivedThresholds, RecordingMetadata};
pub use error::{AnalyticsError, AnalyticsResult};
pub use observer::{AnalysisObserver, AnalysisStage, NoopObserver, TracingObserver};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{AnalysisReport, AnalyticsPipeline, Insights, MovementAnalysis};
