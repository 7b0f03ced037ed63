// Example runner for the `crowd_vision` library.
//
// Usage: crowd_vision [DATA_DIR] [HEATMAP_PNG]
//
// Reads the detector's output directory (default `processed_data`), writes
// `analytics_insights.json` back into it, and optionally saves the heatmap as a
// grayscale PNG for compositing.

use anyhow::{Context, Result};
use crowd_vision::recording::RecordingDirectory;
use crowd_vision::{AnalyticsConfig, AnalyticsPipeline, ParallelPipeline, TracingObserver};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("crowd_vision=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let mut args = std::env::args().skip(1);
    let data_dir = args.next().unwrap_or_else(|| "processed_data".to_string());
    let heatmap_path = args.next();

    info!(data_dir = %data_dir, "Crowd Vision Engine - Example Runner");

    let config = AnalyticsConfig::from_env();
    let recording = RecordingDirectory::new(&data_dir);
    let data = recording
        .load(config.tracks.metadata_columns)
        .with_context(|| format!("loading recording from {data_dir}"))?;
    let metadata = data
        .metadata
        .with_context(|| format!("{data_dir} has no video metadata"))?;

    let pipeline = AnalyticsPipeline::new(config, metadata)
        .context("invalid analytics configuration")?
        .with_observer(Arc::new(TracingObserver));
    let parallel = ParallelPipeline::new(pipeline);
    info!(workers = parallel.worker_count(), "Starting analysis");

    let report = parallel.run(data.frames, data.track_rows).await?;
    let insights_path = recording.write_insights(&report.insights)?;

    for line in [
        &report.insights.summary.crowd_summary,
        &report.insights.summary.safety_summary,
        &report.insights.summary.activity_summary,
        &report.insights.summary.security_summary,
    ]
    .into_iter()
    .flatten()
    {
        info!("{line}");
    }

    if let Some(path) = heatmap_path {
        report
            .movement
            .heatmap
            .to_luma_image()
            .save(&path)
            .with_context(|| format!("saving heatmap to {path}"))?;
        info!(path = %path, "Heatmap saved");
    }

    info!(path = %insights_path.display(), "Done");
    Ok(())
}
