// THEORY:
// The `recording` module is the boundary adapter between the engine and the files the
// upstream detector leaves in its output directory:
//
// - `crowd_data.csv`: one row per recorded frame (time, head count, violations,
//   restricted entry, abnormal activity).
// - `movement_data.csv`: one row per tracked object (id, metadata, path), rows of
//   varying length, with or without a header.
// - `video_data.json`: the recording metadata.
//
// It is also where the final insights are written back as `analytics_insights.json`.
//
// Key architectural principles:
// 1.  **Messy Rows Are Data, Missing Files Are Not Errors**: A row that cannot be read
//     (a header, a truncated line) is skipped and counted. A missing file loads as
//     "no data". Only real I/O and CSV framing failures are reported.
// 2.  **Readers, Not Paths**: Parsing works over any `io::Read`, and the directory
//     type is only a thin layer that opens files. Tests and callers with in-memory
//     data use the readers directly.
// 3.  **The Core Stays Pure**: This is the one place outside the runner that logs.

use crate::config::RecordingMetadata;
use crate::core_modules::crowd_metrics::CrowdFrameRecord;
use crate::core_modules::track::TrackRow;
use crate::error::AnalyticsResult;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CROWD_DATA_FILE: &str = "crowd_data.csv";
pub const MOVEMENT_DATA_FILE: &str = "movement_data.csv";
pub const VIDEO_DATA_FILE: &str = "video_data.json";
pub const INSIGHTS_FILE: &str = "analytics_insights.json";

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn parse_count(field: &str) -> Option<u32> {
    field.parse::<u32>().ok().or_else(|| {
        let value = field.parse::<f64>().ok()?;
        (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64)
            .then_some(value as u32)
    })
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        other => parse_count(other).map(|v| v != 0),
    }
}

fn frame_from_record(record: &csv::StringRecord, frame_index: u64) -> Option<CrowdFrameRecord> {
    Some(CrowdFrameRecord {
        frame_index,
        human_count: parse_count(record.get(1)?)?,
        violation_count: parse_count(record.get(2)?)?,
        restricted_entry: parse_flag(record.get(3)?)?,
        abnormal_activity: parse_flag(record.get(4)?)?,
    })
}

/// Reads the per-frame export. Frames are indexed by their position among the
/// readable rows.
pub fn read_frames<R: Read>(reader: R) -> AnalyticsResult<Vec<CrowdFrameRecord>> {
    let mut frames = Vec::new();
    let mut skipped = 0usize;
    for result in csv_reader(reader).records() {
        let record = result?;
        match frame_from_record(&record, frames.len() as u64) {
            Some(frame) => frames.push(frame),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "Skipped unreadable crowd rows");
    }
    Ok(frames)
}

/// Reads the per-object export into raw rows. Rows without any field are dropped;
/// everything else is left to the ingestor.
pub fn read_track_rows<R: Read>(
    reader: R,
    metadata_columns: usize,
) -> AnalyticsResult<Vec<TrackRow>> {
    let mut rows = Vec::new();
    for result in csv_reader(reader).records() {
        let record = result?;
        let fields: Vec<&str> = record.iter().collect();
        rows.extend(TrackRow::from_fields(&fields, metadata_columns));
    }
    Ok(rows)
}

pub fn read_metadata<R: Read>(reader: R) -> AnalyticsResult<RecordingMetadata> {
    Ok(serde_json::from_reader(reader)?)
}

/// Everything loaded from one output directory.
#[derive(Debug, Clone, Default)]
pub struct RecordingData {
    pub metadata: Option<RecordingMetadata>,
    pub frames: Vec<CrowdFrameRecord>,
    pub track_rows: Vec<TrackRow>,
}

/// A detector output directory.
#[derive(Debug, Clone)]
pub struct RecordingDirectory {
    root: PathBuf,
}

impl RecordingDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    fn open(&self, file_name: &str) -> AnalyticsResult<Option<BufReader<File>>> {
        let path = self.path(file_name);
        if !path.exists() {
            warn!(path = %path.display(), "File not found, treating as empty");
            return Ok(None);
        }
        Ok(Some(BufReader::new(File::open(path)?)))
    }

    pub fn load_metadata(&self) -> AnalyticsResult<Option<RecordingMetadata>> {
        let Some(reader) = self.open(VIDEO_DATA_FILE)? else {
            return Ok(None);
        };
        let metadata = read_metadata(reader)?;
        info!("Loaded video metadata");
        Ok(Some(metadata))
    }

    pub fn load_frames(&self) -> AnalyticsResult<Vec<CrowdFrameRecord>> {
        let Some(reader) = self.open(CROWD_DATA_FILE)? else {
            return Ok(Vec::new());
        };
        let frames = read_frames(reader)?;
        info!(records = frames.len(), "Loaded crowd data");
        Ok(frames)
    }

    pub fn load_track_rows(&self, metadata_columns: usize) -> AnalyticsResult<Vec<TrackRow>> {
        let Some(reader) = self.open(MOVEMENT_DATA_FILE)? else {
            return Ok(Vec::new());
        };
        let rows = read_track_rows(reader, metadata_columns)?;
        info!(records = rows.len(), "Loaded movement data");
        Ok(rows)
    }

    pub fn load(&self, metadata_columns: usize) -> AnalyticsResult<RecordingData> {
        Ok(RecordingData {
            metadata: self.load_metadata()?,
            frames: self.load_frames()?,
            track_rows: self.load_track_rows(metadata_columns)?,
        })
    }

    /// Writes `insights` as pretty JSON and returns the file path.
    pub fn write_insights<T: Serialize>(&self, insights: &T) -> AnalyticsResult<PathBuf> {
        let path = self.path(INSIGHTS_FILE);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, insights)?;
        writer.flush()?;
        info!(path = %path.display(), "Analytics insights saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::track::{Point, TrackIngestor};
    use std::fs;

    const CROWD_CSV: &str = "\
Time,Human Count,Social Distance violate,Restricted Entry,Abnormal Activity
2024-01-01 10:00:00,4,0,0,0
2024-01-01 10:00:01,6,2,1,1
2024-01-01 10:00:02,5,1,False,True
";

    #[test]
    fn reads_frames_and_skips_header() {
        let frames = read_frames(CROWD_CSV.as_bytes()).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame_index, 0);
        assert_eq!(frames[1].human_count, 6);
        assert!(frames[1].restricted_entry && frames[1].abnormal_activity);
        assert!(!frames[2].restricted_entry && frames[2].abnormal_activity);
    }

    #[test]
    fn reads_ragged_track_rows() {
        let csv = "1,a,b,10,20,11,21\n2,a,b,\"5 5 6 6 7 7\"\n3,a\n";
        let rows = read_track_rows(csv.as_bytes(), 2).unwrap();
        assert_eq!(rows.len(), 3);

        let ingestor = TrackIngestor::default();
        let tracks: Vec<_> = rows.iter().filter_map(|row| ingestor.ingest_row(row)).collect();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].points()[2], Point::new(7, 7));
    }

    #[test]
    fn loads_directory_and_writes_insights() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CROWD_DATA_FILE), CROWD_CSV).unwrap();
        fs::write(dir.path().join(MOVEMENT_DATA_FILE), "7,x,y,1,1,2,2,3,3\n").unwrap();
        fs::write(
            dir.path().join(VIDEO_DATA_FILE),
            r#"{"VID_FPS": 30, "DATA_RECORD_FRAME": 5, "PROCESSED_FRAME_SIZE": 640}"#,
        )
        .unwrap();

        let recording = RecordingDirectory::new(dir.path());
        let data = recording.load(2).unwrap();
        assert_eq!(data.frames.len(), 3);
        assert_eq!(data.track_rows.len(), 1);
        assert_eq!(data.metadata.map(|m| m.frame_width), Some(640));

        let path = recording.write_insights(&serde_json::json!({"ok": true})).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["ok"], true);
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let data = RecordingDirectory::new(dir.path()).load(2).unwrap();
        assert!(data.metadata.is_none());
        assert!(data.frames.is_empty());
        assert!(data.track_rows.is_empty());
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        assert!(read_metadata("{not json".as_bytes()).is_err());
    }
}
