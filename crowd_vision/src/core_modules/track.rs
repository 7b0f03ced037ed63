// THEORY:
// The `track` module is the entry point of the movement analysis layer. Upstream, a
// detector and tracker have already decided which pixels belong to which person; what
// reaches us is one row per tracked object, holding its id, a couple of metadata
// columns, and then its path as a flat list of numbers.
//
// Key architectural principles:
// 1.  **Two Encodings, One Track**: The path may arrive spread over separate columns
//     (`x1, y1, x2, y2, ...`) or packed into a single delimited string
//     (`"x1 y1 x2 y2 ..."`). Both are flattened into one token stream before pairing,
//     so the two encodings can never disagree.
// 2.  **Truncate, Never Fail**: The first token that is not a number ends the path.
//     Whatever was paired before it is kept. A malformed row costs us the tail of one
//     track, not the whole analysis run.
// 3.  **Immutable Result**: A `Track` is built once and never changes. Every later
//     stage (dwell detection, energy, clustering) borrows it read-only.
// 4.  **Caller-Chosen Minimums**: Different consumers need different amounts of path.
//     The heatmap is happy with three points, energy estimation wants more. The
//     ingestor does not pick; the caller states the minimum it needs.

use serde::{Deserialize, Serialize};

/// A position on the processed frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in pixel space.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x as f64) - (other.x as f64);
        let dy = (self.y as f64) - (other.y as f64);
        (dx * dx + dy * dy).sqrt()
    }
}

/// The full path of a single tracked object, one point per recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: u64,
    points: Vec<Point>,
}

impl Track {
    /// Builds a track. Returns `None` for an empty path, since a track always has at
    /// least one observed position.
    pub fn new(id: u64, points: Vec<Point>) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(Self { id, points })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a constructed track; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the track has at least `min_points` samples.
    pub fn has_at_least(&self, min_points: usize) -> bool {
        self.points.len() >= min_points
    }

    /// Sum of the distances between consecutive points.
    pub fn path_distance(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance(&pair[1]))
            .sum()
    }
}

/// One raw per-object row as delivered by the tracker: id, metadata, then the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRow {
    pub track_id: String,
    pub metadata: Vec<String>,
    /// Either one field per coordinate or a single delimited string.
    pub coordinates: Vec<String>,
}

impl TrackRow {
    /// Splits a raw record into id, `metadata_columns` metadata fields and the
    /// coordinate tail. Returns `None` for a record with no fields at all.
    pub fn from_fields<S: AsRef<str>>(fields: &[S], metadata_columns: usize) -> Option<Self> {
        let (id, rest) = fields.split_first()?;
        let split = metadata_columns.min(rest.len());
        Some(Self {
            track_id: id.as_ref().trim().to_string(),
            metadata: rest[..split].iter().map(|f| f.as_ref().to_string()).collect(),
            coordinates: rest[split..].iter().map(|f| f.as_ref().to_string()).collect(),
        })
    }
}

/// Number of metadata columns between the track id and the path in the tracker's
/// movement export.
pub const DEFAULT_METADATA_COLUMNS: usize = 2;

/// Turns raw tracker rows into typed `Track`s.
#[derive(Debug, Clone, Copy)]
pub struct TrackIngestor {
    metadata_columns: usize,
}

impl Default for TrackIngestor {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_COLUMNS)
    }
}

impl TrackIngestor {
    pub fn new(metadata_columns: usize) -> Self {
        Self { metadata_columns }
    }

    pub fn metadata_columns(&self) -> usize {
        self.metadata_columns
    }

    /// Parses a raw record (id, metadata, coordinates) into a track.
    pub fn ingest_fields<S: AsRef<str>>(&self, fields: &[S]) -> Option<Track> {
        let row = TrackRow::from_fields(fields, self.metadata_columns)?;
        self.ingest_row(&row)
    }

    /// Parses a split row. Rows with an unreadable id or no usable coordinates are
    /// dropped.
    pub fn ingest_row(&self, row: &TrackRow) -> Option<Track> {
        let id = parse_track_id(&row.track_id)?;
        Track::new(id, parse_coordinates(&row.coordinates))
    }

    /// Parses a row and keeps it only when it reaches `min_points` samples.
    pub fn ingest_with_minimum(&self, row: &TrackRow, min_points: usize) -> Option<Track> {
        self.ingest_row(row).filter(|track| track.has_at_least(min_points))
    }
}

fn parse_track_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.parse::<u64>().ok().or_else(|| {
        // Spreadsheet exports sometimes write ids as "7.0".
        let value = raw.parse::<f64>().ok()?;
        (value.is_finite() && value >= 0.0 && value.fract() == 0.0).then_some(value as u64)
    })
}

fn parse_coordinate(token: &str) -> Option<i32> {
    token.parse::<i32>().ok().or_else(|| {
        let value = token.parse::<f64>().ok()?;
        let in_range = value >= i32::MIN as f64 && value <= i32::MAX as f64;
        (value.is_finite() && value.fract() == 0.0 && in_range).then_some(value as i32)
    })
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == ',' || c == ';'
}

/// Flattens the coordinate fields into tokens and pairs them as `(x, y)`.
///
/// Empty cells are skipped. Pairing stops at the first token that is not an integer;
/// a trailing unpaired value is ignored.
pub fn parse_coordinates<S: AsRef<str>>(fields: &[S]) -> Vec<Point> {
    let mut tokens = fields
        .iter()
        .flat_map(|field| field.as_ref().split(is_separator))
        .filter(|token| !token.is_empty());

    let mut points = Vec::new();
    while let (Some(x), Some(y)) = (tokens.next(), tokens.next()) {
        match (parse_coordinate(x), parse_coordinate(y)) {
            (Some(x), Some(y)) => points.push(Point::new(x, y)),
            _ => break,
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> TrackRow {
        TrackRow::from_fields(fields, DEFAULT_METADATA_COLUMNS).unwrap()
    }

    #[test]
    fn separate_columns_and_delimited_string_agree() {
        let ingestor = TrackIngestor::default();
        let columns = ingestor
            .ingest_fields(&["4", "meta", "meta", "10", "20", "11", "21", "12", "22"])
            .unwrap();
        let packed = ingestor
            .ingest_fields(&["4", "meta", "meta", "10 20 11 21 12 22"])
            .unwrap();

        assert_eq!(columns.points(), packed.points());
        assert_eq!(columns.id(), 4);
        assert_eq!(
            columns.points(),
            &[Point::new(10, 20), Point::new(11, 21), Point::new(12, 22)]
        );
    }

    #[test]
    fn truncates_at_first_malformed_token() {
        let points = parse_coordinates(&["1", "2", "3", "oops", "5", "6"]);
        assert_eq!(points, vec![Point::new(1, 2)]);
    }

    #[test]
    fn skips_empty_cells_and_ignores_dangling_value() {
        let points = parse_coordinates(&["1", "2", "", "3", "4", "9", ""]);
        assert_eq!(points, vec![Point::new(1, 2), Point::new(3, 4)]);
    }

    #[test]
    fn accepts_integral_floats() {
        let points = parse_coordinates(&["1.0", "2.0", "3.5", "4"]);
        assert_eq!(points, vec![Point::new(1, 2)]);
    }

    #[test]
    fn drops_rows_without_points_or_id() {
        let ingestor = TrackIngestor::default();
        assert!(ingestor.ingest_row(&row(&["1", "a", "b", "x", "y"])).is_none());
        assert!(ingestor.ingest_row(&row(&["id?", "a", "b", "1", "2"])).is_none());
        assert!(ingestor.ingest_fields::<&str>(&[]).is_none());
    }

    #[test]
    fn minimum_point_policy_is_caller_chosen() {
        let ingestor = TrackIngestor::default();
        let three = row(&["2", "a", "b", "0 0 1 1 2 2"]);
        assert!(ingestor.ingest_with_minimum(&three, 3).is_some());
        assert!(ingestor.ingest_with_minimum(&three, 6).is_none());
    }

    #[test]
    fn path_distance_sums_steps() {
        let points = vec![Point::new(0, 0), Point::new(3, 4), Point::new(3, 10)];
        let track = Track::new(1, points).unwrap();
        assert!((track.path_distance() - 11.0).abs() < 1e-9);
        assert!(Track::new(2, Vec::new()).is_none());
    }
}
