// THEORY:
// The `clustering` module is the only place the engine makes an unsupervised
// grouping decision. It takes one feature vector per track (duration, distance,
// speed) and asks which tracks behave alike.
//
// Key architectural principles:
// 1.  **Standardize First**: The raw features live on wildly different scales (tens of
//     samples vs. thousands of pixels). Each dimension is centered and divided by its
//     population standard deviation; a constant dimension stays at zero.
// 2.  **Density, Not Count**: Clusters are found by density. Two tracks are neighbors
//     when their standardized distance is below `radius`. A track with at least
//     `min_samples` neighbors (itself included) is a core track. Clusters are the
//     connected components of core tracks, plus the non-core tracks that sit next to
//     one. Everything else is noise.
// 3.  **Order Insensitive**: Feeding the same tracks in a different order must give
//     the same answer. Column sums are taken over sorted values, a border track joins
//     its nearest core neighbor's cluster, and clusters are numbered by their
//     smallest member vector, so nothing depends on input position.
// 4.  **Quadratic Cost**: Neighborhoods are found by comparing every pair. Callers
//     should keep the number of tracks per call bounded.

use crate::core_modules::movement::TrackFeatureVector;
use crate::error::{AnalyticsError, AnalyticsResult};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Label reported for tracks outside every cluster.
pub const NOISE_LABEL: i64 = -1;

/// Smallest number of tracks a clustering call will ever accept.
pub const MIN_CLUSTERABLE_TRACKS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Neighborhood radius in standardized units.
    pub radius: f64,
    /// Neighbors (self included) a track needs to be a core track.
    pub min_samples: usize,
    /// Below this many tracks no clustering is attempted. Never less than
    /// `MIN_CLUSTERABLE_TRACKS`.
    pub min_tracks: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            radius: 0.5,
            min_samples: 3,
            min_tracks: MIN_CLUSTERABLE_TRACKS,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(AnalyticsError::invalid_parameter(
                "clustering.radius",
                format!("must be positive, got {}", self.radius),
            ));
        }
        if self.min_samples == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "clustering.min_samples",
                "must be at least one",
            ));
        }
        if self.min_tracks < MIN_CLUSTERABLE_TRACKS {
            return Err(AnalyticsError::invalid_parameter(
                "clustering.min_tracks",
                format!(
                    "must be at least {MIN_CLUSTERABLE_TRACKS}, got {}",
                    self.min_tracks
                ),
            ));
        }
        Ok(())
    }
}

/// Cluster membership of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterLabel {
    Cluster(usize),
    Noise,
}

impl ClusterLabel {
    /// Integer form: cluster index, or `-1` for noise.
    pub fn as_i64(&self) -> i64 {
        match self {
            ClusterLabel::Cluster(index) => *index as i64,
            ClusterLabel::Noise => NOISE_LABEL,
        }
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }
}

impl Serialize for ClusterLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterAssignment {
    pub track_id: u64,
    pub label: ClusterLabel,
}

/// Outcome of one clustering call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterSummary {
    /// Number of clusters, noise excluded.
    pub movement_clusters: usize,
    pub noise_tracks: usize,
    /// Tracks per label; noise is keyed `-1`.
    pub cluster_distribution: BTreeMap<i64, usize>,
    #[serde(skip)]
    pub assignments: Vec<ClusterAssignment>,
}

impl ClusterSummary {
    pub fn label_of(&self, track_id: u64) -> Option<ClusterLabel> {
        self.assignments
            .iter()
            .find(|a| a.track_id == track_id)
            .map(|a| a.label)
    }
}

/// Groups tracks by behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternClusterer {
    config: ClusteringConfig,
}

impl Default for PatternClusterer {
    fn default() -> Self {
        Self {
            config: ClusteringConfig::default(),
        }
    }
}

impl PatternClusterer {
    pub fn new(config: ClusteringConfig) -> AnalyticsResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Clusters track feature vectors. Fewer than `min_tracks` vectors report zero
    /// clusters and no assignments.
    pub fn cluster(&self, features: &[TrackFeatureVector]) -> ClusterSummary {
        if features.len() < self.config.min_tracks {
            return ClusterSummary::default();
        }

        let rows: Vec<_> = features.iter().map(TrackFeatureVector::as_array).collect();
        let labels = self.cluster_rows(&rows);

        let mut cluster_distribution = BTreeMap::new();
        for label in &labels {
            *cluster_distribution.entry(label.as_i64()).or_insert(0) += 1;
        }
        let noise_tracks = labels.iter().filter(|l| l.is_noise()).count();
        let movement_clusters = cluster_distribution.keys().filter(|&&k| k != NOISE_LABEL).count();

        ClusterSummary {
            movement_clusters,
            noise_tracks,
            cluster_distribution,
            assignments: features
                .iter()
                .zip(labels)
                .map(|(feature, label)| ClusterAssignment {
                    track_id: feature.track_id,
                    label,
                })
                .collect(),
        }
    }

    /// Standardizes `rows` and labels each one. No minimum size applies here.
    pub fn cluster_rows<const D: usize>(&self, rows: &[[f64; D]]) -> Vec<ClusterLabel> {
        let scaled = standardize(rows);
        density_cluster(&scaled, self.config.radius, self.config.min_samples)
    }
}

/// Column-wise z-scores using the population standard deviation. Constant columns
/// become zero.
pub fn standardize<const D: usize>(rows: &[[f64; D]]) -> Vec<[f64; D]> {
    if rows.is_empty() {
        return Vec::new();
    }
    let n = rows.len() as f64;
    let mut means = [0.0; D];
    let mut std_devs = [0.0; D];

    for d in 0..D {
        let mut column: Vec<f64> = rows.iter().map(|row| row[d]).collect();
        column.sort_by(f64::total_cmp);
        let mean = column.iter().sum::<f64>() / n;
        let mut deviations: Vec<f64> = column.iter().map(|v| (v - mean).powi(2)).collect();
        deviations.sort_by(f64::total_cmp);
        means[d] = mean;
        std_devs[d] = (deviations.iter().sum::<f64>() / n).sqrt();
    }

    rows.iter()
        .map(|row| {
            let mut scaled = [0.0; D];
            for d in 0..D {
                scaled[d] = if std_devs[d] > f64::EPSILON {
                    (row[d] - means[d]) / std_devs[d]
                } else {
                    0.0
                };
            }
            scaled
        })
        .collect()
}

fn euclidean<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn lexicographic<const D: usize>(a: &[f64; D], b: &[f64; D]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Density-based clustering over already-scaled points.
pub fn density_cluster<const D: usize>(
    points: &[[f64; D]],
    radius: f64,
    min_samples: usize,
) -> Vec<ClusterLabel> {
    let n = points.len();
    let neighborhoods: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| euclidean(&points[i], &points[j]) < radius)
                .collect()
        })
        .collect();
    let is_core: Vec<bool> = neighborhoods.iter().map(|hood| hood.len() >= min_samples).collect();

    // --- 1. Connected components of core points ---
    let mut component = vec![usize::MAX; n];
    let mut components: Vec<Vec<usize>> = Vec::new();
    for seed in 0..n {
        if !is_core[seed] || component[seed] != usize::MAX {
            continue;
        }
        let id = components.len();
        let mut members = Vec::new();
        let mut stack = vec![seed];
        component[seed] = id;
        while let Some(current) = stack.pop() {
            members.push(current);
            for &next in &neighborhoods[current] {
                if is_core[next] && component[next] == usize::MAX {
                    component[next] = id;
                    stack.push(next);
                }
            }
        }
        components.push(members);
    }

    // --- 2. Position-independent numbering ---
    let smallest_member = |members: &Vec<usize>| {
        members
            .iter()
            .copied()
            .min_by(|&a, &b| lexicographic(&points[a], &points[b]))
    };
    let mut order: Vec<usize> = (0..components.len()).collect();
    order.sort_by(|&a, &b| {
        match (smallest_member(&components[a]), smallest_member(&components[b])) {
            (Some(x), Some(y)) => lexicographic(&points[x], &points[y]),
            _ => Ordering::Equal,
        }
    });
    let mut rank = vec![0; components.len()];
    for (position, &component_id) in order.iter().enumerate() {
        rank[component_id] = position;
    }

    // --- 3. Labels: cores by component, borders by nearest core ---
    (0..n)
        .map(|i| {
            if is_core[i] {
                return ClusterLabel::Cluster(rank[component[i]]);
            }
            neighborhoods[i]
                .iter()
                .filter(|&&j| is_core[j])
                .map(|&j| (euclidean(&points[i], &points[j]), rank[component[j]]))
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
                .map(|(_, cluster)| ClusterLabel::Cluster(cluster))
                .unwrap_or(ClusterLabel::Noise)
        })
        .collect()
}
