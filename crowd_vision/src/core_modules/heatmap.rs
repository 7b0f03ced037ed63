// THEORY:
// The `heatmap` module turns dwell segments into an occupancy intensity field the
// size of the processed frame. Each dwell is drawn as a "blob": a stack of concentric
// filled circles, painted from the outermost ring inwards so that every inner ring
// overwrites the one around it.
//
// Key architectural principles:
// 1.  **Duration Drives Size**: The number of rings grows with the dwell duration
//     (`ceil(duration * growth_scale / ring_step)`) and saturates at `ring_count` once
//     the dwell reaches `max_dwell_samples`. Long stays make wide blobs.
// 2.  **Linear Decay**: Ring `k` has radius `k * ring_step` and intensity
//     `peak_intensity - k * intensity_step`. The center carries the full intensity,
//     the rim the floor value.
// 3.  **Scratch Then Compose**: A blob is first painted onto its own scratch buffer
//     (clipped to the frame) and only then summed into the accumulator. Painting
//     never reads the accumulator, so the sum is the same whatever order the
//     segments arrive in.
// 4.  **Clamp Once**: The accumulator keeps exact sums. Clamping to `peak_intensity`
//     happens once, when the grid is finished. Because the clamp is applied after an
//     exact, commutative sum, accumulating A then B is identical to B then A.

use crate::core_modules::stationary::StationarySegment;
use crate::error::{AnalyticsError, AnalyticsResult};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// Blob geometry and intensity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Dwell length, in samples, at which a blob reaches its full size.
    pub max_dwell_samples: usize,
    /// Number of rings in a full-size blob.
    pub ring_count: usize,
    /// Radius of a full-size blob as a fraction of the frame width.
    pub max_radius_fraction: f64,
    /// Intensity of the blob center, and the clamp applied to the finished grid.
    pub peak_intensity: u32,
    /// Pixels of radius gained per sample of dwell.
    pub growth_scale: f64,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            max_dwell_samples: 120,
            ring_count: 50,
            max_radius_fraction: 0.1,
            peak_intensity: 210,
            growth_scale: 1.5,
        }
    }
}

impl HeatmapConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.max_dwell_samples == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "heatmap.max_dwell_samples",
                "must be at least one sample",
            ));
        }
        if self.ring_count == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "heatmap.ring_count",
                "must be at least one ring",
            ));
        }
        if !(self.max_radius_fraction.is_finite() && self.max_radius_fraction > 0.0) {
            return Err(AnalyticsError::invalid_parameter(
                "heatmap.max_radius_fraction",
                format!("must be positive, got {}", self.max_radius_fraction),
            ));
        }
        if self.peak_intensity == 0 || self.peak_intensity > u8::MAX as u32 {
            return Err(AnalyticsError::invalid_parameter(
                "heatmap.peak_intensity",
                format!("must be within 1..=255, got {}", self.peak_intensity),
            ));
        }
        if !(self.growth_scale.is_finite() && self.growth_scale > 0.0) {
            return Err(AnalyticsError::invalid_parameter(
                "heatmap.growth_scale",
                format!("must be positive, got {}", self.growth_scale),
            ));
        }
        Ok(())
    }
}

/// A clamped occupancy intensity field, row-major, one cell per frame pixel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapGrid {
    width: u32,
    height: u32,
    max_intensity: u32,
    cells: Vec<u32>,
}

impl HeatmapGrid {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The clamp every cell respects.
    pub fn max_intensity(&self) -> u32 {
        self.max_intensity
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get((y * self.width + x) as usize).copied()
    }

    /// Highest cell value actually present.
    pub fn peak(&self) -> u32 {
        self.cells.iter().copied().max().unwrap_or(0)
    }

    /// Number of cells any blob touched.
    pub fn covered_cells(&self) -> usize {
        self.cells.iter().filter(|&&v| v > 0).count()
    }

    /// 8-bit grayscale view of the grid, for colour-mapping by the renderer.
    pub fn to_luma_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let value = self.cells[(y * self.width + x) as usize];
            Luma([value.min(u8::MAX as u32) as u8])
        })
    }
}

/// A blob painted onto its own buffer, covering only its clipped bounding box.
struct BlobScratch {
    x0: u32,
    y0: u32,
    width: u32,
    values: Vec<u32>,
}

/// Accumulates dwell blobs for one analysis run.
#[derive(Debug, Clone)]
pub struct HeatmapAccumulator {
    width: u32,
    height: u32,
    config: HeatmapConfig,
    ring_step: f64,
    intensity_step: u32,
    sums: Vec<u32>,
    blob_count: usize,
}

impl HeatmapAccumulator {
    /// An empty accumulator sized to the processed frame.
    pub fn new(width: u32, height: u32, config: HeatmapConfig) -> AnalyticsResult<Self> {
        config.validate()?;
        if width == 0 || height == 0 {
            return Err(AnalyticsError::invalid_parameter(
                "heatmap.frame_size",
                format!("frame must be non-empty, got {width}x{height}"),
            ));
        }
        let max_radius = width as f64 * config.max_radius_fraction;
        let ring_step = max_radius / config.ring_count as f64;
        let intensity_step = config.peak_intensity / config.ring_count as u32;
        Ok(Self {
            width,
            height,
            ring_step,
            intensity_step,
            sums: vec![0; (width as usize) * (height as usize)],
            blob_count: 0,
            config,
        })
    }

    pub fn blob_count(&self) -> usize {
        self.blob_count
    }

    /// Number of rings drawn for a dwell of `duration` samples.
    pub fn ring_count_for(&self, duration: usize) -> usize {
        if duration >= self.config.max_dwell_samples {
            return self.config.ring_count;
        }
        let rings = (duration as f64 * self.config.growth_scale / self.ring_step).ceil();
        (rings.max(0.0) as usize).min(self.config.ring_count)
    }

    /// Adds one blob to the running sum.
    pub fn add_segment(&mut self, segment: &StationarySegment) {
        let Some(scratch) = self.paint_blob(segment) else {
            return;
        };
        let rows = scratch.values.chunks(scratch.width as usize);
        for (dy, row) in rows.enumerate() {
            let start = ((scratch.y0 as usize + dy) * self.width as usize) + scratch.x0 as usize;
            for (cell, value) in self.sums[start..start + row.len()].iter_mut().zip(row) {
                *cell = cell.saturating_add(*value);
            }
        }
        self.blob_count += 1;
    }

    pub fn add_segments<'a, I>(&mut self, segments: I)
    where
        I: IntoIterator<Item = &'a StationarySegment>,
    {
        for segment in segments {
            self.add_segment(segment);
        }
    }

    /// Folds another accumulator of the same frame size into this one.
    pub fn merge(&mut self, other: &HeatmapAccumulator) -> AnalyticsResult<()> {
        if other.width != self.width || other.height != self.height {
            return Err(AnalyticsError::invalid_parameter(
                "heatmap.frame_size",
                format!(
                    "cannot merge {}x{} into {}x{}",
                    other.width, other.height, self.width, self.height
                ),
            ));
        }
        for (cell, value) in self.sums.iter_mut().zip(&other.sums) {
            *cell = cell.saturating_add(*value);
        }
        self.blob_count += other.blob_count;
        Ok(())
    }

    /// Clamps the sums into the final grid.
    pub fn finish(&self) -> HeatmapGrid {
        let max_intensity = self.config.peak_intensity;
        HeatmapGrid {
            width: self.width,
            height: self.height,
            max_intensity,
            cells: self.sums.iter().map(|&v| v.min(max_intensity)).collect(),
        }
    }

    fn paint_blob(&self, segment: &StationarySegment) -> Option<BlobScratch> {
        let rings = self.ring_count_for(segment.duration);
        if rings == 0 {
            return None;
        }

        let cx = segment.anchor.x as i64;
        let cy = segment.anchor.y as i64;
        let outer_radius = self.ring_radius(rings - 1);

        let x0 = (cx - outer_radius).max(0);
        let y0 = (cy - outer_radius).max(0);
        let x1 = (cx + outer_radius).min(self.width as i64 - 1);
        let y1 = (cy + outer_radius).min(self.height as i64 - 1);
        if x0 > x1 || y0 > y1 {
            // Entirely off-frame.
            return None;
        }

        let width = (x1 - x0 + 1) as usize;
        let height = (y1 - y0 + 1) as usize;
        let mut values = vec![0u32; width * height];

        for ring in (0..rings).rev() {
            let radius = self.ring_radius(ring);
            let intensity = self
                .config
                .peak_intensity
                .saturating_sub(self.intensity_step * ring as u32);
            let radius_sq = radius * radius;

            for y in (cy - radius).max(y0)..=(cy + radius).min(y1) {
                let dy = y - cy;
                let row = (y - y0) as usize * width;
                for x in (cx - radius).max(x0)..=(cx + radius).min(x1) {
                    let dx = x - cx;
                    if dx * dx + dy * dy <= radius_sq {
                        values[row + (x - x0) as usize] = intensity;
                    }
                }
            }
        }

        Some(BlobScratch {
            x0: x0 as u32,
            y0: y0 as u32,
            width: width as u32,
            values,
        })
    }

    fn ring_radius(&self, ring: usize) -> i64 {
        (ring as f64 * self.ring_step).floor() as i64
    }
}
