pub mod track;
pub mod stationary;
pub mod heatmap;
pub mod energy;
pub mod movement;
pub mod clustering;
pub mod crowd_metrics;
pub mod stats;
