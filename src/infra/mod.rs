// ============================================================
// Layer 2 — Infrastructure
// ============================================================
// Filesystem-facing support: checkpoint retention and per-epoch
// metrics history. Nothing in here touches tensors beyond saving
// and restoring module records.

pub mod checkpoint;
pub mod metrics;

pub use checkpoint::{find_checkpoint, load_model_file, CheckpointTracker};
pub use metrics::{EpochMetrics, MetricsLogger};
