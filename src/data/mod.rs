// ============================================================
// Layer 4 — Data Access
// ============================================================
// Loads serialised samples from disk and turns them into
// device-ready tensor batches:
//   - dataset: Vec<DebiasSample> behind Burn's Dataset trait
//   - batcher: stacks samples into a DebiasBatch of tensors
//
// Reference: Burn Book §4 (Datasets and Batchers)

pub mod batcher;
pub mod dataset;

pub use batcher::{DebiasBatch, DebiasBatcher};
pub use dataset::DebiasDataset;
