use std::path::Path;

use anyhow::{bail, Context, Result};
use burn::data::dataset::Dataset;

use crate::domain::DebiasSample;

/// In-memory dataset over pre-tokenised samples.
/// Loading validates the alignment invariants once, up front,
/// so the training loop can treat every batch as well-formed.
pub struct DebiasDataset {
    samples: Vec<DebiasSample>,
}

impl DebiasDataset {
    pub fn new(samples: Vec<DebiasSample>) -> Self {
        Self { samples }
    }

    /// Load a JSON array of samples and validate that all of them
    /// share the same padded source and target lengths. Batches are
    /// formed by simple stacking, so ragged files are rejected here
    /// rather than surfacing later as a tensor shape error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read dataset '{}'", path.display()))?;
        let samples: Vec<DebiasSample> = serde_json::from_str(&json)
            .with_context(|| format!("cannot parse dataset '{}'", path.display()))?;

        if samples.is_empty() {
            bail!("dataset '{}' contains no samples", path.display());
        }

        let src_len = samples[0].src_ids.len();
        let tgt_len = samples[0].dec_in_ids.len();
        for (i, sample) in samples.iter().enumerate() {
            if !sample.check_aligned() {
                bail!("sample {i} in '{}' has misaligned fields", path.display());
            }
            if sample.src_ids.len() != src_len || sample.dec_in_ids.len() != tgt_len {
                bail!(
                    "sample {i} in '{}' has padded length {}x{}, expected {src_len}x{tgt_len}",
                    path.display(),
                    sample.src_ids.len(),
                    sample.dec_in_ids.len(),
                );
            }
        }

        tracing::info!(
            "Loaded {} samples from '{}' (src len {src_len}, tgt len {tgt_len})",
            samples.len(),
            path.display()
        );
        Ok(Self::new(samples))
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Dataset<DebiasSample> for DebiasDataset {
    fn get(&self, index: usize) -> Option<DebiasSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
