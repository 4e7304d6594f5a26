// ============================================================
// Layer 2 — Metrics Logging
// ============================================================
// One CSV row per epoch, append-only, written incrementally so a
// killed run still leaves usable history behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const HEADER: &str = "epoch,train_loss,val_loss,metric\n";

#[derive(Debug, Clone, Copy)]
pub struct EpochMetrics {
    pub epoch:      usize,
    pub train_loss: f64,
    pub val_loss:   f64,
    /// The model-selection metric for this epoch (validation loss
    /// or BLEU, depending on configuration).
    pub metric:     f64,
}

pub struct MetricsLogger {
    path: PathBuf,
}

impl MetricsLogger {
    /// Create (or truncate) the CSV file and write the header.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        std::fs::write(&path, HEADER)
            .with_context(|| format!("cannot create metrics file '{}'", path.display()))?;
        Ok(Self { path })
    }

    pub fn log(&self, metrics: &EpochMetrics) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("cannot open metrics file '{}'", self.path.display()))?;
        writeln!(
            file,
            "{},{:.6},{:.6},{:.6}",
            metrics.epoch, metrics.train_loss, metrics.val_loss, metrics.metric
        )
        .with_context(|| format!("cannot append to metrics file '{}'", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
