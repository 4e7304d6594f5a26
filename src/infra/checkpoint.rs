// ============================================================
// Layer 2 — Checkpointing
// ============================================================
// Best-checkpoint retention: the tracker keeps exactly one saved
// model on disk, the one from the best validation metric so far.
// Every improvement first deletes the previous files, then saves
// the new snapshot tagged with the epoch number.
//
// Only model parameters are persisted (CompactRecorder). Optimizer
// state is not saved; resuming reinitialises momentum.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::{module::Module, prelude::*, record::CompactRecorder};

/// Prefix of every checkpoint file written by the tracker.
const CHECKPOINT_PREFIX: &str = "model.";

pub struct CheckpointTracker {
    dir:         PathBuf,
    best_metric: f64,
    /// Recorded as the epoch *before* the one whose snapshot is
    /// kept: the metric that triggers a save was measured on the
    /// previous epoch's state. Kept for compatibility with
    /// downstream tooling that reads the summary.
    best_epoch:  i64,
}

impl CheckpointTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self {
            dir,
            best_metric: f64::NEG_INFINITY,
            best_epoch: -1,
        })
    }

    /// Offer the current metric at an epoch boundary. Higher is
    /// better. On improvement the previous checkpoint files are
    /// deleted and the model is saved as `model.{epoch}`; returns
    /// whether a save happened.
    pub fn consider<B: Backend, M: Module<B>>(
        &mut self,
        epoch: usize,
        metric: f64,
        model: &M,
    ) -> Result<bool> {
        if metric <= self.best_metric {
            return Ok(false);
        }

        self.prune()?;
        let path = self.dir.join(format!("{CHECKPOINT_PREFIX}{epoch}"));
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|e| anyhow!("cannot save checkpoint '{}': {e}", path.display()))?;

        self.best_metric = metric;
        self.best_epoch = epoch as i64 - 1;
        tracing::info!(
            "New best metric {metric:.4} at epoch {epoch}; checkpoint saved to '{}'",
            path.display()
        );
        Ok(true)
    }

    fn prune(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("cannot list checkpoint dir '{}'", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(CHECKPOINT_PREFIX) {
                std::fs::remove_file(entry.path()).with_context(|| {
                    format!("cannot delete stale checkpoint '{}'", entry.path().display())
                })?;
            }
        }
        Ok(())
    }

    pub fn best_metric(&self) -> f64 {
        self.best_metric
    }

    pub fn best_epoch(&self) -> i64 {
        self.best_epoch
    }

    /// Persist the final (best_metric, best_epoch) pair as JSON.
    pub fn write_summary(&self) -> Result<PathBuf> {
        let path = self.dir.join("summary.json");
        let summary = serde_json::json!({
            "best_metric": self.best_metric,
            "best_epoch": self.best_epoch,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("cannot write summary '{}'", path.display()))?;
        Ok(path)
    }
}

/// Locate the checkpoint a previous run left behind, if any:
/// returns the epoch tag parsed back out of the file name and the
/// record stem the recorder expects. When several tagged files
/// exist the highest epoch wins.
pub fn find_checkpoint(dir: &Path) -> Result<Option<(usize, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("cannot list checkpoint dir '{}'", dir.display()))?;

    let mut found: Option<(usize, PathBuf)> = None;
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        let Some(tagged) = name.strip_prefix(CHECKPOINT_PREFIX) else {
            continue;
        };
        // "3.mpk" -> 3; anything unparseable is not a checkpoint.
        let Some(epoch) = tagged.split('.').next().and_then(|t| t.parse::<usize>().ok()) else {
            continue;
        };
        if found.as_ref().map_or(true, |(best, _)| epoch > *best) {
            found = Some((epoch, dir.join(format!("{CHECKPOINT_PREFIX}{epoch}"))));
        }
    }
    Ok(found)
}

/// Load parameters saved by the tracker into a freshly initialised
/// model of the same architecture.
pub fn load_model_file<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M> {
    model
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| anyhow!("cannot load checkpoint '{}': {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};

    type B = NdArray;

    fn model() -> Linear<B> {
        LinearConfig::new(4, 4).init(&Default::default())
    }

    fn checkpoint_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(CHECKPOINT_PREFIX))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn improvements_supersede_prior_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = CheckpointTracker::new(dir.path()).unwrap();
        let model = model();

        // Metric sequence 0.2, 0.5, 0.3, 0.9 over epochs 1..=4.
        assert!(tracker.consider(1, 0.2, &model).unwrap());
        assert!(tracker.consider(2, 0.5, &model).unwrap());
        assert!(!tracker.consider(3, 0.3, &model).unwrap());
        let mid = checkpoint_files(dir.path());
        assert_eq!(mid.len(), 1);
        assert!(mid[0].starts_with("model.2"));

        assert!(tracker.consider(4, 0.9, &model).unwrap());
        let after = checkpoint_files(dir.path());
        assert_eq!(after.len(), 1);
        assert!(after[0].starts_with("model.4"));

        assert_eq!(tracker.best_epoch(), 3);
        assert!((tracker.best_metric() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn summary_records_best_pair() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = CheckpointTracker::new(dir.path()).unwrap();
        tracker.consider(2, 0.7, &model()).unwrap();

        let path = tracker.write_summary().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["best_epoch"], 1);
        assert!((json["best_metric"].as_f64().unwrap() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn tracker_checkpoints_are_discoverable_for_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = CheckpointTracker::new(dir.path()).unwrap();
        tracker.consider(2, 0.5, &model()).unwrap();
        // summary.json must not be mistaken for a checkpoint.
        tracker.write_summary().unwrap();

        let (epoch, path) = find_checkpoint(dir.path()).unwrap().unwrap();
        assert_eq!(epoch, 2);
        assert!(load_model_file(model(), &path, &Default::default()).is_ok());

        let empty = tempfile::tempdir().unwrap();
        assert!(find_checkpoint(empty.path()).unwrap().is_none());
        assert!(find_checkpoint(&empty.path().join("missing")).unwrap().is_none());
    }

    #[test]
    fn saved_checkpoints_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = CheckpointTracker::new(dir.path()).unwrap();
        tracker.consider(1, 0.5, &model()).unwrap();

        let path = dir.path().join("model.1");
        let restored = load_model_file(model(), &path, &Default::default());
        assert!(restored.is_ok());
    }
}
