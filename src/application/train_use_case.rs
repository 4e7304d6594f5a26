// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Prepare working directory   (Layer 2 - infra)
//   Step 2: Load vocabulary             (Layer 3 - domain)
//   Step 3: Load datasets               (Layer 4 - data)
//   Step 4: Build model and losses      (Layer 5 - ml)
//   Step 5: Epoch loop                  (Layer 5 - ml)
//
// Checkpointing happens at every epoch boundary, including one
// final boundary after the last epoch, so an improvement measured
// on the final epoch is still retained. The tracker maximises its
// metric; when selecting on validation loss the loss is negated
// before it is offered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamConfig, Optimizer, SgdConfig},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::application::{default_device, EvalBackend, TrainBackend};
use crate::data::{DebiasBatch, DebiasBatcher, DebiasDataset};
use crate::domain::Vocab;
use crate::infra::{
    find_checkpoint, load_model_file, CheckpointTracker, EpochMetrics, MetricsLogger,
};
use crate::ml::{
    build_loss_fns, evaluate_loss, run_eval, train_epoch, DecodeOptions, EncoderDecoderConfig,
    Seq2SeqModel, TokenLoss, TrainLoopOptions,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run, loaded from a JSON file.
// A copy is written into the working directory so a finished run
// documents the exact settings that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub working_dir:          String,
    pub train_data:           String,
    pub eval_data:            String,
    pub vocab:                String,

    pub batch_size:           usize,
    pub max_len:              usize,
    pub epochs:               usize,
    pub learning_rate:        f64,
    pub optimizer:            OptimizerKind,
    pub max_norm:             f64,
    pub random_seed:          u64,

    /// Loss multiplier for bias-flagged tokens; 1.0 disables
    /// reweighting entirely.
    #[serde(default = "default_debias_weight")]
    pub debias_weight:        f64,

    #[serde(default = "default_batches_per_report")]
    pub batches_per_report:   usize,
    #[serde(default)]
    pub batches_per_sampling: usize,

    /// Select checkpoints on BLEU instead of validation loss.
    #[serde(default)]
    pub bleu:                 bool,
    /// First epoch at which BLEU selection kicks in; earlier
    /// epochs fall back to validation loss.
    #[serde(default = "default_bleu_start_epoch")]
    pub bleu_start_epoch:     usize,

    /// Process only this many batches per epoch. Doubles as an
    /// overfit smoke test: repeated epochs over the same few
    /// batches should drive the training loss toward zero.
    #[serde(default)]
    pub debug_batch_cap:      Option<usize>,

    #[serde(default = "default_d_model")]
    pub d_model:              usize,
    #[serde(default = "default_dropout")]
    pub dropout:              f64,
    #[serde(default = "default_beam_width")]
    pub beam_width:           usize,
}

fn default_debias_weight() -> f64 {
    1.0
}
fn default_batches_per_report() -> usize {
    100
}
fn default_bleu_start_epoch() -> usize {
    1
}
fn default_d_model() -> usize {
    128
}
fn default_dropout() -> f64 {
    0.1
}
fn default_beam_width() -> usize {
    1
}

/// Unrecognised optimizer names fail at config parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl TrainConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("cannot parse config '{}'", path.display()))
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        let device = default_device();
        TrainBackend::seed(cfg.random_seed);

        // ── Step 1: Working directory and config copy ─────────────────────────
        let working_dir = PathBuf::from(&cfg.working_dir);
        std::fs::create_dir_all(&working_dir)
            .with_context(|| format!("cannot create working dir '{}'", working_dir.display()))?;
        std::fs::write(
            working_dir.join("config.json"),
            serde_json::to_string_pretty(cfg)?,
        )
        .context("cannot write config copy into working dir")?;

        // ── Step 2: Vocabulary ────────────────────────────────────────────────
        let vocab = Vocab::from_file(&cfg.vocab)?;
        tracing::info!("Vocabulary: {} tokens", vocab.len());

        // ── Step 3: Datasets and loaders ──────────────────────────────────────
        // The validation loader runs on the bare backend: no autodiff
        // bookkeeping is needed for loss reporting or decoding.
        let train_dataset = DebiasDataset::from_file(&cfg.train_data)?;
        let eval_dataset = DebiasDataset::from_file(&cfg.eval_data)?;

        let train_loader: Arc<dyn DataLoader<DebiasBatch<TrainBackend>>> =
            DataLoaderBuilder::new(DebiasBatcher::<TrainBackend>::new(device.clone()))
                .batch_size(cfg.batch_size)
                .shuffle(cfg.random_seed)
                .build(train_dataset);
        let val_loader: Arc<dyn DataLoader<DebiasBatch<EvalBackend>>> =
            DataLoaderBuilder::new(DebiasBatcher::<EvalBackend>::new(device.clone()))
                .batch_size(cfg.batch_size)
                .build(eval_dataset);

        // ── Step 4: Model, losses, trackers ───────────────────────────────────
        // A checkpoint left in the working dir by an earlier run is
        // picked up and training continues from its epoch tag. Only
        // parameters are restored; optimizer momentum restarts.
        let mut model = EncoderDecoderConfig::new(vocab.len())
            .with_d_model(cfg.d_model)
            .with_dropout(cfg.dropout)
            .init::<TrainBackend>(&device);
        let mut start_epoch = 0;
        if let Some((epoch, path)) = find_checkpoint(&working_dir)? {
            tracing::info!("Resuming from checkpoint '{}' (epoch {epoch})", path.display());
            model = load_model_file(model, &path, &device)?;
            start_epoch = epoch;
        }
        let (primary_loss, plain_loss) =
            build_loss_fns(vocab.len(), vocab.pad_id(), cfg.debias_weight);

        let mut tracker = CheckpointTracker::new(&working_dir)?;
        let metrics = MetricsLogger::create(working_dir.join("stats.csv"))?;

        // ── Step 5: Epoch loop, optimizer chosen by config ────────────────────
        match cfg.optimizer {
            OptimizerKind::Adam => self.run_epochs(
                model,
                AdamConfig::new().init(),
                start_epoch,
                &primary_loss,
                &plain_loss,
                &train_loader,
                &val_loader,
                &vocab,
                &mut tracker,
                &metrics,
                &working_dir,
                &device,
            ),
            OptimizerKind::Sgd => self.run_epochs(
                model,
                SgdConfig::new().init(),
                start_epoch,
                &primary_loss,
                &plain_loss,
                &train_loader,
                &val_loader,
                &vocab,
                &mut tracker,
                &metrics,
                &working_dir,
                &device,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_epochs<M, O>(
        &self,
        mut model: M,
        mut optim: O,
        start_epoch: usize,
        primary_loss: &TokenLoss,
        plain_loss: &TokenLoss,
        train_loader: &Arc<dyn DataLoader<DebiasBatch<TrainBackend>>>,
        val_loader: &Arc<dyn DataLoader<DebiasBatch<EvalBackend>>>,
        vocab: &Vocab,
        tracker: &mut CheckpointTracker,
        metrics: &MetricsLogger,
        working_dir: &Path,
        device: &<TrainBackend as Backend>::Device,
    ) -> Result<()>
    where
        M: AutodiffModule<TrainBackend> + Seq2SeqModel<TrainBackend>,
        M::InnerModule: Seq2SeqModel<EvalBackend>,
        O: Optimizer<M, TrainBackend>,
    {
        let cfg = &self.config;
        let loop_opts = TrainLoopOptions {
            learning_rate:        cfg.learning_rate,
            max_norm:             cfg.max_norm,
            batches_per_report:   cfg.batches_per_report,
            batches_per_sampling: cfg.batches_per_sampling,
            debug_batch_cap:      cfg.debug_batch_cap,
        };
        let decode_opts = DecodeOptions {
            start_id:         vocab.start_id(),
            end_id:           vocab.end_id(),
            pad_id:           vocab.pad_id(),
            max_len:          cfg.max_len,
            beam_width:       cfg.beam_width,
            length_normalize: false,
        };

        let mut step = 0usize;
        let mut cur_metric = f64::NEG_INFINITY;

        for epoch in start_epoch..cfg.epochs {
            // The metric measured on the previous epoch's state
            // decides whether that state is snapshot before this
            // epoch overwrites it.
            tracker.consider(epoch, cur_metric, &model)?;

            let (updated, losses) = train_epoch(
                model,
                &mut optim,
                primary_loss,
                train_loader,
                &loop_opts,
                &decode_opts,
                vocab,
                epoch,
                &mut step,
                device,
            )?;
            model = updated;
            let train_loss = if losses.is_empty() {
                0.0
            } else {
                losses.iter().sum::<f64>() / losses.len() as f64
            };

            let valid = model.valid();
            let val_loss =
                evaluate_loss(&valid, val_loader, plain_loss, cfg.debug_batch_cap)?;

            cur_metric = if cfg.bleu && epoch >= cfg.bleu_start_epoch {
                let out = working_dir.join(format!("eval.{epoch}.txt"));
                run_eval(
                    &valid,
                    val_loader,
                    vocab,
                    &out,
                    &decode_opts,
                    device,
                    cfg.debug_batch_cap,
                )?
                .bleu
            } else {
                -val_loss
            };

            tracing::info!(
                "Epoch {epoch}: train loss {train_loss:.4}, val loss {val_loss:.4}, metric {cur_metric:.4}"
            );
            metrics.log(&EpochMetrics { epoch, train_loss, val_loss, metric: cur_metric })?;
        }

        // Final boundary: the last epoch's metric gets the same
        // chance to snapshot as every earlier one.
        tracker.consider(cfg.epochs, cur_metric, &model)?;
        tracker.write_summary()?;
        tracing::info!(
            "Training complete: best metric {:.4} (epoch {})",
            tracker.best_metric(),
            tracker.best_epoch()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::domain::vocab::{END_TOKEN, PAD_TOKEN, START_TOKEN};
    use crate::domain::DebiasSample;

    fn tiny_sample(tok: i64) -> DebiasSample {
        DebiasSample {
            src_ids: vec![1, tok, 2, 0],
            src_mask: vec![1, 1, 1, 0],
            src_len: 3,
            dec_in_ids: vec![1, tok, 2],
            dec_out_ids: vec![tok, 2, 0],
            src_tok_labels: vec![0; 4],
            tgt_tok_labels: vec![0; 3],
            tok_dist: vec![0.0; 4],
            replace_id: 0,
            type_id: 0,
        }
    }

    fn tiny_run_config(dir: &std::path::Path) -> TrainConfig {
        let vocab: HashMap<String, i64> = [
            (PAD_TOKEN.to_string(), 0),
            (START_TOKEN.to_string(), 1),
            (END_TOKEN.to_string(), 2),
            ("their".to_string(), 3),
            ("views".to_string(), 4),
            ("are".to_string(), 5),
        ]
        .into_iter()
        .collect();
        let vocab_path = dir.join("vocab.json");
        std::fs::write(&vocab_path, serde_json::to_string(&vocab).unwrap()).unwrap();

        let samples: Vec<DebiasSample> = (0..4).map(|i| tiny_sample(3 + i % 3)).collect();
        let data_path = dir.join("data.json");
        std::fs::write(&data_path, serde_json::to_string(&samples).unwrap()).unwrap();

        TrainConfig {
            working_dir:          dir.join("run").to_string_lossy().into_owned(),
            train_data:           data_path.to_string_lossy().into_owned(),
            eval_data:            data_path.to_string_lossy().into_owned(),
            vocab:                vocab_path.to_string_lossy().into_owned(),
            batch_size:           2,
            max_len:              8,
            epochs:               1,
            learning_rate:        0.05,
            optimizer:            OptimizerKind::Sgd,
            max_norm:             3.0,
            random_seed:          7,
            debias_weight:        1.0,
            batches_per_report:   0,
            batches_per_sampling: 0,
            bleu:                 false,
            bleu_start_epoch:     1,
            debug_batch_cap:      Some(1),
            d_model:              8,
            dropout:              0.0,
            beam_width:           1,
        }
    }

    #[test]
    fn second_run_resumes_from_the_saved_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_run_config(dir.path());
        let run_dir = std::path::PathBuf::from(&config.working_dir);

        // First run trains epoch 0 and snapshots at the final
        // boundary as model.1.
        TrainUseCase::new(config.clone()).execute().unwrap();
        let (epoch, _) = find_checkpoint(&run_dir).unwrap().unwrap();
        assert_eq!(epoch, 1);

        // Second run with a larger epoch count picks the snapshot
        // up and trains only the remaining epoch: the fresh metrics
        // file starts at epoch 1, not 0.
        let extended = TrainConfig { epochs: 2, ..config };
        TrainUseCase::new(extended).execute().unwrap();

        let stats = std::fs::read_to_string(run_dir.join("stats.csv")).unwrap();
        let lines: Vec<&str> = stats.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("1,"));
        assert!(find_checkpoint(&run_dir).unwrap().is_some());
    }

    #[test]
    fn optimizer_names_parse_case_sensitively() {
        assert_eq!(
            serde_json::from_str::<OptimizerKind>("\"adam\"").unwrap(),
            OptimizerKind::Adam
        );
        assert_eq!(
            serde_json::from_str::<OptimizerKind>("\"sgd\"").unwrap(),
            OptimizerKind::Sgd
        );
        assert!(serde_json::from_str::<OptimizerKind>("\"rmsprop\"").is_err());
    }

    #[test]
    fn config_defaults_fill_optional_fields() {
        let cfg: TrainConfig = serde_json::from_str(
            r#"{
                "working_dir": "runs/demo",
                "train_data": "data/train.json",
                "eval_data": "data/eval.json",
                "vocab": "data/vocab.json",
                "batch_size": 16,
                "max_len": 50,
                "epochs": 3,
                "learning_rate": 0.0003,
                "optimizer": "adam",
                "max_norm": 3.0,
                "random_seed": 7
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.debias_weight, 1.0);
        assert_eq!(cfg.batches_per_report, 100);
        assert_eq!(cfg.batches_per_sampling, 0);
        assert!(!cfg.bleu);
        assert_eq!(cfg.bleu_start_epoch, 1);
        assert_eq!(cfg.beam_width, 1);
        assert_eq!(cfg.debug_batch_cap, None);
    }
}
