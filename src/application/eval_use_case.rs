// ============================================================
// Layer 2 — EvalUseCase
// ============================================================
// Standalone evaluation of a saved checkpoint: rebuilds the model
// from the run's config, loads the parameters, decodes the eval
// set and reports hit rate and BLEU. Runs on the bare backend —
// no autodiff involved.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};

use crate::application::train_use_case::TrainConfig;
use crate::application::{default_device, EvalBackend};
use crate::data::{DebiasBatch, DebiasBatcher, DebiasDataset};
use crate::domain::Vocab;
use crate::infra::load_model_file;
use crate::ml::{run_eval, DecodeOptions, EncoderDecoderConfig, EvalSummary};

pub struct EvalUseCase {
    config:           TrainConfig,
    checkpoint:       PathBuf,
    output:           PathBuf,
    beam_width:       usize,
    length_normalize: bool,
}

impl EvalUseCase {
    pub fn new(
        config: TrainConfig,
        checkpoint: PathBuf,
        output: PathBuf,
        beam_width: usize,
        length_normalize: bool,
    ) -> Self {
        Self { config, checkpoint, output, beam_width, length_normalize }
    }

    pub fn execute(&self) -> Result<EvalSummary> {
        let cfg = &self.config;
        let device = default_device();

        let vocab = Vocab::from_file(&cfg.vocab)?;
        let dataset = DebiasDataset::from_file(&cfg.eval_data)?;
        let loader: Arc<dyn DataLoader<DebiasBatch<EvalBackend>>> =
            DataLoaderBuilder::new(DebiasBatcher::<EvalBackend>::new(device.clone()))
                .batch_size(cfg.batch_size)
                .build(dataset);

        // The architecture must match the training run exactly, so
        // it is rebuilt from the same config the run saved.
        let model = EncoderDecoderConfig::new(vocab.len())
            .with_d_model(cfg.d_model)
            .with_dropout(cfg.dropout)
            .init::<EvalBackend>(&device);
        let model = load_model_file(model, &self.checkpoint, &device)?;

        let decode_opts = DecodeOptions {
            start_id:         vocab.start_id(),
            end_id:           vocab.end_id(),
            pad_id:           vocab.pad_id(),
            max_len:          cfg.max_len,
            beam_width:       self.beam_width,
            length_normalize: self.length_normalize,
        };

        run_eval(
            &model,
            &loader,
            &vocab,
            &self.output,
            &decode_opts,
            &device,
            cfg.debug_batch_cap,
        )
    }
}
