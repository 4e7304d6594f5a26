// ============================================================
// Layer 5 — Training Loop
// ============================================================
// One epoch of teacher-forced training: forward, loss, backward,
// global-norm gradient clipping, optimizer step. The loop owns the
// model between steps (Burn optimizers consume and return it) and
// reports progress through tracing at a configurable cadence.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use burn::{
    data::dataloader::DataLoader,
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::DebiasBatch;
use crate::domain::Vocab;
use crate::ml::decoder::{decode_batch, DecodeOptions};
use crate::ml::loss::TokenLoss;
use crate::ml::model::Seq2SeqModel;

/// How many batch rows to decode when sampling predictions
/// mid-epoch.
const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone)]
pub struct TrainLoopOptions {
    pub learning_rate:        f64,
    pub max_norm:             f64,
    pub batches_per_report:   usize,
    pub batches_per_sampling: usize,
    /// Process only this many batches per epoch. A development
    /// switch for exercising the full pipeline quickly.
    pub debug_batch_cap:      Option<usize>,
}

/// Run one training epoch and return the updated model together
/// with the per-batch losses.
///
/// `step` is the global batch counter across epochs; it only
/// advances for batches that were actually processed.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch<B, M, O>(
    mut model: M,
    optim: &mut O,
    loss_fn: &TokenLoss,
    loader: &Arc<dyn DataLoader<DebiasBatch<B>>>,
    opts: &TrainLoopOptions,
    decode_opts: &DecodeOptions,
    vocab: &Vocab,
    epoch: usize,
    step: &mut usize,
    device: &B::Device,
) -> Result<(M, Vec<f64>)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Seq2SeqModel<B>,
    M::InnerModule: Seq2SeqModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    let mut losses: Vec<f64> = Vec::new();
    let mut last_grad_norm = 0.0;

    for batch in loader.iter() {
        if let Some(cap) = opts.debug_batch_cap {
            if losses.len() >= cap {
                continue;
            }
        }

        let (logits, _) = model.forward(
            batch.src_ids.clone(),
            batch.dec_in_ids.clone(),
            batch.src_mask.clone(),
            batch.src_lens.clone(),
            batch.tok_dist.clone(),
            batch.type_ids.clone(),
        );
        let loss = loss_fn.forward(
            logits,
            batch.dec_out_ids.clone(),
            Some(batch.tgt_tok_labels.clone()),
        );
        let loss_value: f64 = loss.clone().into_scalar().elem();

        let grads = loss.backward();
        let mut grads = GradientsParams::from_grads(grads, &model);
        last_grad_norm = clip_grad_norm(&model, &mut grads, opts.max_norm);
        model = optim.step(opts.learning_rate, model, grads);

        *step += 1;
        losses.push(loss_value);

        if opts.batches_per_report > 0 && losses.len() % opts.batches_per_report == 0 {
            let window = &losses[losses.len() - opts.batches_per_report..];
            let avg: f64 = window.iter().sum::<f64>() / window.len() as f64;
            tracing::info!(
                "Epoch {epoch} step {step}: loss {avg:.4} (grad norm {last_grad_norm:.3})"
            );
        }

        if opts.batches_per_sampling > 0 && losses.len() % opts.batches_per_sampling == 0 {
            sample_predictions(&model, &batch, decode_opts, vocab, device)?;
        }
    }

    Ok((model, losses))
}

/// Decode a few rows of the current batch and log them next to the
/// gold targets. Purely diagnostic, so both model and batch drop
/// to the inner backend first — no gradient graph is built.
fn sample_predictions<B, M>(
    model: &M,
    batch: &DebiasBatch<B>,
    decode_opts: &DecodeOptions,
    vocab: &Vocab,
    device: &B::Device,
) -> Result<()>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: Seq2SeqModel<B::InnerBackend>,
{
    let head = batch.narrow(SAMPLE_ROWS).valid();
    let predictions = decode_batch(&model.valid(), &head, decode_opts, device)?;
    let golds = rows_to_vecs(head.dec_out_ids.clone())?;

    for (pred, gold) in predictions.iter().zip(golds.iter()) {
        tracing::info!("PRED: {}", render(pred, vocab));
        tracing::info!("GOLD: {}", render(gold, vocab));
    }
    Ok(())
}

fn render(ids: &[i64], vocab: &Vocab) -> String {
    ids.iter()
        .filter(|&&id| id != vocab.pad_id())
        .map(|&id| vocab.token(id))
        .collect::<Vec<_>>()
        .join(" ")
}

fn rows_to_vecs<B: Backend>(tensor: Tensor<B, 2, Int>) -> Result<Vec<Vec<i64>>> {
    let [rows, cols] = tensor.dims();
    let flat = crate::ml::decoder::to_i64_vec(tensor.reshape([rows * cols]))?;
    Ok(flat.chunks(cols).map(|row| row.to_vec()).collect())
}

// ------------------------------------------------------------
// Global-norm gradient clipping
// ------------------------------------------------------------
// Two passes over the model's parameters: accumulate the squared
// L2 norm across every gradient tensor, then rescale each gradient
// in place when the total norm exceeds the limit. Returns the
// pre-clip norm so callers can report it.

pub fn clip_grad_norm<B, M>(model: &M, grads: &mut GradientsParams, max_norm: f64) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut accumulator = GradNorm::<B> {
        grads,
        sum_sq: 0.0,
        _backend: PhantomData,
    };
    model.visit(&mut accumulator);
    let norm = accumulator.sum_sq.sqrt();

    if norm > max_norm && norm > 0.0 {
        let mut scaler = GradScale::<B> {
            grads,
            scale: max_norm / norm,
            _backend: PhantomData,
        };
        model.visit(&mut scaler);
    }
    norm
}

struct GradNorm<'a, B: AutodiffBackend> {
    grads:    &'a GradientsParams,
    sum_sq:   f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let sq: f64 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.sum_sq += sq;
        }
    }
}

struct GradScale<'a, B: AutodiffBackend> {
    grads:    &'a mut GradientsParams,
    scale:    f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradScale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register(id, grad.mul_scalar(self.scale));
        }
    }
}
