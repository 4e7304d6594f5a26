// ============================================================
// Layer 4 — Debias Batcher
// ============================================================
// Implements Burn's Batcher trait to convert a Vec<DebiasSample>
// into tensors. All samples are pre-padded to a common length
// (validated at dataset load), so batching is flatten + reshape.

use burn::{
    data::dataloader::batcher::Batcher, prelude::*, tensor::backend::AutodiffBackend,
};

use crate::domain::DebiasSample;

/// A batch of aligned samples ready for the model forward pass.
/// Every sequence tensor has shape [batch, seq_len]; the mask
/// marks valid vs padded positions.
///
/// `src_tok_labels` is carried for diagnostics output only; the
/// training loop reads `tgt_tok_labels` for loss reweighting.
#[derive(Debug, Clone)]
pub struct DebiasBatch<B: Backend> {
    /// Source token ids — [batch, src_len]
    pub src_ids: Tensor<B, 2, Int>,

    /// Source attention mask, 1 = real token — [batch, src_len]
    pub src_mask: Tensor<B, 2, Int>,

    /// Unpadded source lengths — [batch]
    pub src_lens: Tensor<B, 1, Int>,

    /// Decoder input ids (<s>-prefixed) — [batch, tgt_len]
    pub dec_in_ids: Tensor<B, 2, Int>,

    /// Decoder target ids — [batch, tgt_len]
    pub dec_out_ids: Tensor<B, 2, Int>,

    /// Source-side bias flags — [batch, src_len]
    pub src_tok_labels: Tensor<B, 2, Int>,

    /// Target-side bias flags — [batch, tgt_len]
    pub tgt_tok_labels: Tensor<B, 2, Int>,

    /// Auxiliary per-source-token signal — [batch, src_len]
    pub tok_dist: Tensor<B, 2>,

    /// Gold replacement token id — [batch]
    pub replace_ids: Tensor<B, 1, Int>,

    /// Bias category id — [batch]
    pub type_ids: Tensor<B, 1, Int>,
}

impl<B: Backend> DebiasBatch<B> {
    /// First `count` rows of the batch, for sampling a few
    /// sequences during training without decoding the whole batch.
    pub fn narrow(&self, count: usize) -> Self {
        let [batch, src_len] = self.src_ids.dims();
        let [_, tgt_len] = self.dec_in_ids.dims();
        let n = count.min(batch);

        Self {
            src_ids: self.src_ids.clone().slice([0..n, 0..src_len]),
            src_mask: self.src_mask.clone().slice([0..n, 0..src_len]),
            src_lens: self.src_lens.clone().slice([0..n]),
            dec_in_ids: self.dec_in_ids.clone().slice([0..n, 0..tgt_len]),
            dec_out_ids: self.dec_out_ids.clone().slice([0..n, 0..tgt_len]),
            src_tok_labels: self.src_tok_labels.clone().slice([0..n, 0..src_len]),
            tgt_tok_labels: self.tgt_tok_labels.clone().slice([0..n, 0..tgt_len]),
            tok_dist: self.tok_dist.clone().slice([0..n, 0..src_len]),
            replace_ids: self.replace_ids.clone().slice([0..n]),
            type_ids: self.type_ids.clone().slice([0..n]),
        }
    }
}

impl<B: AutodiffBackend> DebiasBatch<B> {
    /// The same batch on the inner backend, for decoding and
    /// validation passes that need no gradient bookkeeping.
    pub fn valid(&self) -> DebiasBatch<B::InnerBackend> {
        DebiasBatch {
            src_ids: self.src_ids.clone().inner(),
            src_mask: self.src_mask.clone().inner(),
            src_lens: self.src_lens.clone().inner(),
            dec_in_ids: self.dec_in_ids.clone().inner(),
            dec_out_ids: self.dec_out_ids.clone().inner(),
            src_tok_labels: self.src_tok_labels.clone().inner(),
            tgt_tok_labels: self.tgt_tok_labels.clone().inner(),
            tok_dist: self.tok_dist.clone().inner(),
            replace_ids: self.replace_ids.clone().inner(),
            type_ids: self.type_ids.clone().inner(),
        }
    }
}

/// Holds the target device so tensors land on the right
/// backend; the device is threaded in explicitly at startup.
#[derive(Clone, Debug)]
pub struct DebiasBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> DebiasBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    fn int_2d(&self, rows: impl Iterator<Item = Vec<i64>>, cols: usize) -> Tensor<B, 2, Int> {
        let flat: Vec<i64> = rows.flatten().collect();
        let batch = flat.len() / cols;
        Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device).reshape([batch, cols])
    }
}

impl<B: Backend> Batcher<DebiasSample, DebiasBatch<B>> for DebiasBatcher<B> {
    fn batch(&self, items: Vec<DebiasSample>) -> DebiasBatch<B> {
        let batch = items.len();
        let src_len = items[0].src_ids.len();
        let tgt_len = items[0].dec_in_ids.len();

        let src_ids = self.int_2d(items.iter().map(|s| s.src_ids.clone()), src_len);
        let src_mask = self.int_2d(items.iter().map(|s| s.src_mask.clone()), src_len);
        let dec_in_ids = self.int_2d(items.iter().map(|s| s.dec_in_ids.clone()), tgt_len);
        let dec_out_ids = self.int_2d(items.iter().map(|s| s.dec_out_ids.clone()), tgt_len);
        let src_tok_labels =
            self.int_2d(items.iter().map(|s| s.src_tok_labels.clone()), src_len);
        let tgt_tok_labels =
            self.int_2d(items.iter().map(|s| s.tgt_tok_labels.clone()), tgt_len);

        let dist_flat: Vec<f32> = items.iter().flat_map(|s| s.tok_dist.clone()).collect();
        let tok_dist = Tensor::<B, 1>::from_floats(dist_flat.as_slice(), &self.device)
            .reshape([batch, src_len]);

        let src_lens: Vec<i64> = items.iter().map(|s| s.src_len).collect();
        let replace_ids: Vec<i64> = items.iter().map(|s| s.replace_id).collect();
        let type_ids: Vec<i64> = items.iter().map(|s| s.type_id).collect();

        DebiasBatch {
            src_ids,
            src_mask,
            src_lens: Tensor::<B, 1, Int>::from_ints(src_lens.as_slice(), &self.device),
            dec_in_ids,
            dec_out_ids,
            src_tok_labels,
            tgt_tok_labels,
            tok_dist,
            replace_ids: Tensor::<B, 1, Int>::from_ints(replace_ids.as_slice(), &self.device),
            type_ids: Tensor::<B, 1, Int>::from_ints(type_ids.as_slice(), &self.device),
        }
    }
}
