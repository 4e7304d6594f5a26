// ============================================================
// Layer 5 — Model Interface
// ============================================================
// The training loop, decoder and evaluator only see the
// Seq2SeqModel trait: one teacher-forced forward pass producing
// per-position vocabulary logits. The EncoderDecoder below is the
// bundled implementation — a pooled-context model small enough to
// train on CPU — but anything with the same signature plugs in.

use burn::{
    nn::{
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, Gelu, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::softmax,
};

/// A sequence-to-sequence model under teacher forcing.
///
/// Returns `(logits, probs)`, both shaped [batch, tgt_len, vocab]:
/// position `t` scores the token that should follow `dec_in_ids[t]`.
/// `tok_dist` and `type_ids` are auxiliary per-sample signals that
/// implementations may ignore.
pub trait Seq2SeqModel<B: Backend> {
    #[allow(clippy::too_many_arguments)]
    fn forward(
        &self,
        src_ids: Tensor<B, 2, Int>,
        dec_in_ids: Tensor<B, 2, Int>,
        src_mask: Tensor<B, 2, Int>,
        src_lens: Tensor<B, 1, Int>,
        tok_dist: Tensor<B, 2>,
        type_ids: Tensor<B, 1, Int>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>);
}

#[derive(Config, Debug)]
pub struct EncoderDecoderConfig {
    pub vocab_size: usize,
    #[config(default = 128)]
    pub d_model: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl EncoderDecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderDecoder<B> {
        EncoderDecoder {
            src_embedding: EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            tgt_embedding: EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            fuse: LinearConfig::new(2 * self.d_model, self.d_model).init(device),
            out: LinearConfig::new(self.d_model, self.vocab_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Gelu::new(),
        }
    }
}

/// Mean-pooled encoder context concatenated onto each decoder
/// position, fused by a linear layer and projected to the
/// vocabulary.
#[derive(Module, Debug)]
pub struct EncoderDecoder<B: Backend> {
    src_embedding: Embedding<B>,
    tgt_embedding: Embedding<B>,
    fuse:          Linear<B>,
    out:           Linear<B>,
    dropout:       Dropout,
    activation:    Gelu,
}

impl<B: Backend> Seq2SeqModel<B> for EncoderDecoder<B> {
    fn forward(
        &self,
        src_ids: Tensor<B, 2, Int>,
        dec_in_ids: Tensor<B, 2, Int>,
        src_mask: Tensor<B, 2, Int>,
        src_lens: Tensor<B, 1, Int>,
        _tok_dist: Tensor<B, 2>,
        _type_ids: Tensor<B, 1, Int>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch, src_len] = src_ids.dims();
        let [_, tgt_len] = dec_in_ids.dims();
        let d = self.fuse.weight.val().dims()[1];

        // Masked mean-pool over the source: padded positions are
        // zeroed before the sum, then divided by the real length.
        let src_emb = self.src_embedding.forward(src_ids);
        let mask = src_mask
            .float()
            .reshape([batch, src_len, 1])
            .expand([batch, src_len, d]);
        let pooled = (src_emb * mask).sum_dim(1); // [batch, 1, d]
        let lens = src_lens
            .float()
            .clamp_min(1.0)
            .reshape([batch, 1, 1]);
        let context = (pooled / lens).expand([batch, tgt_len, d]);

        let tgt_emb = self.tgt_embedding.forward(dec_in_ids);
        let fused = self.fuse.forward(Tensor::cat(vec![tgt_emb, context], 2));
        let hidden = self.dropout.forward(self.activation.forward(fused));

        let logits = self.out.forward(hidden);
        let probs = softmax(logits.clone(), 2);
        (logits, probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    type B = NdArray;

    fn int_2d(rows: &[&[i64]]) -> Tensor<B, 2, Int> {
        let flat: Vec<i64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &Default::default())
            .reshape([rows.len(), rows[0].len()])
    }

    #[test]
    fn forward_shapes_and_normalised_probs() {
        let config = EncoderDecoderConfig::new(12).with_d_model(16);
        let model = config.init::<B>(&Default::default());

        let src_ids = int_2d(&[&[1, 5, 6, 0], &[1, 7, 0, 0]]);
        let src_mask = int_2d(&[&[1, 1, 1, 0], &[1, 1, 0, 0]]);
        let dec_in = int_2d(&[&[1, 5, 6], &[1, 7, 2]]);
        let src_lens =
            Tensor::<B, 1, Int>::from_ints([3i64, 2].as_slice(), &Default::default());
        let tok_dist = Tensor::<B, 2>::zeros([2, 4], &Default::default());
        let type_ids =
            Tensor::<B, 1, Int>::from_ints([0i64, 0].as_slice(), &Default::default());

        let (logits, probs) = model.forward(src_ids, dec_in, src_mask, src_lens, tok_dist, type_ids);
        assert_eq!(logits.dims(), [2, 3, 12]);
        assert_eq!(probs.dims(), [2, 3, 12]);

        // Each position's distribution sums to 1.
        let sums: Vec<f32> = probs
            .sum_dim(2)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap();
        for sum in sums {
            assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
        }
    }
}
