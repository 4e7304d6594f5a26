// ============================================================
// Layer 5 — Loss Builder
// ============================================================
// Token-level cross-entropy over flattened (batch x position)
// logits, with two variants:
//
//   plain    — the padding class gets weight 0, so padded
//              positions contribute neither gradient nor
//              denominator; loss is invariant to extra padding.
//   weighted — per-token losses are scaled by
//              1 + (debias_weight - 1) * bias_flag before
//              averaging, and the mean runs over positions whose
//              scaled loss is nonzero (padding drops out of the
//              average entirely, it is not merely down-weighted).
//
// Selection rule: debias_weight == 1.0 makes the reweighting a
// no-op, so the plain variant is used. The plain variant is also
// always returned for reporting a comparable validation loss.

use burn::prelude::*;
use burn::tensor::activation::log_softmax;

#[derive(Debug, Clone)]
pub struct TokenLoss {
    vocab_size: usize,
    pad_id: i64,
    debias_weight: f64,
    weighted: bool,
}

impl TokenLoss {
    /// Pad-masked cross-entropy, mean over real tokens.
    pub fn plain(vocab_size: usize, pad_id: i64) -> Self {
        Self { vocab_size, pad_id, debias_weight: 1.0, weighted: false }
    }

    /// Bias-reweighted cross-entropy: flagged tokens are scaled by
    /// `debias_weight`, unflagged tokens keep weight 1.
    pub fn weighted(vocab_size: usize, pad_id: i64, debias_weight: f64) -> Self {
        Self { vocab_size, pad_id, debias_weight, weighted: true }
    }

    /// Scalar loss for a teacher-forced forward pass.
    ///
    /// `logits` is [batch, seq, vocab], `targets` is [batch, seq].
    /// `bias_flags` (same shape as `targets`, 1 = bias-relevant) is
    /// only consulted by the weighted variant.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 3>,
        targets: Tensor<B, 2, Int>,
        bias_flags: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 1> {
        let [batch, seq, vocab] = logits.dims();
        debug_assert_eq!(vocab, self.vocab_size);
        let n = batch * seq;

        let log_probs = log_softmax(logits.reshape([n, vocab]), 1);
        let targets = targets.reshape([n]);
        let nll = log_probs
            .gather(1, targets.clone().reshape([n, 1]))
            .reshape([n])
            .neg();

        // Weight 0 for the padding class, 1 for everything else.
        let pad_weight = targets.not_equal_elem(self.pad_id).float();

        if !self.weighted {
            return (nll * pad_weight.clone()).sum() / pad_weight.sum();
        }

        let flags = bias_flags
            .map(|f| f.reshape([n]).float())
            .unwrap_or_else(|| pad_weight.zeros_like());
        let tok_weight = flags * (self.debias_weight - 1.0) + 1.0;

        let per_tok = nll * pad_weight * tok_weight;

        // Mean over positions that actually contributed: padded
        // positions have exactly zero scaled loss and are excluded
        // from the denominator.
        let contributing = per_tok.clone().not_equal_elem(0.0).float();
        per_tok.sum() / contributing.sum()
    }
}

/// Loss pair for a run: (primary training loss, plain loss).
pub fn build_loss_fns(vocab_size: usize, pad_id: i64, debias_weight: f64) -> (TokenLoss, TokenLoss) {
    let plain = TokenLoss::plain(vocab_size, pad_id);
    let primary = if debias_weight == 1.0 {
        plain.clone()
    } else {
        TokenLoss::weighted(vocab_size, pad_id, debias_weight)
    };
    (primary, plain)
}
