// ============================================================
// Layer 3 — Training Sample
// ============================================================
// One fully tokenised and padded example. Every field that is a
// sequence shares the padded length of its side (source or
// target); the mask marks real tokens vs padding.
//
// Decoder input is the target shifted right and prefixed with
// <s>; decoder output is the unshifted target ending in </s>.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebiasSample {
    /// Source token ids, padded — length = source seq len
    pub src_ids: Vec<i64>,

    /// 1 = real token, 0 = padding — same length as `src_ids`
    pub src_mask: Vec<i64>,

    /// Number of real (unpadded) source tokens
    pub src_len: i64,

    /// Decoder input ids: <s> + target[..n-1], padded
    pub dec_in_ids: Vec<i64>,

    /// Decoder target ids: target + </s>, padded — the ids the
    /// loss is computed against
    pub dec_out_ids: Vec<i64>,

    /// Per-token bias flag on the source side (1 = bias-relevant)
    pub src_tok_labels: Vec<i64>,

    /// Per-token bias flag on the target side; drives loss
    /// reweighting when debias_weight != 1.0
    pub tgt_tok_labels: Vec<i64>,

    /// Auxiliary per-source-token distribution signal, forwarded
    /// to the model unchanged
    pub tok_dist: Vec<f32>,

    /// Id of the single token the gold edit replaces
    pub replace_id: i64,

    /// Bias category id of the example
    pub type_id: i64,
}

impl DebiasSample {
    /// Check the internal alignment invariants: source-side
    /// sequences share one length, target-side sequences another.
    pub fn check_aligned(&self) -> bool {
        let s = self.src_ids.len();
        let t = self.dec_in_ids.len();
        self.src_mask.len() == s
            && self.src_tok_labels.len() == s
            && self.tok_dist.len() == s
            && self.dec_out_ids.len() == t
            && self.tgt_tok_labels.len() == t
            && (self.src_len as usize) <= s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_check_catches_ragged_fields() {
        let mut sample = DebiasSample {
            src_ids: vec![1, 3, 4, 2, 0],
            src_mask: vec![1, 1, 1, 1, 0],
            src_len: 4,
            dec_in_ids: vec![1, 3, 4, 0],
            dec_out_ids: vec![3, 4, 2, 0],
            src_tok_labels: vec![0, 1, 0, 0, 0],
            tgt_tok_labels: vec![0, 1, 0, 0],
            tok_dist: vec![0.0, 0.9, 0.1, 0.0, 0.0],
            replace_id: 4,
            type_id: 0,
        };
        assert!(sample.check_aligned());

        sample.tgt_tok_labels.pop();
        assert!(!sample.check_aligned());
    }
}
