// ============================================================
// Layer 5 — Decoding Driver
// ============================================================
// Autoregressive generation on top of any Seq2SeqModel. The model
// only exposes a teacher-forced forward pass, so each step re-runs
// the forward over the current prefix and reads the last position.
//
// Two strategies share one entry point:
//   - greedy (beam_width <= 1): whole batch at once, argmax per step
//   - beam search: one example at a time, beam_width hypotheses
//
// Returned sequences exclude the seeding start token; generation
// stops at the end token or at the length cap.

use anyhow::{anyhow, Result};
use burn::prelude::*;

use crate::data::DebiasBatch;
use crate::ml::model::Seq2SeqModel;

/// Generation never runs longer than the batch's longest source
/// plus this margin, whatever the configured cap says.
pub const LENGTH_MARGIN: usize = 10;

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub start_id:         i64,
    pub end_id:           i64,
    pub pad_id:           i64,
    pub max_len:          usize,
    pub beam_width:       usize,
    pub length_normalize: bool,
}

/// Decode every row of `batch` into a token id sequence.
pub fn decode_batch<B: Backend, M: Seq2SeqModel<B>>(
    model: &M,
    batch: &DebiasBatch<B>,
    opts: &DecodeOptions,
    device: &B::Device,
) -> Result<Vec<Vec<i64>>> {
    let src_lens = to_i64_vec(batch.src_lens.clone())?;
    let longest_src = src_lens.iter().copied().max().unwrap_or(0) as usize;
    let max_len = opts.max_len.min(longest_src + LENGTH_MARGIN);

    if opts.beam_width <= 1 {
        decode_greedy(model, batch, opts, max_len, device)
    } else {
        let batch_size = batch.src_ids.dims()[0];
        let mut outputs = Vec::with_capacity(batch_size);
        for row in 0..batch_size {
            outputs.push(decode_beam(model, &batch_row(batch, row), opts, max_len, device)?);
        }
        Ok(outputs)
    }
}

fn decode_greedy<B: Backend, M: Seq2SeqModel<B>>(
    model: &M,
    batch: &DebiasBatch<B>,
    opts: &DecodeOptions,
    max_len: usize,
    device: &B::Device,
) -> Result<Vec<Vec<i64>>> {
    let batch_size = batch.src_ids.dims()[0];
    let mut prefixes: Vec<Vec<i64>> = vec![vec![opts.start_id]; batch_size];
    let mut done = vec![false; batch_size];

    while done.iter().any(|&d| !d) && prefixes[0].len() <= max_len {
        let step_logits = last_position_logits(model, batch, &prefixes, device)?;

        for (row, logits) in step_logits.iter().enumerate() {
            if done[row] {
                // Finished rows keep a rectangular prefix tensor.
                prefixes[row].push(opts.pad_id);
                continue;
            }
            let token = argmax(logits);
            prefixes[row].push(token);
            if token == opts.end_id {
                done[row] = true;
            }
        }
    }

    Ok(prefixes
        .into_iter()
        .map(|prefix| strip_prefix(prefix, opts))
        .collect())
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<i64>,
    score:  f64,
    done:   bool,
}

impl Beam {
    fn final_score(&self, length_normalize: bool) -> f64 {
        // The seeding start token carries no probability mass.
        let generated = (self.tokens.len() - 1).max(1) as f64;
        if length_normalize {
            self.score / generated
        } else {
            self.score
        }
    }
}

fn decode_beam<B: Backend, M: Seq2SeqModel<B>>(
    model: &M,
    example: &DebiasBatch<B>,
    opts: &DecodeOptions,
    max_len: usize,
    device: &B::Device,
) -> Result<Vec<i64>> {
    let mut beams = vec![Beam { tokens: vec![opts.start_id], score: 0.0, done: false }];

    loop {
        let longest_active = beams
            .iter()
            .filter(|b| !b.done)
            .map(|b| b.tokens.len())
            .max();
        let proceed = match longest_active {
            Some(len) => len <= max_len,
            None => false,
        };
        if !proceed {
            break;
        }

        let mut candidates: Vec<Beam> = Vec::with_capacity(beams.len() * opts.beam_width);

        for beam in &beams {
            if beam.done {
                candidates.push(beam.clone());
                continue;
            }
            let prefixes = vec![beam.tokens.clone()];
            let logits = last_position_logits(model, example, &prefixes, device)?;
            let log_probs = log_softmax_host(&logits[0]);

            // Per-beam shortlist before the global cut.
            let mut ranked: Vec<(i64, f64)> = log_probs
                .iter()
                .enumerate()
                .map(|(tok, &lp)| (tok as i64, lp))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

            for &(token, lp) in ranked.iter().take(opts.beam_width) {
                let mut tokens = beam.tokens.clone();
                tokens.push(token);
                candidates.push(Beam {
                    tokens,
                    score: beam.score + lp,
                    done: token == opts.end_id,
                });
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(opts.beam_width);
        beams = candidates;
    }

    // Prefer a hypothesis that actually terminated; fall back to the
    // best unfinished one when nothing reached the end token.
    let winner = beams
        .iter()
        .filter(|b| b.done)
        .chain(beams.iter())
        .max_by(|a, b| {
            (a.done, a.final_score(opts.length_normalize))
                .partial_cmp(&(b.done, b.final_score(opts.length_normalize)))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or_else(|| anyhow!("beam search produced no hypotheses"))?;

    Ok(strip_prefix(winner.tokens.clone(), opts))
}

/// One forward pass over the current prefixes; returns the
/// last-position logits row per batch element.
fn last_position_logits<B: Backend, M: Seq2SeqModel<B>>(
    model: &M,
    batch: &DebiasBatch<B>,
    prefixes: &[Vec<i64>],
    device: &B::Device,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = prefixes.len();
    let cur_len = prefixes[0].len();

    let flat: Vec<i64> = prefixes.iter().flatten().copied().collect();
    let dec_in = Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device)
        .reshape([batch_size, cur_len]);

    let (logits, _) = model.forward(
        batch.src_ids.clone(),
        dec_in,
        batch.src_mask.clone(),
        batch.src_lens.clone(),
        batch.tok_dist.clone(),
        batch.type_ids.clone(),
    );

    let [_, _, vocab] = logits.dims();
    let last = logits
        .slice([0..batch_size, (cur_len - 1)..cur_len, 0..vocab])
        .reshape([batch_size * vocab]);
    let flat = to_f32_vec(last)?;

    Ok(flat.chunks(vocab).map(|row| row.to_vec()).collect())
}

fn batch_row<B: Backend>(batch: &DebiasBatch<B>, row: usize) -> DebiasBatch<B> {
    let [_, src_len] = batch.src_ids.dims();
    let [_, tgt_len] = batch.dec_in_ids.dims();
    let r = row..row + 1;

    DebiasBatch {
        src_ids: batch.src_ids.clone().slice([r.clone(), 0..src_len]),
        src_mask: batch.src_mask.clone().slice([r.clone(), 0..src_len]),
        src_lens: batch.src_lens.clone().slice([r.clone()]),
        dec_in_ids: batch.dec_in_ids.clone().slice([r.clone(), 0..tgt_len]),
        dec_out_ids: batch.dec_out_ids.clone().slice([r.clone(), 0..tgt_len]),
        src_tok_labels: batch.src_tok_labels.clone().slice([r.clone(), 0..src_len]),
        tgt_tok_labels: batch.tgt_tok_labels.clone().slice([r.clone(), 0..tgt_len]),
        tok_dist: batch.tok_dist.clone().slice([r.clone(), 0..src_len]),
        replace_ids: batch.replace_ids.clone().slice([r.clone()]),
        type_ids: batch.type_ids.clone().slice([r]),
    }
}

/// Drop the seeding start token and anything after the end token.
fn strip_prefix(mut tokens: Vec<i64>, opts: &DecodeOptions) -> Vec<i64> {
    tokens.remove(0);
    if let Some(end) = tokens.iter().position(|&t| t == opts.end_id) {
        tokens.truncate(end + 1);
    }
    tokens
}

fn argmax(logits: &[f32]) -> i64 {
    let mut best = 0usize;
    for (i, &x) in logits.iter().enumerate() {
        if x > logits[best] {
            best = i;
        }
    }
    best as i64
}

fn log_softmax_host(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f32::MIN, f32::max) as f64;
    let log_z = logits
        .iter()
        .map(|&x| (x as f64 - max).exp())
        .sum::<f64>()
        .ln()
        + max;
    logits.iter().map(|&x| x as f64 - log_z).collect()
}

pub(crate) fn to_i64_vec<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow!("cannot read int tensor: {e:?}"))
}

pub(crate) fn to_f32_vec<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read float tensor: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::data::dataloader::batcher::Batcher;
    use burn::tensor::activation::softmax;

    use crate::data::DebiasBatcher;
    use crate::domain::DebiasSample;

    type B = NdArray;

    const VOCAB: usize = 8;
    const START: i64 = 1;
    const END: i64 = 2;

    fn opts(beam_width: usize) -> DecodeOptions {
        DecodeOptions {
            start_id: START,
            end_id: END,
            pad_id: 0,
            max_len: 20,
            beam_width,
            length_normalize: false,
        }
    }

    fn test_batch(rows: usize) -> DebiasBatch<B> {
        let samples: Vec<DebiasSample> = (0..rows)
            .map(|i| DebiasSample {
                src_ids: vec![START, 3 + i as i64, END, 0],
                src_mask: vec![1, 1, 1, 0],
                src_len: 3,
                dec_in_ids: vec![START, 3, END],
                dec_out_ids: vec![3, END, 0],
                src_tok_labels: vec![0; 4],
                tgt_tok_labels: vec![0; 3],
                tok_dist: vec![0.0; 4],
                replace_id: 0,
                type_id: 0,
            })
            .collect();
        DebiasBatcher::<B>::new(Default::default()).batch(samples)
    }

    /// Deterministic stub: the next token is a fixed function of the
    /// previous one. `succ[t] = u` makes the model continue t with u.
    struct SuccessorModel {
        succ: Vec<i64>,
    }

    impl Seq2SeqModel<B> for SuccessorModel {
        fn forward(
            &self,
            _src_ids: Tensor<B, 2, Int>,
            dec_in_ids: Tensor<B, 2, Int>,
            _src_mask: Tensor<B, 2, Int>,
            _src_lens: Tensor<B, 1, Int>,
            _tok_dist: Tensor<B, 2>,
            _type_ids: Tensor<B, 1, Int>,
        ) -> (Tensor<B, 3>, Tensor<B, 3>) {
            let [batch, seq] = dec_in_ids.dims();
            let prev: Vec<i64> = dec_in_ids
                .into_data()
                .convert::<i64>()
                .to_vec::<i64>()
                .unwrap();

            let mut flat = vec![0.0f32; batch * seq * VOCAB];
            for (pos, &tok) in prev.iter().enumerate() {
                let favoured = self.succ[tok as usize] as usize;
                flat[pos * VOCAB + favoured] = 10.0;
            }
            let logits = Tensor::<B, 1>::from_floats(flat.as_slice(), &Default::default())
                .reshape([batch, seq, VOCAB]);
            let probs = softmax(logits.clone(), 2);
            (logits, probs)
        }
    }

    fn eos_everywhere() -> SuccessorModel {
        SuccessorModel { succ: vec![END; VOCAB] }
    }

    #[test]
    fn immediate_end_token_gives_length_one_outputs() {
        let outputs =
            decode_batch(&eos_everywhere(), &test_batch(3), &opts(1), &Default::default())
                .unwrap();
        assert_eq!(outputs, vec![vec![END], vec![END], vec![END]]);
    }

    #[test]
    fn greedy_follows_the_argmax_chain() {
        // START -> 4 -> 5 -> END
        let mut succ = vec![END; VOCAB];
        succ[START as usize] = 4;
        succ[4] = 5;
        succ[5] = END;
        let model = SuccessorModel { succ };

        let outputs = decode_batch(&model, &test_batch(2), &opts(1), &Default::default()).unwrap();
        assert_eq!(outputs, vec![vec![4, 5, END], vec![4, 5, END]]);
    }

    #[test]
    fn beam_width_one_matches_greedy() {
        let mut succ = vec![END; VOCAB];
        succ[START as usize] = 6;
        succ[6] = 7;
        succ[7] = END;
        let model = SuccessorModel { succ };
        let batch = test_batch(2);

        let greedy = decode_batch(&model, &batch, &opts(1), &Default::default()).unwrap();
        let beam = {
            // Width 2 on a deterministic model still finds the chain.
            decode_batch(&model, &batch, &opts(2), &Default::default()).unwrap()
        };
        assert_eq!(greedy, beam);
        assert_eq!(greedy[0], vec![6, 7, END]);
    }

    #[test]
    fn generation_respects_the_length_cap() {
        // START -> 3 -> 3 -> 3 ... never emits END.
        let mut succ = vec![3i64; VOCAB];
        succ[START as usize] = 3;
        let model = SuccessorModel { succ };

        let batch = test_batch(1);
        let outputs = decode_batch(&model, &batch, &opts(1), &Default::default()).unwrap();
        // Longest source is 3 tokens, so the cap is 3 + LENGTH_MARGIN.
        assert_eq!(outputs[0].len(), 3 + LENGTH_MARGIN);
        assert!(outputs[0].iter().all(|&t| t == 3));
    }
}
