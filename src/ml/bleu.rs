// ============================================================
// Layer 5 — BLEU Scorer
// ============================================================
// Corpus-level BLEU: per-sentence n-gram statistics are summed
// over the whole evaluation set and the score is computed once
// from the totals. This is NOT the mean of per-sentence BLEU
// scores — short sentences would dominate that average.
//
// Statistics vector layout (10 integers per sentence pair):
//   [0] hypothesis length
//   [1] reference length
//   [2..] for n = 1..4: (n-gram overlap count, n-gram total count)
//
// Reference: Papineni et al. (2002), "BLEU: a Method for
//            Automatic Evaluation of Machine Translation"

use std::collections::HashMap;
use std::hash::Hash;

/// Length pair plus 4x (overlap, total) for n = 1..4.
pub const BLEU_STATS_LEN: usize = 10;

fn ngram_counts<S: Eq + Hash>(tokens: &[S], n: usize) -> HashMap<&[S], u64> {
    let mut counts: HashMap<&[S], u64> = HashMap::new();
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Per-sentence BLEU statistics. Overlap counts are clipped: each
/// n-gram counts at most min(occurrences in hyp, occurrences in ref).
pub fn sentence_stats<S: Eq + Hash>(hypothesis: &[S], reference: &[S]) -> [u64; BLEU_STATS_LEN] {
    let mut stats = [0u64; BLEU_STATS_LEN];
    stats[0] = hypothesis.len() as u64;
    stats[1] = reference.len() as u64;

    for n in 1..=4 {
        let hyp_grams = ngram_counts(hypothesis, n);
        let ref_grams = ngram_counts(reference, n);

        let overlap: u64 = hyp_grams
            .iter()
            .map(|(gram, &count)| count.min(ref_grams.get(gram).copied().unwrap_or(0)))
            .sum();

        stats[2 * n] = overlap;
        stats[2 * n + 1] = (hypothesis.len() + 1).saturating_sub(n) as u64;
    }
    stats
}

/// BLEU in [0, 100] from accumulated statistics.
///
/// Any zero in the vector means some precision is undefined (or a
/// length is zero); the score is 0 in that case rather than an
/// error — a degenerate corpus is a bad score, not a crash.
pub fn corpus_bleu(stats: &[u64; BLEU_STATS_LEN]) -> f64 {
    if stats.iter().any(|&x| x == 0) {
        return 0.0;
    }

    let hyp_len = stats[0] as f64;
    let ref_len = stats[1] as f64;

    // Geometric mean of the four n-gram precisions.
    let log_precision: f64 = (1..=4)
        .map(|n| (stats[2 * n] as f64 / stats[2 * n + 1] as f64).ln())
        .sum::<f64>()
        / 4.0;

    // Brevity penalty: hypotheses shorter than the reference are
    // penalised; longer ones are not rewarded.
    let brevity = (1.0 - ref_len / hyp_len).min(0.0);

    100.0 * (brevity + log_precision).exp()
}

/// Corpus BLEU over aligned (hypothesis, reference) token lists:
/// statistics are summed elementwise across all pairs first.
pub fn aggregate<S: Eq + Hash>(hypotheses: &[Vec<S>], references: &[Vec<S>]) -> f64 {
    let mut totals = [0u64; BLEU_STATS_LEN];
    for (hyp, reference) in hypotheses.iter().zip(references.iter()) {
        let stats = sentence_stats(hyp, reference);
        for (total, stat) in totals.iter_mut().zip(stats.iter()) {
            *total += stat;
        }
    }
    corpus_bleu(&totals)
}
