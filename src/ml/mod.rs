// ============================================================
// Layer 5 — Machine Learning Core
// ============================================================
// Everything that touches tensors lives here:
//   - model:     the Seq2SeqModel trait and the bundled
//                encoder-decoder implementation
//   - loss:      pad-masked and bias-reweighted cross-entropy
//   - trainer:   epoch loop with global-norm gradient clipping
//   - decoder:   greedy and beam-search generation
//   - evaluator: dataset decoding, hit rate and BLEU
//   - bleu:      corpus-level BLEU statistics
//
// Reference: Burn Book §5 (Training and Inference)

pub mod bleu;
pub mod decoder;
pub mod evaluator;
pub mod loss;
pub mod model;
pub mod trainer;

pub use decoder::{decode_batch, DecodeOptions};
pub use evaluator::{evaluate_loss, run_eval, EvalSummary};
pub use loss::{build_loss_fns, TokenLoss};
pub use model::{EncoderDecoder, EncoderDecoderConfig, Seq2SeqModel};
pub use trainer::{clip_grad_norm, train_epoch, TrainLoopOptions};
