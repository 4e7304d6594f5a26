// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `eval`
// and all their configurable flags.
//
// Hyperparameters live in the JSON config file, not in flags; the
// CLI only takes the config path plus the few switches that vary
// between invocations of the same run.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a debiasing model from a JSON config
    Train(TrainArgs),

    /// Evaluate a saved checkpoint on the eval set
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Path to the training config (JSON)
    #[arg(long)]
    pub config: String,

    /// Select checkpoints on BLEU instead of validation loss,
    /// overriding the config file
    #[arg(long)]
    pub bleu: bool,
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Path to the config the checkpoint was trained with (JSON)
    #[arg(long)]
    pub config: String,

    /// Path to the checkpoint file to evaluate
    #[arg(long)]
    pub checkpoint: String,

    /// Where to write the per-example evaluation dump
    #[arg(long, default_value = "eval_output.txt")]
    pub output: String,

    /// Beam width for decoding; 1 means greedy
    #[arg(long, default_value_t = 1)]
    pub beam_width: usize,

    /// Rank finished beams by per-token score instead of total
    #[arg(long)]
    pub length_normalize: bool,
}
