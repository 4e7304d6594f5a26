// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train` — runs a training run from a JSON config
//   2. `eval`  — evaluates a saved checkpoint
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvalArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "debiaser",
    version = "0.1.0",
    about = "Train and evaluate a seq2seq text debiasing model."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    /// This keeps the CLI layer thin — it only routes, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => Self::run_train(args),
            Commands::Eval(args) => Self::run_eval(args),
        }
    }

    fn run_train(args: TrainArgs) -> Result<()> {
        use crate::application::train_use_case::{TrainConfig, TrainUseCase};

        let mut config = TrainConfig::from_file(&args.config)?;
        if args.bleu {
            config.bleu = true;
        }
        tracing::info!(
            "Starting training run in '{}' ({} epochs)",
            config.working_dir,
            config.epochs
        );

        TrainUseCase::new(config).execute()?;
        println!("Training complete.");
        Ok(())
    }

    fn run_eval(args: EvalArgs) -> Result<()> {
        use crate::application::eval_use_case::EvalUseCase;
        use crate::application::train_use_case::TrainConfig;

        let config = TrainConfig::from_file(&args.config)?;
        let use_case = EvalUseCase::new(
            config,
            args.checkpoint.into(),
            args.output.clone().into(),
            args.beam_width,
            args.length_normalize,
        );

        let summary = use_case.execute()?;
        println!(
            "Evaluated {} examples: hit rate {:.4}, BLEU {:.2} (dump: {})",
            summary.total, summary.hit_rate, summary.bleu, args.output
        );
        Ok(())
    }
}
