// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one of two goals: training a
// debiasing model or evaluating a saved checkpoint.
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No argument parsing here (that's Layer 1)
//   - Only workflow coordination
//
// The backend is fixed at compile time: NdArray on CPU by default,
// Wgpu when the `wgpu` cargo feature is enabled. Training wraps the
// chosen backend in Autodiff; evaluation runs on the bare backend.

pub mod eval_use_case;
pub mod train_use_case;

#[cfg(not(feature = "wgpu"))]
pub type EvalBackend = burn::backend::NdArray;

#[cfg(feature = "wgpu")]
pub type EvalBackend = burn::backend::Wgpu;

pub type TrainBackend = burn::backend::Autodiff<EvalBackend>;

pub fn default_device() -> <EvalBackend as burn::prelude::Backend>::Device {
    Default::default()
}
