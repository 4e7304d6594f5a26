// ============================================================
// Layer 3 — Domain Types
// ============================================================
// Pure data types shared by every other layer:
//   - Vocab:        token string ↔ integer id mapping
//   - DebiasSample: one aligned, padded training example
//
// No tensors here — everything in this layer is plain Rust so
// it can be (de)serialised and unit-tested without a backend.

pub mod sample;
pub mod vocab;

pub use sample::DebiasSample;
pub use vocab::Vocab;
