//! Text-conditioned mel-spectrogram DiT in pure Rust.
//!
//! A candle-based implementation of the denoising backbone used by
//! flow-matching text-to-speech models. Given a noised mel-spectrogram, a
//! reference mel, text tokens and a diffusion timestep, it predicts the
//! same-shaped velocity (or noise) that an external sampler integrates.
//!
//! ## Architecture
//!
//! ```text
//! time ──→ sinusoidal + MLP ────────────────────────┐ t [B, D]
//!                                                   │
//! text ──→ shift_and_pad → Embedding → ConvNeXt ─┐  │
//!                                                ├→ concat → Linear → + ConvPos
//! x, cond [B, S, mel] ───────────────────────────┘          │
//!                                                            ↓
//!                              DiT blocks × depth (AdaLN-Zero, RoPE, mask)
//!                                                            ↓
//!                                 (long skip) → AdaLN final → Linear → [B, S, mel]
//! ```
//!
//! ## Modules
//!
//! - [`config`] — model configuration with serde defaults
//! - [`model`] — text/input encoders, transformer blocks, backbone
//!
//! Weights are read through a caller-supplied [`candle_nn::VarBuilder`], so
//! safetensors checkpoints, `VarMap`s and zero-initialized models all work
//! the same way.

pub mod config;
pub mod model;

mod error;

pub use config::DiTConfig;
pub use error::{Error, Result};
pub use model::transformer::DiT;
