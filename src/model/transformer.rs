//! Mel-spectrogram diffusion transformer.
//!
//! A single-stream DiT with:
//! - Softmax self-attention with interleaved RoPE and an optional frame mask
//! - GELU(tanh) feed-forward
//! - AdaLN-Zero conditioning from the timestep embedding
//! - Optional long skip joining the pre-stack and post-stack state
//!
//! ## Config (base model)
//!
//! ```text
//! dim:          1024
//! depth:        22
//! heads:        16
//! dim_head:     64
//! ff_mult:      2
//! mel_dim:      100
//! text_dim:     512
//! conv_layers:  4
//! ```

pub mod attention;
pub mod dit;
pub mod feed_forward;
pub mod layers;
pub mod mask;
pub mod modulation;
pub mod rope;
pub mod timestep;

pub use dit::DiT;
