//! Conditioning encoders that run before the transformer stack.
//!
//! - [`text`] — token ids → frame-aligned text embedding
//! - [`input`] — noised audio + conditioning audio + text → fused sequence
//! - [`conv_position`] — convolutional positional bias for the fused sequence
//! - [`convnext`] — ConvNeXt-V2 text refinement blocks
//! - [`positions`] — sinusoidal position table for the text refiner

pub mod conv_position;
pub mod convnext;
pub mod input;
pub mod positions;
pub mod text;
