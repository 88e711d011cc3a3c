//! Absolute sinusoidal position table for the text refiner.
//!
//! The table is computed once at construction for `max_pos` positions;
//! lookups clamp to the last row instead of failing.

use candle_core::{Device, Result, Tensor};

/// Build a `[end, dim]` table laid out as `[cos(t·f) | sin(t·f)]` with
/// `f_i = 1 / theta^(2i/dim)` for `i < dim/2`.
pub fn precompute_freqs_cis(dim: usize, end: usize, theta: f64, device: &Device) -> Result<Tensor> {
    let half = dim / 2;
    let freqs: Vec<f32> = (0..half)
        .map(|i| (1.0 / theta.powf((2 * i) as f64 / dim as f64)) as f32)
        .collect();
    let freqs = Tensor::from_vec(freqs, (1, half), device)?;
    let t = Tensor::arange(0u32, end as u32, device)?
        .to_dtype(candle_core::DType::F32)?
        .reshape((end, 1))?;
    let angles = t.matmul(&freqs)?; // [end, half]
    Tensor::cat(&[&angles.cos()?, &angles.sin()?], 1)
}

/// Per-item position indices `start[b] + j` for `j in 0..length`, clamped
/// to `max_pos - 1`. Returns `[B, length]` u32.
pub fn get_pos_embed_indices(start: &Tensor, length: usize, max_pos: usize) -> Result<Tensor> {
    let device = start.device();
    let start = start.to_dtype(candle_core::DType::U32)?.unsqueeze(1)?;
    let offsets = Tensor::arange(0u32, length as u32, device)?.unsqueeze(0)?;
    start
        .broadcast_add(&offsets)?
        .minimum(max_pos.saturating_sub(1) as u32)
}
