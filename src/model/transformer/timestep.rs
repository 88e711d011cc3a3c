//! Sinusoidal timestep embedding for diffusion conditioning.
//!
//! `t [B] → sinusoidal [B, freq_embed_dim] → Linear → SiLU → Linear → [B, dim]`
//!
//! The result is the conditioning vector shared by every block's AdaLN and
//! the final modulation.

use candle_core::{DType, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

/// Timesteps are multiplied by this before the sinusoid, spreading `[0, 1]`
/// over many periods of the fastest frequency.
const TIME_SCALE: f64 = 1000.0;

#[derive(Debug, Clone)]
pub struct TimestepEmbedding {
    linear_1: nn::Linear,
    linear_2: nn::Linear,
    freq_embed_dim: usize,
}

impl TimestepEmbedding {
    /// - `dim`: output dimension (model dimension)
    /// - `freq_embed_dim`: width of the sinusoidal features (256)
    pub fn new(dim: usize, freq_embed_dim: usize, vb: VarBuilder) -> Result<Self> {
        let linear_1 = nn::linear(freq_embed_dim, dim, vb.pp("time_mlp.0"))?;
        let linear_2 = nn::linear(dim, dim, vb.pp("time_mlp.2"))?;
        Ok(Self {
            linear_1,
            linear_2,
            freq_embed_dim,
        })
    }

    /// Forward pass: t [B] → [B, dim].
    pub fn forward(&self, t: &Tensor) -> Result<Tensor> {
        let dtype = self.linear_1.weight().dtype();
        let t_freq = sinusoidal_embedding(t, self.freq_embed_dim, TIME_SCALE)?.to_dtype(dtype)?;
        t_freq
            .apply(&self.linear_1)?
            .silu()?
            .apply(&self.linear_2)
    }
}

/// Sinusoidal embedding `[B] → [B, dim]` laid out as `[sin | cos]`.
///
/// Frequencies are `exp(-ln(10000) · i / (dim/2 - 1))`, so the last
/// frequency is exactly `1/10000`.
pub fn sinusoidal_embedding(t: &Tensor, dim: usize, scale: f64) -> Result<Tensor> {
    let device = t.device();
    let half = dim / 2;
    let factor = 10_000f64.ln() / (half as f64 - 1.0);

    let freqs: Vec<f32> = (0..half)
        .map(|i| (-(factor * i as f64)).exp() as f32)
        .collect();
    let freqs = Tensor::new(freqs.as_slice(), device)?;

    // args = scale * t[:, None] * freqs[None, :]
    let args = (t.to_dtype(DType::F32)?.unsqueeze(1)? * scale)?.broadcast_mul(&freqs.unsqueeze(0)?)?;
    Tensor::cat(&[&args.sin()?, &args.cos()?], 1)
}
