//! Rotary position embedding (RoPE).
//!
//! Interleaved-pair convention: each frequency covers two adjacent channels,
//! and the rotation maps the pair `(x1, x2)` to `(-x2, x1)`.
//!
//! The table is `head_dim` wide and is applied to the fused `[B, S, H*D]`
//! query/key projection before the head split: only the first `head_dim`
//! channels rotate, the rest pass through. Pretrained checkpoints depend on
//! this placement.
//!
//! The table depends only on the sequence length, so the backbone builds it
//! once per call and every block's attention reuses it.

use candle_core::{DType, Device, Result, Tensor, D};

/// Rotary frequency generator for one head width.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    head_dim: usize,
    theta: f64,
}

/// Cos/sin tables for positions `0..seq_len`, each `[seq_len, head_dim]`.
#[derive(Debug, Clone)]
pub struct RopeTable {
    pub cos: Tensor,
    pub sin: Tensor,
}

impl RotaryEmbedding {
    pub fn new(head_dim: usize, theta: f64) -> Self {
        Self { head_dim, theta }
    }

    /// Build the table for positions `0..seq_len`.
    pub fn forward_from_seq_len(&self, seq_len: usize, device: &Device) -> Result<RopeTable> {
        let half_dim = self.head_dim / 2;

        // inv_freq = 1 / (theta ^ (2i / head_dim)) for i in 0..half_dim
        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|i| (1.0 / self.theta.powf(2.0 * i as f64 / self.head_dim as f64)) as f32)
            .collect();
        let inv_freq = Tensor::from_vec(inv_freq, (1, half_dim), device)?;

        let positions: Vec<f32> = (0..seq_len).map(|i| i as f32).collect();
        let positions = Tensor::from_vec(positions, (seq_len, 1), device)?;

        // freqs = outer(positions, inv_freq) → [seq_len, half_dim]
        let freqs = positions.matmul(&inv_freq)?;

        // Interleave: [f0, f0, f1, f1, ...] → [seq_len, head_dim]
        let freqs = freqs
            .unsqueeze(2)?
            .repeat((1, 1, 2))?
            .reshape((seq_len, self.head_dim))?;

        Ok(RopeTable {
            cos: freqs.cos()?,
            sin: freqs.sin()?,
        })
    }
}

impl RopeTable {
    pub fn seq_len(&self) -> Result<usize> {
        self.cos.dim(0)
    }

    /// Rotate the first `head_dim` channels of `x [B, S, C]`, `C >= head_dim`.
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let x_dtype = x.dtype();
        let (_, s, c) = x.dims3()?;
        let rot_dim = self.cos.dim(1)?;

        let x = x.to_dtype(DType::F32)?;
        let cos = self.cos.to_dtype(DType::F32)?.reshape((1, s, rot_dim))?;
        let sin = self.sin.to_dtype(DType::F32)?.reshape((1, s, rot_dim))?;

        let head = x.narrow(D::Minus1, 0, rot_dim)?.contiguous()?;
        let rotated = (head.broadcast_mul(&cos)? + rotate_pairs(&head)?.broadcast_mul(&sin)?)?;
        let result = if c > rot_dim {
            let rest = x.narrow(D::Minus1, rot_dim, c - rot_dim)?;
            Tensor::cat(&[&rotated, &rest], D::Minus1)?
        } else {
            rotated
        };
        result.to_dtype(x_dtype)
    }
}

/// `(x1, x2) → (-x2, x1)` for every adjacent channel pair of `x [B, S, D]`.
fn rotate_pairs(x: &Tensor) -> Result<Tensor> {
    let (b, s, d) = x.dims3()?;
    let pairs = x.reshape((b, s, d / 2, 2))?;
    let x1 = pairs.narrow(D::Minus1, 0, 1)?;
    let x2 = pairs.narrow(D::Minus1, 1, 1)?;
    Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?.reshape((b, s, d))
}
