//! Multi-head self-attention with rotary queries/keys.
//!
//! Standard scaled dot-product attention. Masked frames are excluded as
//! keys for every query and their own output rows are zeroed, so padding
//! never leaks into real frames.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::mask::attention_bias;
use super::rope::RopeTable;

/// Self-attention over the fused sequence.
#[derive(Debug, Clone)]
pub struct Attention {
    to_q: nn::Linear,
    to_k: nn::Linear,
    to_v: nn::Linear,
    to_out: nn::Linear,
    heads: usize,
    dim_head: usize,
}

impl Attention {
    pub fn new(dim: usize, heads: usize, dim_head: usize, vb: VarBuilder) -> Result<Self> {
        let inner_dim = heads * dim_head;
        Ok(Self {
            to_q: nn::linear(dim, inner_dim, vb.pp("to_q"))?,
            to_k: nn::linear(dim, inner_dim, vb.pp("to_k"))?,
            to_v: nn::linear(dim, inner_dim, vb.pp("to_v"))?,
            to_out: nn::linear(inner_dim, dim, vb.pp("to_out.0"))?,
            heads,
            dim_head,
        })
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, S, dim]`
    /// - `mask`: optional `[B, S]` keep-mask
    /// - `rope`: table for exactly `S` positions
    ///
    /// Returns `[B, S, dim]`.
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, rope: &RopeTable) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        let (q, k, v) = self.project_heads(x, rope)?;

        let scale = 1.0 / (self.dim_head as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?; // [B, H, S, S]
        let scores = match mask {
            Some(mask) => scores.broadcast_add(&attention_bias(mask, scores.dtype())?)?,
            None => scores,
        };
        let weights = nn::ops::softmax_last_dim(&scores)?;
        let out = weights.matmul(&v)?; // [B, H, S, D]

        let out = out
            .transpose(1, 2)?
            .reshape((batch, seq_len, self.heads * self.dim_head))?;
        let out = self.to_out.forward(&out)?;

        match mask {
            Some(mask) => {
                let keep = mask.ne(0u8)?.to_dtype(out.dtype())?.unsqueeze(2)?;
                out.broadcast_mul(&keep)
            }
            None => Ok(out),
        }
    }

    /// Project to q/k/v, rotate the fused q/k, then split into
    /// `[B, H, S, D]` heads.
    fn project_heads(&self, x: &Tensor, rope: &RopeTable) -> Result<(Tensor, Tensor, Tensor)> {
        let (batch, seq_len, _) = x.dims3()?;
        if rope.seq_len()? != seq_len {
            candle_core::bail!(
                "rope table covers {} positions, input has {seq_len}",
                rope.seq_len()?
            );
        }

        // [B, S, H*D] → [B, H, S, D]
        let split = |t: Tensor| -> Result<Tensor> {
            t.reshape((batch, seq_len, self.heads, self.dim_head))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = rope.apply(&self.to_q.forward(x)?)?;
        let k = rope.apply(&self.to_k.forward(x)?)?;
        let v = self.to_v.forward(x)?;
        Ok((split(q)?, split(k)?, split(v)?))
    }
}
