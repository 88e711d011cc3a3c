//! DiT block: AdaLN-Zero attention followed by AdaLN-modulated feed-forward.
//!
//! ```text
//! h   = AdaLN(x, t)                      (shift_msa, scale_msa)
//! x   = x + gate_msa * Attn(h, mask, rope)
//! h   = LN(x) * (1 + scale_mlp) + shift_mlp
//! x   = x + gate_mlp * FF(h)
//! ```
//!
//! Gates multiply the branch output only, never the residual path.

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::attention::Attention;
use super::feed_forward::FeedForward;
use super::modulation::{gated_residual, modulate, AdaLayerNormZero, NonAffineLayerNorm};
use super::rope::RopeTable;

#[derive(Debug, Clone)]
pub struct DiTBlock {
    attn_norm: AdaLayerNormZero,
    attn: Attention,
    ff_norm: NonAffineLayerNorm,
    ff: FeedForward,
}

impl DiTBlock {
    pub fn new(
        dim: usize,
        heads: usize,
        dim_head: usize,
        ff_mult: usize,
        norm_eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            attn_norm: AdaLayerNormZero::new(dim, norm_eps, vb.pp("attn_norm"))?,
            attn: Attention::new(dim, heads, dim_head, vb.pp("attn"))?,
            ff_norm: NonAffineLayerNorm::new(dim, norm_eps, vb.dtype(), vb.device())?,
            ff: FeedForward::new(dim, ff_mult, vb.pp("ff"))?,
        })
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, S, D]` backbone state
    /// - `t`: `[B, D]` conditioning vector
    /// - `mask`: optional `[B, S]` keep-mask
    /// - `rope`: rotary table for `S` positions
    pub fn forward(
        &self,
        x: &Tensor,
        t: &Tensor,
        mask: Option<&Tensor>,
        rope: &RopeTable,
    ) -> Result<Tensor> {
        let m = self.attn_norm.forward(x, t)?;

        let attn_out = self.attn.forward(&m.normed, mask, rope)?;
        let x = gated_residual(x, &m.gate_msa, &attn_out)?;

        let h = modulate(&self.ff_norm.forward(&x)?, &m.shift_mlp, &m.scale_mlp)?;
        let ff_out = self.ff.forward(&h)?;
        gated_residual(&x, &m.gate_mlp, &ff_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::transformer::rope::RotaryEmbedding;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarMap};

    #[test]
    fn block_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let block = DiTBlock::new(16, 2, 8, 2, 1e-6, vb.pp("block")).unwrap();
        let rope = RotaryEmbedding::new(8, 10_000.0)
            .forward_from_seq_len(9, &dev)
            .unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 9, 16), &dev).unwrap();
        let t = Tensor::randn(0f32, 1.0, (2, 16), &dev).unwrap();
        let y = block.forward(&x, &t, None, &rope).unwrap();
        assert_eq!(y.dims(), &[2, 9, 16]);
    }

    #[test]
    fn zero_modulation_is_identity() {
        let dev = Device::Cpu;
        let dim = 16;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        // Only the modulation projection is zeroed; attention and FF are random.
        vb.pp("block.attn_norm.linear")
            .get_with_hints((dim * 6, dim), "weight", Init::Const(0.0))
            .unwrap();
        vb.pp("block.attn_norm.linear")
            .get_with_hints(dim * 6, "bias", Init::Const(0.0))
            .unwrap();
        let block = DiTBlock::new(dim, 2, 8, 2, 1e-6, vb.pp("block")).unwrap();

        let rope = RotaryEmbedding::new(8, 10_000.0)
            .forward_from_seq_len(7, &dev)
            .unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 7, dim), &dev).unwrap();
        let t = Tensor::randn(0f32, 1.0, (2, dim), &dev).unwrap();
        let y = block.forward(&x, &t, None, &rope).unwrap();

        let x: Vec<f32> = x.flatten_all().unwrap().to_vec1().unwrap();
        let y: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(x, y);
    }
}
