//! ConvNeXt-V2 refinement block for text embeddings.
//!
//! ```text
//! x [B, S, C]
//!   → depthwise Conv1d(k=7, pad=3)
//!   → LayerNorm → Linear(C, C·mult) → GELU (exact erf) → GRN → Linear(C·mult, C)
//!   → + x
//! ```

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{self as nn, Conv1d, Conv1dConfig, LayerNorm, Linear, VarBuilder};

const DWCONV_KERNEL: usize = 7;

/// Global Response Normalization over the time axis.
#[derive(Debug, Clone)]
pub struct GlobalResponseNorm {
    gamma: Tensor,
    beta: Tensor,
}

impl GlobalResponseNorm {
    pub fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        let gamma = vb.get_with_hints((1, 1, dim), "gamma", nn::Init::Const(0.0))?;
        let beta = vb.get_with_hints((1, 1, dim), "beta", nn::Init::Const(0.0))?;
        Ok(Self { gamma, beta })
    }
}

impl Module for GlobalResponseNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // Gx: L2 norm over time [B, 1, C]; Nx: Gx relative to its channel mean.
        let gx = xs.sqr()?.sum_keepdim(1)?.sqrt()?;
        let nx = gx.broadcast_div(&(gx.mean_keepdim(D::Minus1)? + 1e-6)?)?;
        let scaled = xs.broadcast_mul(&nx)?.broadcast_mul(&self.gamma)?;
        scaled.broadcast_add(&self.beta)? + xs
    }
}

#[derive(Debug, Clone)]
pub struct ConvNeXtV2Block {
    dwconv: Conv1d,
    norm: LayerNorm,
    pwconv1: Linear,
    grn: GlobalResponseNorm,
    pwconv2: Linear,
}

impl ConvNeXtV2Block {
    pub fn new(dim: usize, intermediate_dim: usize, vb: VarBuilder) -> Result<Self> {
        let dw_cfg = Conv1dConfig {
            padding: DWCONV_KERNEL / 2,
            groups: dim,
            ..Default::default()
        };
        Ok(Self {
            dwconv: nn::conv1d(dim, dim, DWCONV_KERNEL, dw_cfg, vb.pp("dwconv"))?,
            norm: nn::layer_norm(dim, 1e-6, vb.pp("norm"))?,
            pwconv1: nn::linear(dim, intermediate_dim, vb.pp("pwconv1"))?,
            grn: GlobalResponseNorm::new(intermediate_dim, vb.pp("grn"))?,
            pwconv2: nn::linear(intermediate_dim, dim, vb.pp("pwconv2"))?,
        })
    }
}

impl Module for ConvNeXtV2Block {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let h = xs
            .transpose(1, 2)?
            .contiguous()?
            .apply(&self.dwconv)?
            .transpose(1, 2)?
            .contiguous()?;
        let h = h
            .apply(&self.norm)?
            .apply(&self.pwconv1)?
            .gelu_erf()?
            .apply(&self.grn)?
            .apply(&self.pwconv2)?;
        xs + h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn block_preserves_shape() {
        let dev = Device::Cpu;
        let varmap = nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let block = ConvNeXtV2Block::new(12, 24, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 10, 12), &dev).unwrap();
        assert_eq!(block.forward(&x).unwrap().dims(), &[2, 10, 12]);
    }

    #[test]
    fn zero_grn_is_identity() {
        let dev = Device::Cpu;
        let grn = GlobalResponseNorm::new(6, VarBuilder::zeros(DType::F32, &dev)).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 4, 6), &dev).unwrap();
        let y = grn.forward(&x).unwrap();
        let diff: f32 = (y - &x)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn zero_weights_pass_input_through() {
        let dev = Device::Cpu;
        let block = ConvNeXtV2Block::new(8, 16, VarBuilder::zeros(DType::F32, &dev)).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 5, 8), &dev).unwrap();
        let y = block.forward(&x).unwrap();
        let x: Vec<f32> = x.flatten_all().unwrap().to_vec1().unwrap();
        let y: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn activation_is_exact_gelu() {
        let dev = Device::Cpu;
        let varmap = nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        // One channel: the norm output is always zero, so pwconv1 feeds its
        // bias (1.0) into the activation and pwconv2 copies the result out.
        let pw1 = vb.pp("pwconv1");
        pw1.get_with_hints((1, 1), "weight", nn::Init::Const(0.0)).unwrap();
        pw1.get_with_hints(1, "bias", nn::Init::Const(1.0)).unwrap();
        let pw2 = vb.pp("pwconv2");
        pw2.get_with_hints((1, 1), "weight", nn::Init::Const(1.0)).unwrap();
        pw2.get_with_hints(1, "bias", nn::Init::Const(0.0)).unwrap();

        let block = ConvNeXtV2Block::new(1, 1, vb).unwrap();
        let x = Tensor::zeros((1, 3, 1), DType::F32, &dev).unwrap();
        let y: Vec<f32> = block.forward(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        for v in y {
            // erf GELU(1) = 0.841345; the tanh approximation gives 0.841192.
            assert!((v - 0.841_345).abs() < 1e-5, "got {v}");
        }
    }
}
