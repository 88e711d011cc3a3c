//! Convolutional positional embedding.
//!
//! Two grouped same-length convolutions, each followed by Mish:
//! ```text
//! x [B, S, D] → transpose → Conv1d(k=31, groups=16) → Mish
//!                         → Conv1d(k=31, groups=16) → Mish → transpose
//! ```
//! The result is added back to its input by [`super::input::InputEmbedding`].

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, Conv1d, Conv1dConfig, VarBuilder};

#[derive(Debug, Clone)]
pub struct ConvPositionEmbedding {
    conv1: Conv1d,
    conv2: Conv1d,
}

impl ConvPositionEmbedding {
    pub fn new(dim: usize, kernel_size: usize, groups: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv1dConfig {
            padding: kernel_size / 2,
            groups,
            ..Default::default()
        };
        // Sequential(Conv1d, Mish, Conv1d, Mish)
        let conv1 = nn::conv1d(dim, dim, kernel_size, cfg, vb.pp("conv1d.0"))?;
        let conv2 = nn::conv1d(dim, dim, kernel_size, cfg, vb.pp("conv1d.2"))?;
        Ok(Self { conv1, conv2 })
    }
}

impl Module for ConvPositionEmbedding {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let h = xs.transpose(1, 2)?.contiguous()?; // [B, D, S]
        let h = mish(&h.apply(&self.conv1)?)?;
        let h = mish(&h.apply(&self.conv2)?)?;
        h.transpose(1, 2)?.contiguous()
    }
}

/// Mish: `x · tanh(softplus(x))`.
pub fn mish(x: &Tensor) -> Result<Tensor> {
    let softplus = (x.exp()? + 1.0)?.log()?;
    x * softplus.tanh()?
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn preserves_length() {
        let dev = Device::Cpu;
        let varmap = nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let conv = ConvPositionEmbedding::new(32, 31, 16, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 20, 32), &dev).unwrap();
        assert_eq!(conv.forward(&x).unwrap().dims(), &[2, 20, 32]);
    }

    #[test]
    fn mish_values() {
        let x = Tensor::new(&[0f32, 1.0, -1.0], &Device::Cpu).unwrap();
        let y: Vec<f32> = mish(&x).unwrap().to_vec1().unwrap();
        assert_eq!(y[0], 0.0);
        assert!((y[1] - 0.865_098).abs() < 1e-5);
        assert!((y[2] + 0.303_401).abs() < 1e-5);
    }
}
