//! Position-wise feed-forward: `Linear → GELU(tanh) → Linear`.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

#[derive(Debug, Clone)]
pub struct FeedForward {
    project_in: nn::Linear,
    project_out: nn::Linear,
}

impl FeedForward {
    pub fn new(dim: usize, mult: usize, vb: VarBuilder) -> Result<Self> {
        let inner_dim = dim * mult;
        // Parameter names follow Sequential(Sequential(Linear, GELU), Dropout, Linear).
        let project_in = nn::linear(dim, inner_dim, vb.pp("ff.0.0"))?;
        let project_out = nn::linear(inner_dim, dim, vb.pp("ff.2"))?;
        Ok(Self {
            project_in,
            project_out,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        // candle's `gelu` is the tanh approximation.
        self.project_in.forward(xs)?.gelu()?.apply(&self.project_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn preserves_shape() {
        let device = Device::Cpu;
        let varmap = nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let ff = FeedForward::new(16, 2, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 7, 16), &device).unwrap();
        assert_eq!(ff.forward(&x).unwrap().dims(), &[2, 7, 16]);
    }

    #[test]
    fn zero_weights_give_zero_output() {
        let device = Device::Cpu;
        let ff = FeedForward::new(8, 4, VarBuilder::zeros(DType::F32, &device)).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 3, 8), &device).unwrap();
        let sum: f32 = ff
            .forward(&x)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(sum, 0.0);
    }
}
