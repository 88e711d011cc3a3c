//! AdaLN-Zero modulation.
//!
//! The conditioning vector `t [B, D]` goes through SiLU and a linear
//! projection; the result is split into shift/scale/gate vectors that
//! modulate a non-affine layer norm:
//!
//! ```text
//! modulated = norm(x) * (1 + scale) + shift
//! ```
//!
//! With a zero-initialized projection every scale and shift is zero, so the
//! modulated tensor is exactly `norm(x)`, and every gate is zero, so each
//! block starts as the identity.

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{self as nn, VarBuilder};

/// Layer norm without learned weight or bias.
#[derive(Debug, Clone)]
pub struct NonAffineLayerNorm {
    inner: nn::LayerNorm,
}

impl NonAffineLayerNorm {
    pub fn new(dim: usize, eps: f64, dtype: DType, device: &Device) -> Result<Self> {
        let ones = Tensor::ones(dim, dtype, device)?;
        Ok(Self {
            inner: nn::LayerNorm::new_no_bias(ones, eps),
        })
    }
}

impl Module for NonAffineLayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.inner.forward(xs)
    }
}

/// `x [B, S, D] * (1 + scale [B, D]) + shift [B, D]`, broadcast over `S`.
pub fn modulate(x: &Tensor, shift: &Tensor, scale: &Tensor) -> Result<Tensor> {
    let scale_plus_one = (scale.unsqueeze(1)? + 1.0)?;
    x.broadcast_mul(&scale_plus_one)?
        .broadcast_add(&shift.unsqueeze(1)?)
}

/// Scale `branch [B, S, D]` by `gate [B, D]` and add it to `residual`.
pub fn gated_residual(residual: &Tensor, gate: &Tensor, branch: &Tensor) -> Result<Tensor> {
    residual + branch.broadcast_mul(&gate.unsqueeze(1)?)?
}

/// The six per-block modulation vectors, each `[B, D]`.
///
/// Projection order is `shift_msa, scale_msa, gate_msa, shift_mlp,
/// scale_mlp, gate_mlp`.
#[derive(Debug, Clone)]
pub struct BlockModulation {
    pub shift_msa: Tensor,
    pub scale_msa: Tensor,
    pub gate_msa: Tensor,
    pub shift_mlp: Tensor,
    pub scale_mlp: Tensor,
    pub gate_mlp: Tensor,
}

/// Output of [`AdaLayerNormZero::forward`]: the attention input plus the
/// parameters the rest of the block still needs.
#[derive(Debug, Clone)]
pub struct AttnModulation {
    /// `norm(x) * (1 + scale_msa) + shift_msa`, `[B, S, D]`.
    pub normed: Tensor,
    pub gate_msa: Tensor,
    pub shift_mlp: Tensor,
    pub scale_mlp: Tensor,
    pub gate_mlp: Tensor,
}

/// Block variant: projects to `6·D`.
#[derive(Debug, Clone)]
pub struct AdaLayerNormZero {
    linear: nn::Linear,
    norm: NonAffineLayerNorm,
    dim: usize,
}

impl AdaLayerNormZero {
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let norm = NonAffineLayerNorm::new(dim, eps, vb.dtype(), vb.device())?;
        let linear = nn::linear(dim, dim * 6, vb.pp("linear"))?;
        Ok(Self { linear, norm, dim })
    }

    /// Split `SiLU(emb) · W + b` into the six named vectors.
    pub fn modulation(&self, emb: &Tensor) -> Result<BlockModulation> {
        let emb = self.linear.forward(&emb.silu()?)?;
        let chunk = |i: usize| emb.narrow(D::Minus1, i * self.dim, self.dim);
        Ok(BlockModulation {
            shift_msa: chunk(0)?,
            scale_msa: chunk(1)?,
            gate_msa: chunk(2)?,
            shift_mlp: chunk(3)?,
            scale_mlp: chunk(4)?,
            gate_mlp: chunk(5)?,
        })
    }

    /// - `x`: `[B, S, D]`
    /// - `emb`: `[B, D]` conditioning vector
    pub fn forward(&self, x: &Tensor, emb: &Tensor) -> Result<AttnModulation> {
        let m = self.modulation(emb)?;
        let normed = modulate(&self.norm.forward(x)?, &m.shift_msa, &m.scale_msa)?;
        Ok(AttnModulation {
            normed,
            gate_msa: m.gate_msa,
            shift_mlp: m.shift_mlp,
            scale_mlp: m.scale_mlp,
            gate_mlp: m.gate_mlp,
        })
    }
}

/// The two terminal modulation vectors, each `[B, D]`.
///
/// Projection order is `scale, shift`, the reverse of the block variant.
#[derive(Debug, Clone)]
pub struct FinalModulation {
    pub scale: Tensor,
    pub shift: Tensor,
}

/// Final variant: projects to `2·D`, no gate.
#[derive(Debug, Clone)]
pub struct AdaLayerNormZeroFinal {
    linear: nn::Linear,
    norm: NonAffineLayerNorm,
    dim: usize,
}

impl AdaLayerNormZeroFinal {
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let norm = NonAffineLayerNorm::new(dim, eps, vb.dtype(), vb.device())?;
        let linear = nn::linear(dim, dim * 2, vb.pp("linear"))?;
        Ok(Self { linear, norm, dim })
    }

    pub fn modulation(&self, emb: &Tensor) -> Result<FinalModulation> {
        let emb = self.linear.forward(&emb.silu()?)?;
        Ok(FinalModulation {
            scale: emb.narrow(D::Minus1, 0, self.dim)?,
            shift: emb.narrow(D::Minus1, self.dim, self.dim)?,
        })
    }

    pub fn forward(&self, x: &Tensor, emb: &Tensor) -> Result<Tensor> {
        let m = self.modulation(emb)?;
        modulate(&self.norm.forward(x)?, &m.shift, &m.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::{Init, VarMap};

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap()
    }

    #[test]
    fn block_variant_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let ada = AdaLayerNormZero::new(16, 1e-6, vb).unwrap();

        let x = Tensor::randn(0f32, 1.0, (2, 5, 16), &device).unwrap();
        let emb = Tensor::randn(0f32, 1.0, (2, 16), &device).unwrap();
        let out = ada.forward(&x, &emb).unwrap();
        assert_eq!(out.normed.dims(), &[2, 5, 16]);
        for v in [&out.gate_msa, &out.shift_mlp, &out.scale_mlp, &out.gate_mlp] {
            assert_eq!(v.dims(), &[2, 16]);
        }
    }

    #[test]
    fn block_split_follows_projection_order() {
        let device = Device::Cpu;
        let dim = 4;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        // Zero weights, bias = chunk index, so each chunk is identifiable.
        vb.pp("linear")
            .get_with_hints((dim * 6, dim), "weight", Init::Const(0.0))
            .unwrap();
        vb.pp("linear")
            .get_with_hints(dim * 6, "bias", Init::Const(0.0))
            .unwrap();
        let bias: Vec<f32> = (0..6).flat_map(|i| vec![i as f32; dim]).collect();
        varmap
            .data()
            .lock()
            .unwrap()
            .get("linear.bias")
            .unwrap()
            .set(&Tensor::from_vec(bias, dim * 6, &device).unwrap())
            .unwrap();

        let ada = AdaLayerNormZero::new(dim, 1e-6, vb).unwrap();
        let emb = Tensor::zeros((1, dim), DType::F32, &device).unwrap();
        let m = ada.modulation(&emb).unwrap();
        let first = |t: &Tensor| -> f32 { t.flatten_all().unwrap().to_vec1::<f32>().unwrap()[0] };
        assert_eq!(first(&m.shift_msa), 0.0);
        assert_eq!(first(&m.scale_msa), 1.0);
        assert_eq!(first(&m.gate_msa), 2.0);
        assert_eq!(first(&m.shift_mlp), 3.0);
        assert_eq!(first(&m.scale_mlp), 4.0);
        assert_eq!(first(&m.gate_mlp), 5.0);
    }

    #[test]
    fn zero_projection_is_plain_norm() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let ada = AdaLayerNormZero::new(8, 1e-6, vb.pp("block")).unwrap();
        let fin = AdaLayerNormZeroFinal::new(8, 1e-6, vb.pp("final")).unwrap();
        let norm = NonAffineLayerNorm::new(8, 1e-6, DType::F32, &device).unwrap();

        let x = Tensor::randn(0f32, 3.0, (2, 6, 8), &device).unwrap();
        let emb = Tensor::randn(0f32, 1.0, (2, 8), &device).unwrap();
        let expected = norm.forward(&x).unwrap();

        let out = ada.forward(&x, &emb).unwrap();
        assert_eq!(max_abs_diff(&out.normed, &expected), 0.0);
        assert_eq!(
            out.gate_msa.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap(),
            0.0
        );
        assert_eq!(max_abs_diff(&fin.forward(&x, &emb).unwrap(), &expected), 0.0);
    }

    #[test]
    fn final_split_is_scale_then_shift() {
        let device = Device::Cpu;
        let dim = 4;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        vb.pp("linear")
            .get_with_hints((dim * 2, dim), "weight", Init::Const(0.0))
            .unwrap();
        vb.pp("linear")
            .get_with_hints(dim * 2, "bias", Init::Const(0.0))
            .unwrap();
        let bias: Vec<f32> = [vec![1f32; dim], vec![2f32; dim]].concat();
        varmap
            .data()
            .lock()
            .unwrap()
            .get("linear.bias")
            .unwrap()
            .set(&Tensor::from_vec(bias, dim * 2, &device).unwrap())
            .unwrap();

        let fin = AdaLayerNormZeroFinal::new(dim, 1e-6, vb).unwrap();
        let emb = Tensor::zeros((1, dim), DType::F32, &device).unwrap();
        let m = fin.modulation(&emb).unwrap();
        assert_eq!(m.scale.to_vec2::<f32>().unwrap()[0], vec![1.0; dim]);
        assert_eq!(m.shift.to_vec2::<f32>().unwrap()[0], vec![2.0; dim]);
    }

    #[test]
    fn modulate_applies_one_plus_scale() {
        let device = Device::Cpu;
        let x = Tensor::ones((1, 2, 3), DType::F32, &device).unwrap();
        let shift = Tensor::new(&[[0.5f32, 0.5, 0.5]], &device).unwrap();
        let scale = Tensor::new(&[[1f32, 0., -1.]], &device).unwrap();
        let y = modulate(&x, &shift, &scale).unwrap();
        let rows: Vec<Vec<f32>> = y.squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(rows[0], vec![2.5, 1.5, 0.5]);
        assert_eq!(rows[1], vec![2.5, 1.5, 0.5]);
    }
}
