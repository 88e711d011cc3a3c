//! Frame masks.
//!
//! A keep-mask is a `[B, S]` u8 tensor with 1 for frames to attend to and 0
//! for padding. Attention consumes it as an additive bias over keys.

use candle_core::{DType, Device, Result, Tensor};

/// Build a `[B, max_len]` keep-mask from per-item lengths.
///
/// Lengths longer than `max_len` keep the whole row.
pub fn lens_to_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0u8; lengths.len() * max_len];
    for (row, &len) in lengths.iter().enumerate() {
        let keep = len.min(max_len);
        data[row * max_len..row * max_len + keep].fill(1);
    }
    Tensor::from_vec(data, (lengths.len(), max_len), device)
}

/// Convert a `[B, S]` keep-mask into an additive `[B, 1, 1, S]` key bias:
/// 0.0 where kept, the dtype's most negative finite value where dropped.
pub fn attention_bias(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let min_val = match dtype {
        DType::F32 => f64::from(f32::MIN),
        DType::F16 => f64::from(half::f16::MIN),
        DType::BF16 => f64::from(half::bf16::MIN),
        DType::F64 => f64::MIN,
        _ => f64::from(f32::MIN),
    };
    let (b, s) = mask.dims2()?;
    let keep = mask.ne(0u8)?;
    let zeros = Tensor::zeros((b, s), dtype, mask.device())?;
    let dropped = Tensor::full(min_val, (b, s), mask.device())?.to_dtype(dtype)?;
    keep.where_cond(&zeros, &dropped)?.reshape((b, 1, 1, s))
}
