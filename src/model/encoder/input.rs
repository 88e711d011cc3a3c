//! Input fusion: noised audio + conditioning audio + text → model width.

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{self as nn, VarBuilder};

use super::conv_position::ConvPositionEmbedding;

#[derive(Debug, Clone)]
pub struct InputEmbedding {
    proj: nn::Linear,
    conv_pos_embed: ConvPositionEmbedding,
}

impl InputEmbedding {
    pub fn new(
        mel_dim: usize,
        text_dim: usize,
        out_dim: usize,
        conv_pos_kernel: usize,
        conv_pos_groups: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let proj = nn::linear(mel_dim * 2 + text_dim, out_dim, vb.pp("proj"))?;
        let conv_pos_embed = ConvPositionEmbedding::new(
            out_dim,
            conv_pos_kernel,
            conv_pos_groups,
            vb.pp("conv_pos_embed"),
        )?;
        Ok(Self {
            proj,
            conv_pos_embed,
        })
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, S, mel_dim]` noised audio
    /// - `cond`: `[B, S, mel_dim]` conditioning audio
    /// - `text_embed`: `[B, S, text_dim]`
    /// - `drop_audio_cond`: replace `cond` with zeros
    ///
    /// Returns `[B, S, out_dim]`.
    pub fn forward(
        &self,
        x: &Tensor,
        cond: &Tensor,
        text_embed: &Tensor,
        drop_audio_cond: bool,
    ) -> Result<Tensor> {
        let cond = if drop_audio_cond {
            cond.zeros_like()?
        } else {
            cond.clone()
        };

        let h = Tensor::cat(&[x, &cond, text_embed], D::Minus1)?.apply(&self.proj)?;
        let pos = self.conv_pos_embed.forward(&h)?;
        pos + h
    }
}
