//! DiT: the full denoising backbone.
//!
//! Embeds the timestep once, fuses noised audio, conditioning audio and
//! text into a single sequence, runs it through the block stack with a
//! shared rotary table, then projects back to mel channels.
//!
//! Input: `x`, `cond` [B, S, mel_dim], `text` [B, Nt], `time` scalar or [B]
//! Output: [B, S, mel_dim] predicted noise/velocity

use candle_core::{Module, Tensor, D};
use candle_nn::{self as nn, VarBuilder};

use super::layers::DiTBlock;
use super::modulation::AdaLayerNormZeroFinal;
use super::rope::RotaryEmbedding;
use super::timestep::TimestepEmbedding;
use crate::config::DiTConfig;
use crate::model::encoder::input::InputEmbedding;
use crate::model::encoder::text::TextEmbedding;
use crate::{Error, Result};

/// Guidance strengths below this skip the unconditioned pass.
const MIN_CFG_STRENGTH: f64 = 1e-5;

/// The full DiT model.
#[derive(Debug, Clone)]
pub struct DiT {
    time_embed: TimestepEmbedding,
    text_embed: TextEmbedding,
    input_embed: InputEmbedding,
    rotary_embed: RotaryEmbedding,
    transformer_blocks: Vec<DiTBlock>,
    long_skip_connection: Option<nn::Linear>,
    norm_out: AdaLayerNormZeroFinal,
    proj_out: nn::Linear,
    cfg: DiTConfig,
}

impl DiT {
    /// Build the model. The config is validated before any weight is read.
    pub fn new(cfg: &DiTConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let dim = cfg.dim;
        let text_dim = cfg.text_dim();

        let time_embed = TimestepEmbedding::new(dim, cfg.freq_embed_dim, vb.pp("time_embed"))?;
        let text_embed = TextEmbedding::new(cfg, vb.pp("text_embed"))?;
        let input_embed = InputEmbedding::new(
            cfg.mel_dim,
            text_dim,
            dim,
            cfg.conv_pos_kernel,
            cfg.conv_pos_groups,
            vb.pp("input_embed"),
        )?;
        let rotary_embed = RotaryEmbedding::new(cfg.dim_head, cfg.rope_theta);

        let mut transformer_blocks = Vec::with_capacity(cfg.depth);
        for i in 0..cfg.depth {
            transformer_blocks.push(DiTBlock::new(
                dim,
                cfg.heads,
                cfg.dim_head,
                cfg.ff_mult,
                cfg.norm_eps,
                vb.pp(format!("transformer_blocks.{i}")),
            )?);
        }

        let long_skip_connection = if cfg.long_skip_connection {
            Some(nn::linear_no_bias(
                dim * 2,
                dim,
                vb.pp("long_skip_connection"),
            )?)
        } else {
            None
        };

        let norm_out = AdaLayerNormZeroFinal::new(dim, cfg.norm_eps, vb.pp("norm_out"))?;
        let proj_out = nn::linear(dim, cfg.mel_dim, vb.pp("proj_out"))?;

        tracing::info!(
            depth = cfg.depth,
            dim,
            heads = cfg.heads,
            dim_head = cfg.dim_head,
            mel_dim = cfg.mel_dim,
            text_dim,
            text_refiner = text_embed.has_refiner(),
            long_skip = cfg.long_skip_connection,
            "built DiT backbone"
        );

        Ok(Self {
            time_embed,
            text_embed,
            input_embed,
            rotary_embed,
            transformer_blocks,
            long_skip_connection,
            norm_out,
            proj_out,
            cfg: cfg.clone(),
        })
    }

    pub fn config(&self) -> &DiTConfig {
        &self.cfg
    }

    /// Forward pass of the DiT.
    ///
    /// - `x`: [B, S, mel_dim] noised audio
    /// - `cond`: [B, S, mel_dim] conditioning audio
    /// - `text`: [B, Nt] token ids, `-1` = filler; truncated/padded to `S`
    /// - `time`: scalar (rank 0) shared by the batch, or [B]
    /// - `drop_audio_cond`, `drop_text`: classifier-free guidance dropout
    /// - `mask`: optional [B, S] keep-mask
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        x: &Tensor,
        cond: &Tensor,
        text: &Tensor,
        time: &Tensor,
        drop_audio_cond: bool,
        drop_text: bool,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (batch, seq_len) = self.check_inputs(x, cond, text, mask)?;
        tracing::debug!(
            batch,
            seq_len,
            text_len = text.dim(1)?,
            drop_audio_cond,
            drop_text,
            masked = mask.is_some(),
            "DiT forward"
        );

        // 1. Conditioning vector, computed once for every block and the final norm.
        let time = broadcast_time(time, batch)?;
        let t = self.time_embed.forward(&time)?;

        // 2. Text, length-aligned to the audio frames.
        let text_embed = self.text_embed.forward(text, seq_len, drop_text)?;

        // 3. Fused input sequence [B, S, D].
        let mut h = self
            .input_embed
            .forward(x, cond, &text_embed, drop_audio_cond)?;

        // 4. One rotary table for the whole stack.
        let rope = self
            .rotary_embed
            .forward_from_seq_len(seq_len, x.device())?;

        let residual = self.long_skip_connection.as_ref().map(|_| h.clone());

        for (i, block) in self.transformer_blocks.iter().enumerate() {
            tracing::trace!(block = i, "DiT block");
            h = block.forward(&h, &t, mask, &rope)?;
        }

        if let (Some(skip), Some(residual)) = (&self.long_skip_connection, &residual) {
            h = Tensor::cat(&[&h, residual], D::Minus1)?.apply(skip)?;
        }

        let h = self.norm_out.forward(&h, &t)?;
        Ok(self.proj_out.forward(&h)?)
    }

    /// Classifier-free guided prediction:
    /// `pred + (pred - null_pred) * cfg_strength`, where `null_pred` drops
    /// both the audio and the text condition.
    pub fn forward_guided(
        &self,
        x: &Tensor,
        cond: &Tensor,
        text: &Tensor,
        time: &Tensor,
        mask: Option<&Tensor>,
        cfg_strength: f64,
    ) -> Result<Tensor> {
        let pred = self.forward(x, cond, text, time, false, false, mask)?;
        if cfg_strength < MIN_CFG_STRENGTH {
            return Ok(pred);
        }
        let null_pred = self.forward(x, cond, text, time, true, true, mask)?;
        let guidance = ((&pred - null_pred)? * cfg_strength)?;
        Ok((pred + guidance)?)
    }

    /// Validate the shape contract and return `(B, S)`.
    fn check_inputs(
        &self,
        x: &Tensor,
        cond: &Tensor,
        text: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(usize, usize)> {
        let (batch, seq_len, mel_dim) = x
            .dims3()
            .map_err(|_| Error::shape(format!("x must be [B, S, mel_dim], got {:?}", x.dims())))?;
        if mel_dim != self.cfg.mel_dim {
            return Err(Error::shape(format!(
                "x has {mel_dim} mel channels, model expects {}",
                self.cfg.mel_dim
            )));
        }
        if cond.dims() != x.dims() {
            return Err(Error::shape(format!(
                "cond shape {:?} does not match x shape {:?}",
                cond.dims(),
                x.dims()
            )));
        }
        match text.dims() {
            [b, _] if *b == batch => {}
            dims => {
                return Err(Error::shape(format!(
                    "text must be [{batch}, Nt], got {dims:?}"
                )))
            }
        }
        if let Some(mask) = mask {
            if mask.dims() != [batch, seq_len] {
                return Err(Error::shape(format!(
                    "mask must be [{batch}, {seq_len}], got {:?}",
                    mask.dims()
                )));
            }
        }
        Ok((batch, seq_len))
    }
}

/// Expand a scalar timestep to `[B]`; pass a `[B]` timestep through.
pub fn broadcast_time(time: &Tensor, batch: usize) -> Result<Tensor> {
    match time.dims() {
        [] => Ok(time.broadcast_as(batch)?.contiguous()?),
        [b] if *b == batch => Ok(time.clone()),
        dims => Err(Error::shape(format!(
            "time must be a scalar or [{batch}], got {dims:?}"
        ))),
    }
}
