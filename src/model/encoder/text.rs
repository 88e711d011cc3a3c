//! Text token encoder.
//!
//! Token ids arrive with `-1` as the filler id. They are shifted by one so
//! that filler lands on row 0 of the embedding table, then truncated or
//! right-padded to the audio frame count:
//!
//! ```text
//! tokens [B, Nt] (i64, -1 = filler)
//!   → shift_and_pad → [B, S] (0 = filler)
//!   → Embedding(vocab + 1, text_dim) → [B, S, text_dim]
//!   → (+ sinusoidal positions → ConvNeXt-V2 × conv_layers)
//! ```
//!
//! Tokens beyond `S` are dropped without error.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::convnext::ConvNeXtV2Block;
use super::positions::{get_pos_embed_indices, precompute_freqs_cis};
use crate::config::DiTConfig;

/// Shift ids by +1 (filler `-1` → `0`), keep at most `seq_len` tokens and
/// right-pad with `0` to exactly `seq_len`.
///
/// Input `[B, Nt]` of any integer or float dtype; output `[B, seq_len]` i64.
pub fn shift_and_pad(tokens: &Tensor, seq_len: usize) -> Result<Tensor> {
    let (_, text_len) = tokens.dims2()?;
    let tokens = tokens.to_dtype(DType::I64)?;
    let one = Tensor::ones(1, DType::I64, tokens.device())?;
    let shifted = tokens.broadcast_add(&one)?;

    let keep = text_len.min(seq_len);
    shifted.narrow(1, 0, keep)?.pad_with_zeros(1, 0, seq_len - keep)
}

/// Positional bias and ConvNeXt stack, present only when `conv_layers > 0`.
#[derive(Debug, Clone)]
struct TextRefiner {
    freqs_cis: Tensor,
    max_pos: usize,
    blocks: Vec<ConvNeXtV2Block>,
}

impl TextRefiner {
    fn forward(&self, text: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, dim) = text.dims3()?;

        // Every item starts at position 0.
        let batch_start = Tensor::zeros(batch, DType::U32, text.device())?;
        let pos_idx = get_pos_embed_indices(&batch_start, seq_len, self.max_pos)?;
        let pos_embed = self
            .freqs_cis
            .index_select(&pos_idx.flatten_all()?, 0)?
            .reshape((batch, seq_len, dim))?
            .to_dtype(text.dtype())?;

        let mut h = (text + pos_embed)?;
        for block in &self.blocks {
            h = block.forward(&h)?;
        }
        Ok(h)
    }
}

/// Token embedding with optional positional bias and ConvNeXt refinement.
#[derive(Debug, Clone)]
pub struct TextEmbedding {
    text_embed: nn::Embedding,
    refiner: Option<TextRefiner>,
}

impl TextEmbedding {
    pub fn new(cfg: &DiTConfig, vb: VarBuilder) -> Result<Self> {
        let text_dim = cfg.text_dim();
        // Row 0 is the filler token.
        let text_embed = nn::embedding(cfg.text_num_embeds + 1, text_dim, vb.pp("text_embed"))?;

        let refiner = if cfg.conv_layers > 0 {
            let freqs_cis =
                precompute_freqs_cis(text_dim, cfg.text_max_pos, 10_000.0, vb.device())?;
            let blocks = (0..cfg.conv_layers)
                .map(|i| {
                    ConvNeXtV2Block::new(
                        text_dim,
                        text_dim * cfg.conv_mult,
                        vb.pp(format!("text_blocks.{i}")),
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            Some(TextRefiner {
                freqs_cis,
                max_pos: cfg.text_max_pos,
                blocks,
            })
        } else {
            None
        };

        Ok(Self {
            text_embed,
            refiner,
        })
    }

    pub fn has_refiner(&self) -> bool {
        self.refiner.is_some()
    }

    /// Forward pass.
    ///
    /// - `text`: `[B, Nt]` token ids, `-1` = filler
    /// - `seq_len`: audio frame count `S`
    /// - `drop_text`: replace every id with filler before lookup
    ///
    /// Returns `[B, S, text_dim]`.
    pub fn forward(&self, text: &Tensor, seq_len: usize, drop_text: bool) -> Result<Tensor> {
        let ids = shift_and_pad(text, seq_len)?;
        let ids = if drop_text {
            ids.zeros_like()?
        } else {
            ids
        };
        let embedded = self.text_embed.forward(&ids.to_dtype(DType::U32)?)?;

        match &self.refiner {
            Some(refiner) => refiner.forward(&embedded),
            None => Ok(embedded),
        }
    }
}
