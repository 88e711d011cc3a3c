//! Configuration for the mel-spectrogram DiT.
//!
//! Defaults match the base F5-style release: a 22-block, 1024-wide
//! transformer over 100-bin mels with a 4-block ConvNeXt text refiner.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Backbone configuration.
///
/// Every field has a default, so a JSON file only needs the fields that
/// differ from the base model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiTConfig {
    /// Model (hidden) dimension `d`.
    #[serde(default = "default_dim")]
    pub dim: usize,

    /// Number of transformer blocks.
    #[serde(default = "default_depth")]
    pub depth: usize,

    /// Number of attention heads.
    #[serde(default = "default_heads")]
    pub heads: usize,

    /// Dimension per attention head. Also the rotary table width.
    #[serde(default = "default_dim_head")]
    pub dim_head: usize,

    /// Feed-forward expansion multiplier.
    #[serde(default = "default_ff_mult")]
    pub ff_mult: usize,

    /// Mel-spectrogram channel count.
    #[serde(default = "default_mel_dim")]
    pub mel_dim: usize,

    /// Text vocabulary size, excluding the reserved filler row.
    #[serde(default = "default_text_num_embeds")]
    pub text_num_embeds: usize,

    /// Text embedding width. `None` falls back to `mel_dim`.
    #[serde(default = "default_text_dim")]
    pub text_dim: Option<usize>,

    /// Number of ConvNeXt refinement blocks in the text encoder (0 disables
    /// the positional bias and the refiner).
    #[serde(default = "default_conv_layers")]
    pub conv_layers: usize,

    /// ConvNeXt hidden expansion multiplier.
    #[serde(default = "default_conv_mult")]
    pub conv_mult: usize,

    /// Add a `2d -> d` projection joining the pre-stack and post-stack state.
    #[serde(default)]
    pub long_skip_connection: bool,

    /// Positions covered by the text positional table (~44 s of 24 kHz audio).
    #[serde(default = "default_text_max_pos")]
    pub text_max_pos: usize,

    /// Width of the sinusoidal timestep features.
    #[serde(default = "default_freq_embed_dim")]
    pub freq_embed_dim: usize,

    /// RoPE base frequency.
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,

    /// Kernel size of the convolutional positional embedding.
    #[serde(default = "default_conv_pos_kernel")]
    pub conv_pos_kernel: usize,

    /// Group count of the convolutional positional embedding.
    #[serde(default = "default_conv_pos_groups")]
    pub conv_pos_groups: usize,

    /// Epsilon of the non-affine layer norms.
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f64,
}

impl Default for DiTConfig {
    fn default() -> Self {
        Self {
            dim: default_dim(),
            depth: default_depth(),
            heads: default_heads(),
            dim_head: default_dim_head(),
            ff_mult: default_ff_mult(),
            mel_dim: default_mel_dim(),
            text_num_embeds: default_text_num_embeds(),
            text_dim: default_text_dim(),
            conv_layers: default_conv_layers(),
            conv_mult: default_conv_mult(),
            long_skip_connection: false,
            text_max_pos: default_text_max_pos(),
            freq_embed_dim: default_freq_embed_dim(),
            rope_theta: default_rope_theta(),
            conv_pos_kernel: default_conv_pos_kernel(),
            conv_pos_groups: default_conv_pos_groups(),
            norm_eps: default_norm_eps(),
        }
    }
}

impl DiTConfig {
    /// Parse a config from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Effective text embedding width.
    pub fn text_dim(&self) -> usize {
        self.text_dim.unwrap_or(self.mel_dim)
    }

    /// Attention inner width (`heads × dim_head`).
    pub fn inner_dim(&self) -> usize {
        self.heads * self.dim_head
    }

    /// Check structural constraints. Called by the model constructor.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dim", self.dim),
            ("depth", self.depth),
            ("heads", self.heads),
            ("dim_head", self.dim_head),
            ("ff_mult", self.ff_mult),
            ("mel_dim", self.mel_dim),
            ("text_num_embeds", self.text_num_embeds),
            ("conv_mult", self.conv_mult),
            ("text_max_pos", self.text_max_pos),
            ("freq_embed_dim", self.freq_embed_dim),
            ("conv_pos_kernel", self.conv_pos_kernel),
            ("conv_pos_groups", self.conv_pos_groups),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::config(format!("{name} must be positive")));
            }
        }
        if self.text_dim() == 0 {
            return Err(Error::config("text_dim must be positive"));
        }
        if self.dim_head % 2 != 0 {
            return Err(Error::config(format!(
                "dim_head must be even for rotary pairs, got {}",
                self.dim_head
            )));
        }
        if self.freq_embed_dim % 2 != 0 || self.freq_embed_dim < 4 {
            return Err(Error::config(format!(
                "freq_embed_dim must be even and at least 4, got {}",
                self.freq_embed_dim
            )));
        }
        if self.dim % self.conv_pos_groups != 0 {
            return Err(Error::config(format!(
                "dim {} is not divisible by conv_pos_groups {}",
                self.dim, self.conv_pos_groups
            )));
        }
        if self.conv_pos_kernel % 2 == 0 {
            return Err(Error::config(format!(
                "conv_pos_kernel must be odd to preserve length, got {}",
                self.conv_pos_kernel
            )));
        }
        if self.conv_layers > 0 && self.text_dim() % 2 != 0 {
            return Err(Error::config(format!(
                "text_dim must be even when conv_layers > 0, got {}",
                self.text_dim()
            )));
        }
        if self.rope_theta.is_nan() || self.rope_theta <= 0.0 {
            return Err(Error::config("rope_theta must be positive"));
        }
        if self.norm_eps.is_nan() || self.norm_eps <= 0.0 {
            return Err(Error::config("norm_eps must be positive"));
        }
        Ok(())
    }
}

fn default_dim() -> usize {
    1024
}
fn default_depth() -> usize {
    22
}
fn default_heads() -> usize {
    16
}
fn default_dim_head() -> usize {
    64
}
fn default_ff_mult() -> usize {
    2
}
fn default_mel_dim() -> usize {
    100
}
fn default_text_num_embeds() -> usize {
    2545
}
fn default_text_dim() -> Option<usize> {
    Some(512)
}
fn default_conv_layers() -> usize {
    4
}
fn default_conv_mult() -> usize {
    2
}
fn default_text_max_pos() -> usize {
    4096
}
fn default_freq_embed_dim() -> usize {
    256
}
fn default_rope_theta() -> f64 {
    10_000.0
}
fn default_conv_pos_kernel() -> usize {
    31
}
fn default_conv_pos_groups() -> usize {
    16
}
fn default_norm_eps() -> f64 {
    1e-6
}
