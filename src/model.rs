//! Model components.
//!
//! ## Components
//!
//! - [`encoder`] — text token encoder and input fusion (audio + text → model width)
//! - [`transformer`] — AdaLN-Zero DiT blocks and the full backbone

pub mod encoder;
pub mod transformer;
