//! `tb-backbone` - Autoregressive transformer backbone for a text-to-speech
//! token predictor.
//!
//! Turns a chunk of hidden-state vectors into contextualized hidden states
//! using rotary positional embeddings, grouped-query causal attention with
//! an incremental per-layer KV cache, and gated feed-forward blocks. The
//! generation driver owns the step loop: it allocates the session caches,
//! installs them into `InferenceParams`, and advances the offsets between
//! steps.

pub mod attention;
pub mod backbone;
pub mod block;
pub mod config;
pub mod error;
pub mod feed_forward;
pub mod kv_cache;
pub mod rope;
pub mod weights;

pub use attention::{Attention, SequenceMixer};
pub use backbone::Backbone;
pub use block::TransformerBlock;
pub use config::{AttentionConfig, BackboneConfig, MixerKind};
pub use error::{BackboneError, Result};
pub use feed_forward::FeedForward;
pub use kv_cache::{InferenceParams, KvPrefix, LayerKvCache};
pub use rope::{apply_rotary, RotaryTable};
pub use weights::{BackboneWeights, BlockWeights};
