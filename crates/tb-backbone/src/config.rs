use crate::error::{BackboneError, Result};

/// Default RoPE frequency base.
pub const DEFAULT_ROPE_THETA: f32 = 10000.0;

/// Default rotary table capacity in positions.
///
/// Deliberate headroom over typical `max_seqlen` values so one table serves
/// any session the cache can hold; `allocate_inference_cache` rejects a
/// `max_seqlen` beyond this.
pub const DEFAULT_ROPE_CAPACITY: usize = 16384;

/// The kind of sequence-mixing layer the backbone is built from.
///
/// Only `Transformer` is implemented; `Ssm` is representable so that a
/// configuration requesting it fails fast at construction instead of
/// being silently misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerKind {
    Transformer,
    Ssm,
}

/// Attention head layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionConfig {
    /// Number of query heads.
    pub num_heads: usize,
    /// Number of key/value heads (GQA); must divide `num_heads`.
    pub num_heads_kv: usize,
}

/// Hyperparameters for the token-predictor backbone.
#[derive(Debug, Clone)]
pub struct BackboneConfig {
    /// Hidden size flowing between blocks.
    pub d_model: usize,
    /// Number of transformer blocks.
    pub n_layer: usize,
    /// LayerNorm epsilon.
    pub norm_epsilon: f32,
    /// Attention head layout.
    pub attn_cfg: AttentionConfig,
    /// Feed-forward intermediate dimension.
    pub attn_mlp_d_intermediate: usize,
    /// Sequence-mixer variant.
    pub mixer: MixerKind,
    /// RoPE frequency base.
    pub rope_theta: f32,
    /// Rotary table capacity in positions.
    pub rope_capacity: usize,
}

impl BackboneConfig {
    /// Create a transformer configuration with default epsilon and RoPE
    /// parameters.
    pub fn new(
        d_model: usize,
        n_layer: usize,
        num_heads: usize,
        num_heads_kv: usize,
        attn_mlp_d_intermediate: usize,
    ) -> Self {
        BackboneConfig {
            d_model,
            n_layer,
            norm_epsilon: 1e-5,
            attn_cfg: AttentionConfig {
                num_heads,
                num_heads_kv,
            },
            attn_mlp_d_intermediate,
            mixer: MixerKind::Transformer,
            rope_theta: DEFAULT_ROPE_THETA,
            rope_capacity: DEFAULT_ROPE_CAPACITY,
        }
    }

    /// Dimension of each attention head (d_model / num_heads).
    pub fn head_dim(&self) -> usize {
        self.d_model / self.attn_cfg.num_heads
    }

    /// Validate the configuration, failing fast before any allocation.
    pub fn validate(&self) -> Result<()> {
        if self.mixer != MixerKind::Transformer {
            return Err(BackboneError::UnsupportedArchitecture(
                "this backbone only supports the transformer mixer".to_string(),
            ));
        }
        if self.d_model == 0
            || self.n_layer == 0
            || self.attn_cfg.num_heads == 0
            || self.attn_cfg.num_heads_kv == 0
            || self.attn_mlp_d_intermediate == 0
        {
            return Err(BackboneError::InvalidConfig(
                "all dimensions must be non-zero".to_string(),
            ));
        }
        if self.d_model % self.attn_cfg.num_heads != 0 {
            return Err(BackboneError::InvalidConfig(format!(
                "d_model {} is not divisible by num_heads {}",
                self.d_model, self.attn_cfg.num_heads
            )));
        }
        if self.attn_cfg.num_heads % self.attn_cfg.num_heads_kv != 0 {
            return Err(BackboneError::InvalidConfig(format!(
                "num_heads {} is not divisible by num_heads_kv {}",
                self.attn_cfg.num_heads, self.attn_cfg.num_heads_kv
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(BackboneError::InvalidConfig(format!(
                "head_dim {} must be even for rotary embedding",
                self.head_dim()
            )));
        }
        if self.rope_capacity == 0 {
            return Err(BackboneError::InvalidConfig(
                "rope_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let cfg = BackboneConfig::new(64, 2, 4, 2, 128);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.head_dim(), 16);
    }

    #[test]
    fn test_rejects_ssm() {
        let mut cfg = BackboneConfig::new(64, 2, 4, 2, 128);
        cfg.mixer = MixerKind::Ssm;
        assert!(matches!(
            cfg.validate(),
            Err(BackboneError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let cfg = BackboneConfig::new(64, 2, 4, 3, 128);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_odd_head_dim() {
        // d_model 12 / 4 heads = head_dim 3.
        let cfg = BackboneConfig::new(12, 1, 4, 4, 32);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_dims() {
        let cfg = BackboneConfig::new(0, 2, 4, 2, 128);
        assert!(cfg.validate().is_err());
    }
}
