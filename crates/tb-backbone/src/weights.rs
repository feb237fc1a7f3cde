use crate::config::BackboneConfig;
use crate::error::{BackboneError, Result};

/// Weight tensors for a single transformer block.
///
/// All weights are stored as flat f32 vectors in row-major order, with
/// projections in [out_dim, in_dim] layout. Loading and serialization are
/// external collaborators; callers assemble these directly.
#[derive(Debug, Clone)]
pub struct BlockWeights {
    /// LayerNorm weight for the attention sub-layer, length = d_model.
    pub norm_w: Vec<f32>,
    /// LayerNorm bias for the attention sub-layer, length = d_model.
    pub norm_b: Vec<f32>,
    /// Fused q/k/v projection, shape [(num_heads + 2*num_heads_kv) * head_dim, d_model].
    pub in_proj: Vec<f32>,
    /// Attention output projection, shape [d_model, num_heads * head_dim].
    pub out_proj: Vec<f32>,
    /// LayerNorm weight for the feed-forward sub-layer, length = d_model.
    pub norm2_w: Vec<f32>,
    /// LayerNorm bias for the feed-forward sub-layer, length = d_model.
    pub norm2_b: Vec<f32>,
    /// Fused value/gate projection, shape [2 * d_intermediate, d_model].
    pub fc1: Vec<f32>,
    /// Down projection, shape [d_model, d_intermediate].
    pub fc2: Vec<f32>,
}

impl BlockWeights {
    /// Zero-filled weights sized for the given configuration.
    pub fn zeros(config: &BackboneConfig) -> Self {
        let d_model = config.d_model;
        let head_dim = config.head_dim();
        let q_size = config.attn_cfg.num_heads * head_dim;
        let kv_size = config.attn_cfg.num_heads_kv * head_dim;
        let d_inter = config.attn_mlp_d_intermediate;

        BlockWeights {
            norm_w: vec![0.0; d_model],
            norm_b: vec![0.0; d_model],
            in_proj: vec![0.0; (q_size + 2 * kv_size) * d_model],
            out_proj: vec![0.0; d_model * q_size],
            norm2_w: vec![0.0; d_model],
            norm2_b: vec![0.0; d_model],
            fc1: vec![0.0; 2 * d_inter * d_model],
            fc2: vec![0.0; d_model * d_inter],
        }
    }
}

/// All weight tensors for the backbone.
#[derive(Debug, Clone)]
pub struct BackboneWeights {
    /// Per-block weights, one entry per layer.
    pub layers: Vec<BlockWeights>,
    /// Final LayerNorm weight, length = d_model.
    pub norm_f_w: Vec<f32>,
    /// Final LayerNorm bias, length = d_model.
    pub norm_f_b: Vec<f32>,
}

impl BackboneWeights {
    /// Zero-filled weights sized for the given configuration.
    pub fn zeros(config: &BackboneConfig) -> Self {
        BackboneWeights {
            layers: (0..config.n_layer)
                .map(|_| BlockWeights::zeros(config))
                .collect(),
            norm_f_w: vec![0.0; config.d_model],
            norm_f_b: vec![0.0; config.d_model],
        }
    }

    /// Check every tensor length against the configuration.
    pub fn validate(&self, config: &BackboneConfig) -> Result<()> {
        let check = |name: String, expected: usize, got: usize| -> Result<()> {
            if expected != got {
                return Err(BackboneError::WeightSizeMismatch {
                    name,
                    expected,
                    got,
                });
            }
            Ok(())
        };

        if self.layers.len() != config.n_layer {
            return Err(BackboneError::InvalidConfig(format!(
                "{} layer weight sets for n_layer={}",
                self.layers.len(),
                config.n_layer
            )));
        }

        let d_model = config.d_model;
        let head_dim = config.head_dim();
        let q_size = config.attn_cfg.num_heads * head_dim;
        let kv_size = config.attn_cfg.num_heads_kv * head_dim;
        let d_inter = config.attn_mlp_d_intermediate;

        for (i, layer) in self.layers.iter().enumerate() {
            check(format!("layers[{}].norm_w", i), d_model, layer.norm_w.len())?;
            check(format!("layers[{}].norm_b", i), d_model, layer.norm_b.len())?;
            check(
                format!("layers[{}].in_proj", i),
                (q_size + 2 * kv_size) * d_model,
                layer.in_proj.len(),
            )?;
            check(
                format!("layers[{}].out_proj", i),
                d_model * q_size,
                layer.out_proj.len(),
            )?;
            check(format!("layers[{}].norm2_w", i), d_model, layer.norm2_w.len())?;
            check(format!("layers[{}].norm2_b", i), d_model, layer.norm2_b.len())?;
            check(
                format!("layers[{}].fc1", i),
                2 * d_inter * d_model,
                layer.fc1.len(),
            )?;
            check(
                format!("layers[{}].fc2", i),
                d_model * d_inter,
                layer.fc2.len(),
            )?;
        }

        check("norm_f_w".to_string(), d_model, self.norm_f_w.len())?;
        check("norm_f_b".to_string(), d_model, self.norm_f_b.len())?;
        Ok(())
    }
}
