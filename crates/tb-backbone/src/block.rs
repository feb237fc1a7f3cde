use tb_tensor::{ComputeBackend, DType};

use crate::attention::{Attention, SequenceMixer};
use crate::config::BackboneConfig;
use crate::error::Result;
use crate::feed_forward::FeedForward;
use crate::kv_cache::{InferenceParams, LayerKvCache};
use crate::weights::BlockWeights;

/// One pre-norm transformer block.
///
/// `x = x + Mixer(LN(x))`, then `x = x + FFN(LN2(x))`. The block owns its
/// two LayerNorms, its sequence mixer (carrying the layer index used for
/// cache addressing), and its feed-forward; the rotary slice is passed down
/// from the backbone.
pub struct TransformerBlock {
    norm_w: Vec<f32>,
    norm_b: Vec<f32>,
    norm2_w: Vec<f32>,
    norm2_b: Vec<f32>,
    mixer: Box<dyn SequenceMixer>,
    mlp: FeedForward,
    d_model: usize,
    norm_epsilon: f32,
}

impl TransformerBlock {
    pub fn new(config: &BackboneConfig, layer_idx: usize, weights: BlockWeights) -> Self {
        let mixer = Attention::new(config, layer_idx, weights.in_proj, weights.out_proj);
        let mlp = FeedForward::new(config, weights.fc1, weights.fc2);
        TransformerBlock {
            norm_w: weights.norm_w,
            norm_b: weights.norm_b,
            norm2_w: weights.norm2_w,
            norm2_b: weights.norm2_b,
            mixer: Box::new(mixer),
            mlp,
            d_model: config.d_model,
            norm_epsilon: config.norm_epsilon,
        }
    }

    /// Allocate this block's KV cache buffer for a generation session.
    pub fn allocate_layer_cache(
        &self,
        batch_size: usize,
        max_seqlen: usize,
        dtype: DType,
    ) -> Result<LayerKvCache> {
        self.mixer.allocate_layer_cache(batch_size, max_seqlen, dtype)
    }

    /// Forward one chunk through the block.
    pub fn forward(
        &self,
        x: &[f32],
        batch: usize,
        seq: usize,
        params: &mut InferenceParams,
        freqs: &[f32],
        backend: &dyn ComputeBackend,
    ) -> Result<Vec<f32>> {
        let n_tokens = batch * seq;

        let normed = backend.layer_norm(x, &self.norm_w, &self.norm_b, self.norm_epsilon, self.d_model)?;
        let mixed = self
            .mixer
            .forward(&normed, batch, seq, params, freqs, backend)?;
        let x = backend.add(x, &mixed)?;

        let normed2 =
            backend.layer_norm(&x, &self.norm2_w, &self.norm2_b, self.norm_epsilon, self.d_model)?;
        let ff = self.mlp.forward(&normed2, n_tokens, backend)?;
        backend.add(&x, &ff).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_tensor::CpuBackend;

    use crate::rope::RotaryTable;

    #[test]
    fn test_zero_weights_are_identity() {
        // With all-zero weights the mixer and FFN contribute nothing, so the
        // residual path passes the input through unchanged.
        let cfg = BackboneConfig::new(8, 1, 2, 1, 16);
        let block = TransformerBlock::new(&cfg, 0, BlockWeights::zeros(&cfg));
        let backend = CpuBackend::new();

        let cache = block.allocate_layer_cache(1, 4, DType::F32).unwrap();
        let mut params = InferenceParams::new(vec![cache], 1);
        let table = RotaryTable::new(16, cfg.head_dim(), cfg.rope_theta).unwrap();

        let x: Vec<f32> = (0..2 * 8).map(|i| i as f32 * 0.5).collect();
        let freqs = table.gather(&[0, 1]).unwrap();
        let y = block.forward(&x, 1, 2, &mut params, &freqs, &backend).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_cache_capacity_error_propagates() {
        let cfg = BackboneConfig::new(8, 1, 2, 1, 16);
        let block = TransformerBlock::new(&cfg, 0, BlockWeights::zeros(&cfg));
        let backend = CpuBackend::new();

        let cache = block.allocate_layer_cache(1, 2, DType::F32).unwrap();
        let mut params = InferenceParams::new(vec![cache], 1);
        let table = RotaryTable::new(16, cfg.head_dim(), cfg.rope_theta).unwrap();

        // 3 tokens into a cache of capacity 2.
        let x = vec![0.0f32; 3 * 8];
        let freqs = table.gather(&[0, 1, 2]).unwrap();
        assert!(block
            .forward(&x, 1, 3, &mut params, &freqs, &backend)
            .is_err());
    }
}
