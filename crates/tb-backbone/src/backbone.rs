use tb_tensor::{ComputeBackend, DType, Tensor};

use crate::block::TransformerBlock;
use crate::config::BackboneConfig;
use crate::error::{BackboneError, Result};
use crate::kv_cache::{InferenceParams, LayerKvCache};
use crate::rope::RotaryTable;
use crate::weights::BackboneWeights;

/// The autoregressive transformer backbone of the token predictor.
///
/// Owns the ordered block stack, the final LayerNorm, and the rotary table.
/// The table is absent until `allocate_inference_cache` runs; `forward`
/// treats that as a distinct, checkable error state. Once built, the
/// backbone is read-only during forward passes and may serve concurrent
/// sessions, each with its own `InferenceParams`.
pub struct Backbone {
    config: BackboneConfig,
    blocks: Vec<TransformerBlock>,
    norm_f_w: Vec<f32>,
    norm_f_b: Vec<f32>,
    rope: Option<RotaryTable>,
}

impl Backbone {
    /// Build the backbone from a configuration and its weights.
    ///
    /// Fails fast on an unsupported mixer variant or malformed dimensions,
    /// before any allocation.
    pub fn new(config: BackboneConfig, weights: BackboneWeights) -> Result<Self> {
        config.validate()?;
        weights.validate(&config)?;

        let blocks = weights
            .layers
            .into_iter()
            .enumerate()
            .map(|(i, w)| TransformerBlock::new(&config, i, w))
            .collect();

        Ok(Backbone {
            blocks,
            norm_f_w: weights.norm_f_w,
            norm_f_b: weights.norm_f_b,
            config,
            rope: None,
        })
    }

    pub fn config(&self) -> &BackboneConfig {
        &self.config
    }

    /// Build the rotary table and allocate every layer's cache buffer for a
    /// generation session.
    ///
    /// The rotary table is sized at `config.rope_capacity` positions, as
    /// deliberate headroom decoupled from `max_seqlen`; a `max_seqlen`
    /// beyond that capacity is rejected. The returned dense layer-indexed
    /// vector must be installed into `InferenceParams` before any forward
    /// call.
    pub fn allocate_inference_cache(
        &mut self,
        batch_size: usize,
        max_seqlen: usize,
        dtype: DType,
    ) -> Result<Vec<LayerKvCache>> {
        if max_seqlen > self.config.rope_capacity {
            return Err(BackboneError::InvalidConfig(format!(
                "max_seqlen {} exceeds rotary table capacity {}",
                max_seqlen, self.config.rope_capacity
            )));
        }

        self.rope = Some(RotaryTable::new(
            self.config.rope_capacity,
            self.config.head_dim(),
            self.config.rope_theta,
        )?);

        self.blocks
            .iter()
            .map(|block| block.allocate_layer_cache(batch_size, max_seqlen, dtype))
            .collect()
    }

    /// Contextualize one chunk of hidden states.
    ///
    /// `hidden` is an f32 tensor of shape (batch, seq, d_model). Absolute
    /// positions come from `lengths_per_sample`, so different sequences in
    /// the batch may sit at different offsets. The output has the input's
    /// shape.
    pub fn forward(
        &self,
        hidden: &Tensor,
        params: &mut InferenceParams,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        let rope = self.rope.as_ref().ok_or(BackboneError::CacheNotAllocated)?;

        let (batch, seq, d_model) = hidden.dims3().map_err(|_| {
            BackboneError::HiddenShapeMismatch {
                d_model: self.config.d_model,
                got: hidden.shape().dims().to_vec(),
            }
        })?;
        if d_model != self.config.d_model {
            return Err(BackboneError::HiddenShapeMismatch {
                d_model: self.config.d_model,
                got: hidden.shape().dims().to_vec(),
            });
        }
        if params.lengths_per_sample.len() != batch {
            return Err(BackboneError::LengthsMismatch {
                expected: batch,
                got: params.lengths_per_sample.len(),
            });
        }

        // Absolute position of token t of sequence b is
        // lengths_per_sample[b] + t.
        let mut positions = Vec::with_capacity(batch * seq);
        for b in 0..batch {
            let base = params.lengths_per_sample[b];
            for t in 0..seq {
                positions.push(base + t);
            }
        }
        let freqs = rope.gather(&positions)?;

        let mut x = hidden.as_f32()?.to_vec();
        for block in &self.blocks {
            x = block.forward(&x, batch, seq, params, &freqs, backend)?;
        }

        let out = backend.layer_norm(
            &x,
            &self.norm_f_w,
            &self.norm_f_b,
            self.config.norm_epsilon,
            self.config.d_model,
        )?;
        Ok(Tensor::new(out, hidden.shape().clone()))
    }
}
