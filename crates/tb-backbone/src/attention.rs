use tb_tensor::{ComputeBackend, DType};

use crate::config::BackboneConfig;
use crate::error::{BackboneError, Result};
use crate::kv_cache::{InferenceParams, LayerKvCache};
use crate::rope;

/// A sequence-mixing layer inside a transformer block.
///
/// Grouped-query attention is the only implementation today; the trait is
/// the seam an alternate mixer (e.g. a state-space layer) would plug into.
pub trait SequenceMixer: Send + Sync {
    /// Mix a hidden-state chunk.
    ///
    /// - `x`: flat [batch, seq, d_model] hidden states
    /// - `freqs`: rotary slice for this chunk, flat [batch, seq, head_dim/2, 2]
    /// - `params`: session state; the mixer writes its layer's cache slot
    fn forward(
        &self,
        x: &[f32],
        batch: usize,
        seq: usize,
        params: &mut InferenceParams,
        freqs: &[f32],
        backend: &dyn ComputeBackend,
    ) -> Result<Vec<f32>>;

    /// Allocate this layer's cache buffer for a generation session.
    fn allocate_layer_cache(
        &self,
        batch_size: usize,
        max_seqlen: usize,
        dtype: DType,
    ) -> Result<LayerKvCache>;
}

/// Grouped-query causal attention with incremental KV caching.
#[derive(Debug)]
pub struct Attention {
    num_heads: usize,
    num_heads_kv: usize,
    head_dim: usize,
    d_model: usize,
    layer_idx: usize,
    /// Fused q/k/v projection, [(num_heads + 2*num_heads_kv) * head_dim, d_model].
    in_proj: Vec<f32>,
    /// Output projection, [d_model, num_heads * head_dim].
    out_proj: Vec<f32>,
}

impl Attention {
    pub fn new(
        config: &BackboneConfig,
        layer_idx: usize,
        in_proj: Vec<f32>,
        out_proj: Vec<f32>,
    ) -> Self {
        Attention {
            num_heads: config.attn_cfg.num_heads,
            num_heads_kv: config.attn_cfg.num_heads_kv,
            head_dim: config.head_dim(),
            d_model: config.d_model,
            layer_idx,
            in_proj,
            out_proj,
        }
    }
}

impl SequenceMixer for Attention {
    fn forward(
        &self,
        x: &[f32],
        batch: usize,
        seq: usize,
        params: &mut InferenceParams,
        freqs: &[f32],
        backend: &dyn ComputeBackend,
    ) -> Result<Vec<f32>> {
        let q_size = self.num_heads * self.head_dim;
        let kv_size = self.num_heads_kv * self.head_dim;
        let n_tokens = batch * seq;

        if x.len() != n_tokens * self.d_model {
            return Err(BackboneError::HiddenShapeMismatch {
                d_model: self.d_model,
                got: vec![x.len()],
            });
        }
        if freqs.len() != n_tokens * self.head_dim {
            return Err(BackboneError::RotarySliceMismatch {
                expected: n_tokens * self.head_dim,
                got: freqs.len(),
            });
        }

        // Fused projection, then split each token row into q/k/v spans.
        let qkv = backend.linear(x, &self.in_proj, n_tokens, self.d_model, q_size + 2 * kv_size)?;
        let mut q = vec![0.0f32; n_tokens * q_size];
        let mut k = vec![0.0f32; n_tokens * kv_size];
        let mut v = vec![0.0f32; n_tokens * kv_size];
        let row = q_size + 2 * kv_size;
        for t in 0..n_tokens {
            let src = t * row;
            q[t * q_size..(t + 1) * q_size].copy_from_slice(&qkv[src..src + q_size]);
            k[t * kv_size..(t + 1) * kv_size]
                .copy_from_slice(&qkv[src + q_size..src + q_size + kv_size]);
            v[t * kv_size..(t + 1) * kv_size]
                .copy_from_slice(&qkv[src + q_size + kv_size..src + row]);
        }

        // Rotate queries and keys per token; values are never rotated.
        for t in 0..n_tokens {
            let f = &freqs[t * self.head_dim..(t + 1) * self.head_dim];
            rope::apply_rotary(
                &mut q[t * q_size..(t + 1) * q_size],
                self.num_heads,
                self.head_dim,
                f,
            );
            rope::apply_rotary(
                &mut k[t * kv_size..(t + 1) * kv_size],
                self.num_heads_kv,
                self.head_dim,
                f,
            );
        }

        // Write this chunk into the layer's cache slot and read back the
        // full valid prefix, so attention sees all prior context.
        let batch_offset = params.batch_size_offset;
        let seq_offset = params.seqlen_offset;
        let cache = params.layer_cache_mut(self.layer_idx)?;
        let prefix = cache.update(&k, &v, batch_offset, batch, seq_offset, seq)?;

        // (batch, seq, heads, head_dim) -> (batch, heads, seq, head_dim).
        let q_t = to_heads_major(&q, batch, seq, self.num_heads, self.head_dim);
        let k_t = to_heads_major(&prefix.k, batch, prefix.seq_len, self.num_heads_kv, self.head_dim);
        let v_t = to_heads_major(&prefix.v, batch, prefix.seq_len, self.num_heads_kv, self.head_dim);

        // Causal masking is only needed for multi-token prefill chunks; a
        // single-step decode already sees nothing past its own position.
        let y = backend.sdpa(
            &q_t,
            &k_t,
            &v_t,
            batch,
            self.num_heads,
            self.num_heads_kv,
            seq,
            prefix.seq_len,
            self.head_dim,
            seq > 1,
        )?;

        let y = to_seq_major(&y, batch, self.num_heads, seq, self.head_dim);
        backend
            .linear(&y, &self.out_proj, n_tokens, q_size, self.d_model)
            .map_err(Into::into)
    }

    fn allocate_layer_cache(
        &self,
        batch_size: usize,
        max_seqlen: usize,
        dtype: DType,
    ) -> Result<LayerKvCache> {
        LayerKvCache::new(
            batch_size,
            max_seqlen,
            self.num_heads_kv,
            self.head_dim,
            dtype,
        )
    }
}

/// [batch, seq, heads, head_dim] -> [batch, heads, seq, head_dim].
fn to_heads_major(x: &[f32], batch: usize, seq: usize, heads: usize, head_dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; x.len()];
    for b in 0..batch {
        for s in 0..seq {
            for h in 0..heads {
                let src = ((b * seq + s) * heads + h) * head_dim;
                let dst = ((b * heads + h) * seq + s) * head_dim;
                out[dst..dst + head_dim].copy_from_slice(&x[src..src + head_dim]);
            }
        }
    }
    out
}

/// [batch, heads, seq, head_dim] -> [batch, seq, heads * head_dim].
fn to_seq_major(x: &[f32], batch: usize, heads: usize, seq: usize, head_dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; x.len()];
    for b in 0..batch {
        for h in 0..heads {
            for s in 0..seq {
                let src = ((b * heads + h) * seq + s) * head_dim;
                let dst = ((b * seq + s) * heads + h) * head_dim;
                out[dst..dst + head_dim].copy_from_slice(&x[src..src + head_dim]);
            }
        }
    }
    out
}
