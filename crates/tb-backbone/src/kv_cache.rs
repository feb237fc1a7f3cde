use half::{bf16, f16};
use tb_tensor::DType;

use crate::error::{BackboneError, Result};

/// The valid key/value prefix returned by a cache update.
///
/// `k` and `v` are flat [batch, seq_len, num_heads_kv, head_dim] copies
/// covering sequence positions `0..seq_len` of the addressed batch window.
#[derive(Debug, Clone)]
pub struct KvPrefix {
    pub k: Vec<f32>,
    pub v: Vec<f32>,
    pub batch: usize,
    pub seq_len: usize,
}

/// Preallocated key/value cache for one transformer layer.
///
/// The buffer is logically shaped
/// [batch_capacity, seq_capacity, 2, num_heads_kv, head_dim], with axis 2
/// selecting key (0) vs value (1). Allocated once per generation session;
/// writes are addressed by batch/sequence offsets supplied by the driver.
///
/// Values compute in f32. When the cache is allocated as F16 or BF16, each
/// written element is rounded through that precision, matching the numeric
/// behavior of a genuinely narrow buffer.
#[derive(Debug, Clone)]
pub struct LayerKvCache {
    data: Vec<f32>,
    batch_capacity: usize,
    seq_capacity: usize,
    num_heads_kv: usize,
    head_dim: usize,
    dtype: DType,
}

impl LayerKvCache {
    /// Allocate a zeroed cache for the given capacities.
    pub fn new(
        batch_capacity: usize,
        seq_capacity: usize,
        num_heads_kv: usize,
        head_dim: usize,
        dtype: DType,
    ) -> Result<Self> {
        if batch_capacity == 0 || seq_capacity == 0 || num_heads_kv == 0 || head_dim == 0 {
            return Err(BackboneError::InvalidConfig(
                "kv cache dimensions must be non-zero".to_string(),
            ));
        }
        let size = batch_capacity * seq_capacity * 2 * num_heads_kv * head_dim;
        Ok(LayerKvCache {
            data: vec![0.0; size],
            batch_capacity,
            seq_capacity,
            num_heads_kv,
            head_dim,
            dtype,
        })
    }

    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    pub fn seq_capacity(&self) -> usize {
        self.seq_capacity
    }

    pub fn num_heads_kv(&self) -> usize {
        self.num_heads_kv
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    fn kv_dim(&self) -> usize {
        self.num_heads_kv * self.head_dim
    }

    /// Flat offset of the (batch, seq, slot) vector; slot 0 = key, 1 = value.
    fn index(&self, b: usize, s: usize, slot: usize) -> usize {
        ((b * self.seq_capacity + s) * 2 + slot) * self.kv_dim()
    }

    /// Write a key/value chunk at the addressed batch/sequence window and
    /// return the full valid prefix for that batch window.
    ///
    /// `k` and `v` are flat [batch_chunk, seq_chunk, num_heads_kv, head_dim].
    /// All capacity and size checks happen before the buffer is touched, so
    /// a failed update leaves the cache unmodified. On success the returned
    /// prefix covers sequence positions `0..seq_offset + seq_chunk`: all
    /// prior context, not just the newly written slice.
    pub fn update(
        &mut self,
        k: &[f32],
        v: &[f32],
        batch_offset: usize,
        batch_chunk: usize,
        seq_offset: usize,
        seq_chunk: usize,
    ) -> Result<KvPrefix> {
        let kv_dim = self.kv_dim();
        let expected = batch_chunk * seq_chunk * kv_dim;
        if k.len() != expected {
            return Err(BackboneError::KvSizeMismatch {
                expected,
                got: k.len(),
            });
        }
        if v.len() != expected {
            return Err(BackboneError::KvSizeMismatch {
                expected,
                got: v.len(),
            });
        }
        if batch_offset + batch_chunk > self.batch_capacity {
            return Err(BackboneError::BatchCapacityExceeded {
                offset: batch_offset,
                chunk: batch_chunk,
                capacity: self.batch_capacity,
            });
        }
        if seq_offset + seq_chunk > self.seq_capacity {
            return Err(BackboneError::SeqCapacityExceeded {
                offset: seq_offset,
                chunk: seq_chunk,
                capacity: self.seq_capacity,
            });
        }

        let dtype = self.dtype;
        for bi in 0..batch_chunk {
            for si in 0..seq_chunk {
                let src = (bi * seq_chunk + si) * kv_dim;
                let kd = self.index(batch_offset + bi, seq_offset + si, 0);
                let vd = self.index(batch_offset + bi, seq_offset + si, 1);
                for d in 0..kv_dim {
                    self.data[kd + d] = narrow(dtype, k[src + d]);
                    self.data[vd + d] = narrow(dtype, v[src + d]);
                }
            }
        }

        let seq_len = seq_offset + seq_chunk;
        let mut pk = Vec::with_capacity(batch_chunk * seq_len * kv_dim);
        let mut pv = Vec::with_capacity(batch_chunk * seq_len * kv_dim);
        for bi in 0..batch_chunk {
            for s in 0..seq_len {
                let kd = self.index(batch_offset + bi, s, 0);
                let vd = self.index(batch_offset + bi, s, 1);
                pk.extend_from_slice(&self.data[kd..kd + kv_dim]);
                pv.extend_from_slice(&self.data[vd..vd + kv_dim]);
            }
        }

        Ok(KvPrefix {
            k: pk,
            v: pv,
            batch: batch_chunk,
            seq_len,
        })
    }
}

/// Round a value through the cache's storage precision.
fn narrow(dtype: DType, x: f32) -> f32 {
    match dtype {
        DType::F32 => x,
        DType::F16 => f16::from_f32(x).to_f32(),
        DType::BF16 => bf16::from_f32(x).to_f32(),
    }
}

/// Per-session decoding state owned by the generation driver.
///
/// The driver creates this once per session, installs the per-layer caches
/// returned by `Backbone::allocate_inference_cache`, and advances
/// `seqlen_offset` / `lengths_per_sample` between steps. The backbone only
/// writes cache contents; it never mutates the offsets. Layer caches live
/// in a dense vector indexed by layer, keeping the decode path free of
/// hashing.
#[derive(Debug)]
pub struct InferenceParams {
    /// First batch row this session occupies in the caches.
    pub batch_size_offset: usize,
    /// Sequence position the next chunk will be written at.
    pub seqlen_offset: usize,
    /// Current absolute position of each sequence in the batch.
    pub lengths_per_sample: Vec<usize>,
    layer_caches: Vec<LayerKvCache>,
}

impl InferenceParams {
    /// Create session state over the given per-layer caches, with all
    /// offsets and lengths at zero.
    pub fn new(layer_caches: Vec<LayerKvCache>, batch_size: usize) -> Self {
        InferenceParams {
            batch_size_offset: 0,
            seqlen_offset: 0,
            lengths_per_sample: vec![0; batch_size],
            layer_caches,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layer_caches.len()
    }

    pub fn layer_cache(&self, layer: usize) -> Option<&LayerKvCache> {
        self.layer_caches.get(layer)
    }

    pub fn layer_cache_mut(&mut self, layer: usize) -> Result<&mut LayerKvCache> {
        self.layer_caches
            .get_mut(layer)
            .ok_or(BackboneError::LayerCacheMissing { layer })
    }
}
