use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends (CPU, Metal, CUDA, etc.).
///
/// All operations work on f32 slices. Data is passed in as slices and
/// returned as owned vectors. The backend is responsible for performing
/// the computation and returning the result.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "metal").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Linear projection: Y = X @ W^T.
    ///
    /// Projection weights are stored [out_dim, in_dim] row-major, so each
    /// output element is a dot product of an input row with a weight row.
    ///
    /// - `x`: row-major data of shape [n_rows, in_dim]
    /// - `w`: row-major data of shape [out_dim, in_dim]
    /// - Returns: row-major data of shape [n_rows, out_dim]
    fn linear(
        &self,
        x: &[f32],
        w: &[f32],
        n_rows: usize,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication: result[i] = a[i] * b[i].
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// SiLU activation: result[i] = x[i] * sigmoid(x[i]) = x[i] / (1 + exp(-x[i])).
    fn silu(&self, x: &[f32]) -> Result<Vec<f32>>;

    /// Softmax over chunks of `n` elements.
    ///
    /// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>>;

    /// Layer normalization with affine transform.
    ///
    /// For each row of `hidden_size` elements in `x`:
    ///   mean = mean(x)
    ///   var  = mean((x - mean)^2)
    ///   result[i] = (x[i] - mean) / sqrt(var + eps) * weight[i] + bias[i]
    ///
    /// - `x`: input data, length must be a multiple of `hidden_size`
    /// - `weight`, `bias`: per-element affine parameters, length == `hidden_size`
    fn layer_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        bias: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>>;

    /// Fused scaled-dot-product attention with grouped-query broadcasting.
    ///
    /// Layouts (row-major):
    /// - `q`: [batch, n_heads_q, seq_q, head_dim]
    /// - `k`, `v`: [batch, n_heads_kv, seq_kv, head_dim]
    /// - Returns: [batch, n_heads_q, seq_q, head_dim]
    ///
    /// `n_heads_q` must be divisible by `n_heads_kv`; query head `h` attends
    /// through kv head `h / (n_heads_q / n_heads_kv)`.
    ///
    /// When `causal` is true, query row `i` may only attend kv columns
    /// `j <= seq_kv - seq_q + i` (the kv sequence is assumed to end at the
    /// same absolute position as the query chunk). Requires `seq_kv >= seq_q`.
    /// Scores are scaled by `1/sqrt(head_dim)` with max-subtracted softmax.
    #[allow(clippy::too_many_arguments)]
    fn sdpa(
        &self,
        q: &[f32],
        k: &[f32],
        v: &[f32],
        batch: usize,
        n_heads_q: usize,
        n_heads_kv: usize,
        seq_q: usize,
        seq_kv: usize,
        head_dim: usize,
        causal: bool,
    ) -> Result<Vec<f32>>;
}
