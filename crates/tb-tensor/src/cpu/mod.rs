mod sdpa;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        if a.len() != m * k {
            return Err(TensorError::Other(format!(
                "matmul: a.len()={} but expected m*k={}",
                a.len(),
                m * k
            )));
        }
        if b.len() != k * n {
            return Err(TensorError::Other(format!(
                "matmul: b.len()={} but expected k*n={}",
                b.len(),
                k * n
            )));
        }

        let mut c = vec![0.0f32; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0f32;
                for p in 0..k {
                    sum += a[i * k + p] * b[p * n + j];
                }
                c[i * n + j] = sum;
            }
        }
        Ok(c)
    }

    fn linear(
        &self,
        x: &[f32],
        w: &[f32],
        n_rows: usize,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Vec<f32>> {
        if x.len() != n_rows * in_dim {
            return Err(TensorError::Other(format!(
                "linear: x.len()={} but expected n_rows*in_dim={}",
                x.len(),
                n_rows * in_dim
            )));
        }
        if w.len() != out_dim * in_dim {
            return Err(TensorError::Other(format!(
                "linear: w.len()={} but expected out_dim*in_dim={}",
                w.len(),
                out_dim * in_dim
            )));
        }

        let mut y = vec![0.0f32; n_rows * out_dim];
        for r in 0..n_rows {
            let x_row = &x[r * in_dim..(r + 1) * in_dim];
            for o in 0..out_dim {
                let w_row = &w[o * in_dim..(o + 1) * in_dim];
                let mut sum = 0.0f32;
                for i in 0..in_dim {
                    sum += x_row[i] * w_row[i];
                }
                y[r * out_dim + o] = sum;
            }
        }
        Ok(y)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x + y).collect())
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).collect())
    }

    fn silu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(x.iter().map(|&v| v / (1.0 + (-v).exp())).collect())
    }

    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        if n == 0 {
            return Err(TensorError::Other("softmax: n must be > 0".to_string()));
        }
        if x.len() % n != 0 {
            return Err(TensorError::Other(format!(
                "softmax: x.len()={} is not a multiple of n={}",
                x.len(),
                n
            )));
        }

        let n_chunks = x.len() / n;
        let mut result = vec![0.0f32; x.len()];

        for chunk in 0..n_chunks {
            let offset = chunk * n;
            let chunk_data = &x[offset..offset + n];

            // Find max for numerical stability
            let max_val = chunk_data.iter().copied().fold(f32::NEG_INFINITY, f32::max);

            let mut sum = 0.0f32;
            for i in 0..n {
                let e = (chunk_data[i] - max_val).exp();
                result[offset + i] = e;
                sum += e;
            }

            for i in 0..n {
                result[offset + i] /= sum;
            }
        }

        Ok(result)
    }

    fn layer_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        bias: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        if weight.len() != hidden_size || bias.len() != hidden_size {
            return Err(TensorError::Other(format!(
                "layer_norm: weight.len()={} bias.len()={} but hidden_size={}",
                weight.len(),
                bias.len(),
                hidden_size
            )));
        }
        if hidden_size == 0 || x.len() % hidden_size != 0 {
            return Err(TensorError::Other(format!(
                "layer_norm: x.len()={} is not a multiple of hidden_size={}",
                x.len(),
                hidden_size
            )));
        }

        let n_rows = x.len() / hidden_size;
        let mut result = vec![0.0f32; x.len()];

        for row in 0..n_rows {
            let offset = row * hidden_size;
            let row_data = &x[offset..offset + hidden_size];

            let mean: f32 = row_data.iter().sum::<f32>() / hidden_size as f32;
            let var: f32 = row_data
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f32>()
                / hidden_size as f32;
            let inv_std = 1.0 / (var + eps).sqrt();

            for i in 0..hidden_size {
                result[offset + i] = (row_data[i] - mean) * inv_std * weight[i] + bias[i];
            }
        }

        Ok(result)
    }

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
    ) -> Result<Vec<f32>> {
        sdpa::sdpa_f32(
            q, k, v, batch, n_heads_q, n_heads_kv, seq_q, seq_kv, head_dim, causal,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_identity() {
        let b = backend();
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_basic() {
        let b = backend();
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let x = vec![5.0, 6.0, 7.0, 8.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_linear_matches_matmul_transposed() {
        let b = backend();
        // x: [2, 3], w: [2, 3] -> y = x @ w^T: [2, 2]
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let w = vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let y = b.linear(&x, &w, 2, 3, 2).unwrap();
        // Row 0: [1+3, 2], Row 1: [4+6, 5]
        assert_eq!(y, vec![4.0, 2.0, 10.0, 5.0]);
    }

    #[test]
    fn test_linear_size_mismatch() {
        let b = backend();
        assert!(b.linear(&[1.0, 2.0], &[1.0, 2.0, 3.0], 1, 2, 2).is_err());
    }

    #[test]
    fn test_add() {
        let b = backend();
        let r = b.add(&[1.0, 2.0], &[3.0, 4.0]).unwrap();
        assert_eq!(r, vec![4.0, 6.0]);
    }

    #[test]
    fn test_mul() {
        let b = backend();
        let r = b.mul(&[2.0, 3.0], &[4.0, 5.0]).unwrap();
        assert_eq!(r, vec![8.0, 15.0]);
    }

    #[test]
    fn test_add_length_mismatch() {
        let b = backend();
        assert!(b.add(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_silu() {
        let b = backend();
        let r = b.silu(&[0.0]).unwrap();
        // silu(0) = 0 / (1 + 1) = 0
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-6);

        let r2 = b.silu(&[1.0]).unwrap();
        // silu(1) = 1 / (1 + exp(-1)) ~= 0.7310586
        assert_relative_eq!(r2[0], 0.7310586, epsilon = 1e-5);
    }

    #[test]
    fn test_softmax() {
        let b = backend();
        let r = b.softmax(&[1.0, 2.0, 3.0], 3).unwrap();
        let sum: f32 = r.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(r[0] < r[1]);
        assert!(r[1] < r[2]);
    }

    #[test]
    fn test_layer_norm_zero_mean_unit_var() {
        let b = backend();
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let w = vec![1.0; 4];
        let bias = vec![0.0; 4];
        let r = b.layer_norm(&x, &w, &bias, 1e-5, 4).unwrap();
        let mean: f32 = r.iter().sum::<f32>() / 4.0;
        let var: f32 = r.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 4.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
        assert_relative_eq!(var, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_layer_norm_affine() {
        let b = backend();
        let x = vec![1.0, 2.0];
        let w = vec![0.0, 0.0];
        let bias = vec![5.0, -5.0];
        let r = b.layer_norm(&x, &w, &bias, 1e-5, 2).unwrap();
        // Zero weight collapses the normalized term, leaving the bias.
        assert_relative_eq!(r[0], 5.0, epsilon = 1e-6);
        assert_relative_eq!(r[1], -5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sdpa_single_position() {
        let b = backend();
        // One query attending one kv position returns that value row.
        let q = vec![0.5, -0.5];
        let k = vec![1.0, 2.0];
        let v = vec![3.0, 4.0];
        let out = b.sdpa(&q, &k, &v, 1, 1, 1, 1, 1, 2, false).unwrap();
        assert_relative_eq!(out[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sdpa_uniform_keys_average_values() {
        let b = backend();
        // Identical keys give uniform attention, so the output is the mean
        // of the values.
        let q = vec![1.0, 0.0];
        let k = vec![1.0, 1.0, 1.0, 1.0];
        let v = vec![0.0, 2.0, 4.0, 6.0];
        let out = b.sdpa(&q, &k, &v, 1, 1, 1, 1, 2, 2, false).unwrap();
        assert_relative_eq!(out[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(out[1], 4.0, epsilon = 1e-5);
    }

    #[test]
    fn test_sdpa_causal_first_row_sees_only_first_kv() {
        let b = backend();
        // seq_q == seq_kv == 2 with causal masking: row 0 attends only
        // position 0, so it returns v[0] exactly.
        let q = vec![1.0, 1.0, 1.0, 1.0];
        let k = vec![0.3, -0.3, 0.7, 0.1];
        let v = vec![10.0, 20.0, 30.0, 40.0];
        let out = b.sdpa(&q, &k, &v, 1, 1, 1, 2, 2, 2, true).unwrap();
        assert_relative_eq!(out[0], 10.0, epsilon = 1e-6);
        assert_relative_eq!(out[1], 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sdpa_gqa_matches_expanded_heads() {
        let b = backend();
        let batch = 1;
        let n_heads_q = 4;
        let n_heads_kv = 2;
        let seq = 3;
        let head_dim = 2;

        let q: Vec<f32> = (0..batch * n_heads_q * seq * head_dim)
            .map(|i| ((i * 7 % 13) as f32 - 6.0) * 0.1)
            .collect();
        let k: Vec<f32> = (0..batch * n_heads_kv * seq * head_dim)
            .map(|i| ((i * 5 % 11) as f32 - 5.0) * 0.1)
            .collect();
        let v: Vec<f32> = (0..batch * n_heads_kv * seq * head_dim)
            .map(|i| ((i * 3 % 7) as f32 - 3.0) * 0.1)
            .collect();

        let grouped = b
            .sdpa(&q, &k, &v, batch, n_heads_q, n_heads_kv, seq, seq, head_dim, true)
            .unwrap();

        // Expand each kv head over its query group and rerun without grouping.
        let group = n_heads_q / n_heads_kv;
        let head_len = seq * head_dim;
        let mut k_full = Vec::with_capacity(n_heads_q * head_len);
        let mut v_full = Vec::with_capacity(n_heads_q * head_len);
        for h in 0..n_heads_q {
            let kv_h = h / group;
            k_full.extend_from_slice(&k[kv_h * head_len..(kv_h + 1) * head_len]);
            v_full.extend_from_slice(&v[kv_h * head_len..(kv_h + 1) * head_len]);
        }
        let expanded = b
            .sdpa(
                &q, &k_full, &v_full, batch, n_heads_q, n_heads_q, seq, seq, head_dim, true,
            )
            .unwrap();

        for (g, e) in grouped.iter().zip(expanded.iter()) {
            assert_relative_eq!(*g, *e, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_sdpa_rejects_bad_grouping() {
        let b = backend();
        let q = vec![0.0; 3 * 1 * 2];
        let kv = vec![0.0; 2 * 1 * 2];
        assert!(b.sdpa(&q, &kv, &kv, 1, 3, 2, 1, 1, 2, false).is_err());
    }

    #[test]
    fn test_sdpa_rejects_causal_short_kv() {
        let b = backend();
        let q = vec![0.0; 2 * 2];
        let kv = vec![0.0; 2];
        assert!(b.sdpa(&q, &kv, &kv, 1, 1, 1, 2, 1, 2, true).is_err());
    }
}
