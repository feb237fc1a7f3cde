use crate::error::{Result, TensorError};

/// Reference scaled-dot-product attention kernel.
///
/// Layouts are documented on `ComputeBackend::sdpa`. Grouped-query
/// broadcasting maps query head `h` to kv head `h / group_size` where
/// `group_size = n_heads_q / n_heads_kv`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sdpa_f32(
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
    if n_heads_kv == 0 || n_heads_q % n_heads_kv != 0 {
        return Err(TensorError::Other(format!(
            "sdpa: n_heads_q={} is not divisible by n_heads_kv={}",
            n_heads_q, n_heads_kv
        )));
    }
    if q.len() != batch * n_heads_q * seq_q * head_dim {
        return Err(TensorError::Other(format!(
            "sdpa: q.len()={} but expected batch*n_heads_q*seq_q*head_dim={}",
            q.len(),
            batch * n_heads_q * seq_q * head_dim
        )));
    }
    let kv_len = batch * n_heads_kv * seq_kv * head_dim;
    if k.len() != kv_len || v.len() != kv_len {
        return Err(TensorError::Other(format!(
            "sdpa: k.len()={} v.len()={} but expected batch*n_heads_kv*seq_kv*head_dim={}",
            k.len(),
            v.len(),
            kv_len
        )));
    }
    if causal && seq_kv < seq_q {
        return Err(TensorError::Other(format!(
            "sdpa: causal attention requires seq_kv ({}) >= seq_q ({})",
            seq_kv, seq_q
        )));
    }

    let group_size = n_heads_q / n_heads_kv;
    let scale = 1.0 / (head_dim as f32).sqrt();
    let mut out = vec![0.0f32; batch * n_heads_q * seq_q * head_dim];

    for b in 0..batch {
        for h in 0..n_heads_q {
            let kv_h = h / group_size;
            let q_base = (b * n_heads_q + h) * seq_q * head_dim;
            let kv_base = (b * n_heads_kv + kv_h) * seq_kv * head_dim;

            for i in 0..seq_q {
                // Query row i sits at absolute kv position seq_kv - seq_q + i.
                let visible = if causal { seq_kv - seq_q + i + 1 } else { seq_kv };

                let q_row = &q[q_base + i * head_dim..q_base + (i + 1) * head_dim];
                let mut scores = Vec::with_capacity(visible);
                for j in 0..visible {
                    let k_row = &k[kv_base + j * head_dim..kv_base + (j + 1) * head_dim];
                    let mut dot = 0.0f32;
                    for d in 0..head_dim {
                        dot += q_row[d] * k_row[d];
                    }
                    scores.push(dot * scale);
                }

                let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut exp_sum = 0.0f32;
                for s in &mut scores {
                    *s = (*s - max_score).exp();
                    exp_sum += *s;
                }

                let out_row = q_base + i * head_dim;
                for (j, &w) in scores.iter().enumerate() {
                    let prob = w / exp_sum;
                    let v_row = &v[kv_base + j * head_dim..kv_base + (j + 1) * head_dim];
                    for d in 0..head_dim {
                        out[out_row + d] += prob * v_row[d];
                    }
                }
            }
        }
    }

    Ok(out)
}
