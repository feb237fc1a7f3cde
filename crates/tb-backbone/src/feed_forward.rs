use tb_tensor::ComputeBackend;

use crate::config::BackboneConfig;
use crate::error::{BackboneError, Result};

/// Gated feed-forward block.
///
/// `fc1` projects to `2 * d_intermediate`; the result splits into
/// (value, gate) halves along the last axis, combined as
/// `value * SiLU(gate)` and projected back to `d_model` by `fc2`.
/// Normalization lives in the enclosing transformer block.
#[derive(Debug)]
pub struct FeedForward {
    d_model: usize,
    d_intermediate: usize,
    /// Fused value/gate projection, [2 * d_intermediate, d_model].
    fc1: Vec<f32>,
    /// Down projection, [d_model, d_intermediate].
    fc2: Vec<f32>,
}

impl FeedForward {
    pub fn new(config: &BackboneConfig, fc1: Vec<f32>, fc2: Vec<f32>) -> Self {
        FeedForward {
            d_model: config.d_model,
            d_intermediate: config.attn_mlp_d_intermediate,
            fc1,
            fc2,
        }
    }

    /// Forward over `n_tokens` rows of `d_model` elements.
    pub fn forward(
        &self,
        x: &[f32],
        n_tokens: usize,
        backend: &dyn ComputeBackend,
    ) -> Result<Vec<f32>> {
        if x.len() != n_tokens * self.d_model {
            return Err(BackboneError::HiddenShapeMismatch {
                d_model: self.d_model,
                got: vec![x.len()],
            });
        }

        let d_inter = self.d_intermediate;
        let h = backend.linear(x, &self.fc1, n_tokens, self.d_model, 2 * d_inter)?;

        let mut value = vec![0.0f32; n_tokens * d_inter];
        let mut gate = vec![0.0f32; n_tokens * d_inter];
        for t in 0..n_tokens {
            let src = t * 2 * d_inter;
            value[t * d_inter..(t + 1) * d_inter].copy_from_slice(&h[src..src + d_inter]);
            gate[t * d_inter..(t + 1) * d_inter]
                .copy_from_slice(&h[src + d_inter..src + 2 * d_inter]);
        }

        let gate = backend.silu(&gate)?;
        let gated = backend.mul(&value, &gate)?;
        backend
            .linear(&gated, &self.fc2, n_tokens, d_inter, self.d_model)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tb_tensor::CpuBackend;

    #[test]
    fn test_gating_selects_value_half() {
        // d_model = 2, d_intermediate = 2. fc1 maps the input so that the
        // value half copies x and the gate half is a large constant via the
        // first input element, saturating SiLU toward identity.
        let cfg = BackboneConfig::new(2, 1, 1, 1, 2);
        let mut fc1 = vec![0.0f32; 4 * 2];
        // value rows: identity
        fc1[0] = 1.0; // out 0 <- in 0
        fc1[3] = 1.0; // out 1 <- in 1
        // gate rows: 100 * x[0]
        fc1[4] = 100.0;
        fc1[6] = 100.0;
        // fc2: identity
        let mut fc2 = vec![0.0f32; 2 * 2];
        fc2[0] = 1.0;
        fc2[3] = 1.0;

        let ff = FeedForward::new(&cfg, fc1, fc2);
        let backend = CpuBackend::new();
        let y = ff.forward(&[1.0, -0.5], 1, &backend).unwrap();
        // value = [1.0, -0.5], gate = [100, 100]; silu(100) ~= 100.
        assert_relative_eq!(y[0], 100.0, epsilon = 1e-2);
        assert_relative_eq!(y[1], -50.0, epsilon = 1e-2);
    }

    #[test]
    fn test_zero_gate_kills_output() {
        let cfg = BackboneConfig::new(2, 1, 1, 1, 2);
        let mut fc1 = vec![0.0f32; 4 * 2];
        fc1[0] = 1.0;
        fc1[3] = 1.0;
        // gate rows stay zero: silu(0) = 0, so the block outputs zero.
        let mut fc2 = vec![0.0f32; 2 * 2];
        fc2[0] = 1.0;
        fc2[3] = 1.0;

        let ff = FeedForward::new(&cfg, fc1, fc2);
        let backend = CpuBackend::new();
        let y = ff.forward(&[3.0, -7.0], 1, &backend).unwrap();
        assert_eq!(y, vec![0.0, 0.0]);
    }

    #[test]
    fn test_rejects_wrong_row_count() {
        let cfg = BackboneConfig::new(2, 1, 1, 1, 2);
        let ff = FeedForward::new(&cfg, vec![0.0; 8], vec![0.0; 4]);
        let backend = CpuBackend::new();
        assert!(ff.forward(&[0.0; 3], 1, &backend).is_err());
    }
}
