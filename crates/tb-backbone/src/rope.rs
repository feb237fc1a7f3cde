use crate::error::{BackboneError, Result};

/// Precomputed rotary embedding table.
///
/// Stores a (cos θ, sin θ) pair for every position `p < capacity` and pair
/// index `i < head_dim/2`, where `θ = p · base^(−2i/head_dim)`. The table is
/// built once at cache-allocation time and is immutable thereafter; it is
/// safe to share read-only across generation sessions.
#[derive(Debug, Clone)]
pub struct RotaryTable {
    /// Flat [capacity, head_dim/2, 2] buffer of (cos, sin) pairs.
    data: Vec<f32>,
    capacity: usize,
    half_dim: usize,
}

impl RotaryTable {
    /// Precompute the table for `capacity` positions and an even per-head
    /// rotation dimensionality `head_dim`.
    pub fn new(capacity: usize, head_dim: usize, base: f32) -> Result<Self> {
        if capacity == 0 {
            return Err(BackboneError::InvalidConfig(
                "rotary table capacity must be non-zero".to_string(),
            ));
        }
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(BackboneError::InvalidConfig(format!(
                "rotary head_dim {} must be even and non-zero",
                head_dim
            )));
        }

        let half_dim = head_dim / 2;
        let mut data = Vec::with_capacity(capacity * half_dim * 2);
        for p in 0..capacity {
            for i in 0..half_dim {
                let freq = 1.0 / base.powf(2.0 * i as f32 / head_dim as f32);
                let theta = p as f32 * freq;
                data.push(theta.cos());
                data.push(theta.sin());
            }
        }

        Ok(RotaryTable {
            data,
            capacity,
            half_dim,
        })
    }

    /// Number of precomputed positions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of rotation pairs per position (head_dim / 2).
    pub fn half_dim(&self) -> usize {
        self.half_dim
    }

    /// The (cos, sin) row for one absolute position, `half_dim * 2` floats.
    pub fn position(&self, pos: usize) -> Result<&[f32]> {
        if pos >= self.capacity {
            return Err(BackboneError::PositionOutOfRange {
                position: pos,
                capacity: self.capacity,
            });
        }
        let row = self.half_dim * 2;
        Ok(&self.data[pos * row..(pos + 1) * row])
    }

    /// Gather the rows for a chunk of absolute positions into one flat
    /// [positions.len(), half_dim, 2] buffer.
    pub fn gather(&self, positions: &[usize]) -> Result<Vec<f32>> {
        let row = self.half_dim * 2;
        let mut out = Vec::with_capacity(positions.len() * row);
        for &p in positions {
            out.extend_from_slice(self.position(p)?);
        }
        Ok(out)
    }
}

/// Rotate one token's query or key heads in place.
///
/// `x` holds `n_heads` consecutive head vectors of `head_dim` elements;
/// `freqs` is the token's (cos, sin) row of `head_dim` floats. Consecutive
/// element pairs (a, b) become (a·c − b·s, a·s + b·c). The same rotation is
/// applied to every head at a given position. Never applied to values.
pub fn apply_rotary(x: &mut [f32], n_heads: usize, head_dim: usize, freqs: &[f32]) {
    debug_assert_eq!(x.len(), n_heads * head_dim);
    debug_assert_eq!(freqs.len(), head_dim);

    for h in 0..n_heads {
        let offset = h * head_dim;
        for i in 0..head_dim / 2 {
            let c = freqs[2 * i];
            let s = freqs[2 * i + 1];
            let a = x[offset + 2 * i];
            let b = x[offset + 2 * i + 1];
            x[offset + 2 * i] = a * c - b * s;
            x[offset + 2 * i + 1] = a * s + b * c;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_table_shape_and_position_zero() {
        let table = RotaryTable::new(8, 6, 10000.0).unwrap();
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.half_dim(), 3);
        // At position 0 every angle is zero: cos 1, sin 0.
        let row = table.position(0).unwrap();
        assert_eq!(row, &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_table_determinism() {
        let a = RotaryTable::new(32, 16, 10000.0).unwrap();
        let b = RotaryTable::new(32, 16, 10000.0).unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_table_rejects_odd_head_dim() {
        assert!(RotaryTable::new(8, 5, 10000.0).is_err());
        assert!(RotaryTable::new(0, 4, 10000.0).is_err());
    }

    #[test]
    fn test_position_out_of_range() {
        let table = RotaryTable::new(4, 4, 10000.0).unwrap();
        assert!(table.position(3).is_ok());
        assert!(matches!(
            table.position(4),
            Err(BackboneError::PositionOutOfRange { position: 4, capacity: 4 })
        ));
        assert!(table.gather(&[0, 1, 7]).is_err());
    }

    #[test]
    fn test_gather_concatenates_rows() {
        let table = RotaryTable::new(8, 4, 10000.0).unwrap();
        let g = table.gather(&[2, 5]).unwrap();
        assert_eq!(g.len(), 2 * 4);
        assert_eq!(&g[..4], table.position(2).unwrap());
        assert_eq!(&g[4..], table.position(5).unwrap());
    }

    #[test]
    fn test_rotation_preserves_norm() {
        let table = RotaryTable::new(64, 8, 10000.0).unwrap();
        let mut x: Vec<f32> = (0..8).map(|i| i as f32 * 0.25 - 1.0).collect();
        let norm_before: f32 = x.iter().map(|v| v * v).sum();
        apply_rotary(&mut x, 1, 8, table.position(17).unwrap());
        let norm_after: f32 = x.iter().map(|v| v * v).sum();
        assert_relative_eq!(norm_before, norm_after, epsilon = 1e-4);
    }

    #[test]
    fn test_rotation_round_trip() {
        // Rotating by θ and then by −θ restores the input. The table never
        // stores negative positions, so invert the sin components directly.
        let table = RotaryTable::new(64, 8, 10000.0).unwrap();
        let original: Vec<f32> = (0..16).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut x = original.clone();

        let forward = table.position(23).unwrap().to_vec();
        let mut inverse = forward.clone();
        for i in 0..inverse.len() / 2 {
            inverse[2 * i + 1] = -inverse[2 * i + 1];
        }

        apply_rotary(&mut x, 2, 8, &forward);
        apply_rotary(&mut x, 2, 8, &inverse);

        for (a, b) in x.iter().zip(original.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_rotation_identical_across_heads() {
        let table = RotaryTable::new(16, 4, 10000.0).unwrap();
        let head: Vec<f32> = vec![0.5, -0.25, 1.5, 0.75];
        let mut two_heads = [head.clone(), head.clone()].concat();
        apply_rotary(&mut two_heads, 2, 4, table.position(9).unwrap());
        assert_eq!(&two_heads[..4], &two_heads[4..]);
    }
}
