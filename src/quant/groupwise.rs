use super::packing::{bytes_to_words, pack_codes, unpack_codes};

/// Group sizes the kernel is specialized for.
pub const SUPPORTED_GROUP_SIZES: [usize; 4] = [32, 64, 128, 256];

/// 4-bit codes are centered on this value.
pub const CODE_MIDPOINT: f32 = 8.0;

const MAX_CODE: f32 = 15.0;
const MIN_RANGE: f32 = 1e-6;

/// A `[n, k]` weight matrix quantized to 4 bits with one scale and zero point
/// per `group_size` run along `k`.
///
/// `scales` and `zeros` are stored group-major, `[k / group_size, n]`, so that
/// the four channels of an output tile are adjacent in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantizedWeight {
    pub n: usize,
    pub k: usize,
    pub group_size: usize,
    pub packed: Vec<u8>,
    pub scales: Vec<f32>,
    pub zeros: Vec<f32>,
}

impl QuantizedWeight {
    /// Builds a weight from unpacked codes. `scales`/`zeros` are group-major.
    pub fn from_codes(
        codes: &[u8],
        scales: Vec<f32>,
        zeros: Vec<f32>,
        n: usize,
        k: usize,
        group_size: usize,
    ) -> Self {
        assert!(k.is_multiple_of(group_size), "k must be divisible by group_size");
        let num_groups = k / group_size;
        assert_eq!(scales.len(), num_groups * n, "scales must be [k / group_size, n]");
        assert_eq!(zeros.len(), num_groups * n, "zeros must be [k / group_size, n]");

        Self {
            n,
            k,
            group_size,
            packed: pack_codes(codes, n, k),
            scales,
            zeros,
        }
    }

    pub fn num_groups(&self) -> usize {
        self.k / self.group_size
    }

    pub fn group_of(&self, k: usize) -> usize {
        k / self.group_size
    }

    pub fn scale(&self, channel: usize, group: usize) -> f32 {
        self.scales[group * self.n + channel]
    }

    pub fn zero(&self, channel: usize, group: usize) -> f32 {
        self.zeros[group * self.n + channel]
    }

    pub fn codes(&self) -> Vec<u8> {
        unpack_codes(&self.packed, self.n, self.k)
    }

    /// Packed weights as device words.
    pub fn packed_words(&self) -> Vec<u32> {
        bytes_to_words(&self.packed)
    }

    /// Dense `[n, k]` weights using `scale * (code - 8) + zero`.
    pub fn dequantize(&self) -> Vec<f32> {
        let codes = self.codes();
        let mut out = vec![0.0f32; self.n * self.k];
        for row in 0..self.n {
            for col in 0..self.k {
                let g = self.group_of(col);
                let code = codes[row * self.k + col] as f32;
                out[row * self.k + col] =
                    self.scale(row, g) * (code - CODE_MIDPOINT) + self.zero(row, g);
            }
        }
        out
    }

    /// Re-encodes the same dequantized values at a smaller group size by
    /// replicating each group's scale and zero point.
    pub fn regroup(&self, group_size: usize) -> Self {
        assert!(
            group_size <= self.group_size && self.group_size.is_multiple_of(group_size),
            "new group size must divide the current one"
        );
        let ratio = self.group_size / group_size;
        let num_groups = self.k / group_size;

        let mut scales = Vec::with_capacity(num_groups * self.n);
        let mut zeros = Vec::with_capacity(num_groups * self.n);
        for g in 0..num_groups {
            let src = g / ratio;
            scales.extend_from_slice(&self.scales[src * self.n..(src + 1) * self.n]);
            zeros.extend_from_slice(&self.zeros[src * self.n..(src + 1) * self.n]);
        }

        Self {
            n: self.n,
            k: self.k,
            group_size,
            packed: self.packed.clone(),
            scales,
            zeros,
        }
    }
}

/// Asymmetric min/max quantization of row-major `[n, k]` weights.
///
/// Per (channel, group): `scale = (max - min) / 15`, `zero = min + 8 * scale`,
/// so that `scale * (code - 8) + zero` reproduces `min` at code 0 and `max` at
/// code 15.
pub fn quantize_groupwise(weights: &[f32], n: usize, k: usize, group_size: usize) -> QuantizedWeight {
    assert_eq!(weights.len(), n * k, "weights must have n * k elements");
    assert!(group_size > 0, "group_size must be > 0");
    assert!(k.is_multiple_of(group_size), "k must be divisible by group_size");

    let num_groups = k / group_size;
    let mut codes = vec![0u8; n * k];
    let mut scales = vec![0.0f32; num_groups * n];
    let mut zeros = vec![0.0f32; num_groups * n];

    for row in 0..n {
        for g in 0..num_groups {
            let start = row * k + g * group_size;
            let group = &weights[start..start + group_size];

            let (min, max) = group
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &w| {
                    (lo.min(w), hi.max(w))
                });
            let scale = (max - min).max(MIN_RANGE) / MAX_CODE;

            scales[g * n + row] = scale;
            zeros[g * n + row] = min + CODE_MIDPOINT * scale;

            for (i, &w) in group.iter().enumerate() {
                codes[start + i] = ((w - min) / scale).round().clamp(0.0, MAX_CODE) as u8;
            }
        }
    }

    QuantizedWeight::from_codes(&codes, scales, zeros, n, k, group_size)
}

/// Dense `out[n] = Σ_k activation[k] * w[n, k]` in f64, rounded to f32.
pub fn dense_gemv(activation: &[f32], weights: &[f32], n: usize, k: usize) -> Vec<f32> {
    assert_eq!(activation.len(), k);
    assert_eq!(weights.len(), n * k);

    weights
        .chunks_exact(k)
        .map(|row| {
            row.iter()
                .zip(activation)
                .map(|(&w, &a)| w as f64 * a as f64)
                .sum::<f64>() as f32
        })
        .collect()
}

/// Dequantize-then-multiply reference.
pub fn reference_gemv(activation: &[f32], weight: &QuantizedWeight) -> Vec<f32> {
    dense_gemv(activation, &weight.dequantize(), weight.n, weight.k)
}
