//! CPU model of the device kernel, lane by lane.
//!
//! Every lane of a [`CooperativeGroup`] walks its strided slice of `k`
//! exactly as a device thread does, and the group reduction runs in explicit
//! stages where all partner values are read before any lane writes.

use super::groupwise::{QuantizedWeight, CODE_MIDPOINT};
use super::packing::word_at;
use crate::kernel::int4_gemv::{ELEMS_PER_THREAD, TILE_WIDTH};

/// Per-nibble activation pre-scale: masking without shifting leaves nibble
/// `i` multiplied by `16^i`.
pub const NIBBLE_SCALE: [f32; 4] = [1.0, 1.0 / 16.0, 1.0 / 256.0, 1.0 / 4096.0];

const NIBBLE_MASKS: [u16; 4] = [0x000f, 0x00f0, 0x0f00, 0xf000];

/// A fixed-width set of lanes holding one 4-wide partial accumulator each.
#[derive(Clone, Debug)]
pub struct CooperativeGroup {
    lanes: Vec<[f32; TILE_WIDTH]>,
}

impl CooperativeGroup {
    pub fn new(width: usize) -> Self {
        assert!(
            width.is_power_of_two() && width >= 2,
            "group width must be a power of two"
        );
        Self {
            lanes: vec![[0.0; TILE_WIDTH]; width],
        }
    }

    pub fn width(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane_mut(&mut self, lane: usize) -> &mut [f32; TILE_WIDTH] {
        &mut self.lanes[lane]
    }

    /// Pairwise tree reduction into lane 0.
    ///
    /// Each stage snapshots the lanes before combining, which models the
    /// barrier between stages: no lane observes a partner's value from the
    /// stage it is currently computing.
    pub fn tree_reduce(&mut self) -> [f32; TILE_WIDTH] {
        let mut stride = self.width() / 2;
        while stride > 0 {
            let snapshot = self.lanes.clone();
            for lane in 0..stride {
                for c in 0..TILE_WIDTH {
                    self.lanes[lane][c] = snapshot[lane][c] + snapshot[lane + stride][c];
                }
            }
            stride /= 2;
        }
        self.lanes[0]
    }
}

/// Runs the folded-zero-point GEMV the way the device kernel does.
pub fn folded_gemv(
    activation: &[f32],
    weight: &QuantizedWeight,
    threads_per_tile: usize,
) -> Vec<f32> {
    let (n, k) = (weight.n, weight.k);
    let jump = threads_per_tile * ELEMS_PER_THREAD;
    assert_eq!(activation.len(), k, "activation must have k elements");
    assert!(n.is_multiple_of(TILE_WIDTH), "n must be divisible by 4");
    assert!(k.is_multiple_of(jump), "k must be divisible by threads_per_tile * 4");

    let mut out = vec![0.0f32; n];
    for tile in 0..n / TILE_WIDTH {
        let n0 = tile * TILE_WIDTH;
        let mut group = CooperativeGroup::new(threads_per_tile);

        for lane in 0..threads_per_tile {
            let acc = group.lane_mut(lane);
            let mut k0 = lane * ELEMS_PER_THREAD;
            while k0 < k {
                accumulate_step(activation, weight, n0, k0, acc);
                k0 += jump;
            }
        }

        out[n0..n0 + TILE_WIDTH].copy_from_slice(&group.tree_reduce());
    }
    out
}

fn accumulate_step(
    activation: &[f32],
    weight: &QuantizedWeight,
    n0: usize,
    k0: usize,
    acc: &mut [f32; TILE_WIDTH],
) {
    let g = weight.group_of(k0);
    let a = &activation[k0..k0 + ELEMS_PER_THREAD];
    let a_sum: f32 = a.iter().sum();

    for (c, slot) in acc.iter_mut().enumerate() {
        let scale = weight.scale(n0 + c, g);
        let zero = weight.zero(n0 + c, g) - scale * CODE_MIDPOINT;
        let word = word_at(&weight.packed, weight.k, n0 + c, k0);

        let dot: f32 = (0..ELEMS_PER_THREAD)
            .map(|i| (a[i] * NIBBLE_SCALE[i]) * (word & NIBBLE_MASKS[i]) as f32)
            .sum();
        *slot += dot * scale + a_sum * zero;
    }
}
