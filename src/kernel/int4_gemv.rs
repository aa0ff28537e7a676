use cubecl::prelude::*;
use cubecl::{
    calculate_cube_count_elemwise,
    std::tensor::layout::linear::{linear_view, LinearView},
};

use crate::error::{ensure_multiple, expect_elem_size, expect_len, GemvError, GemvResult};
use crate::quant::SUPPORTED_GROUP_SIZES;

/// Contraction positions each thread loads per iteration (one 4-wide line).
pub const ELEMS_PER_THREAD: usize = 4;
/// Output channels owned by one cooperative group.
pub const TILE_WIDTH: usize = 4;

const LINE_SIZE: usize = 4;
const SUPPORTED_THREADS_PER_TILE: [usize; 2] = [32, 64];
const SUPPORTED_TILES_PER_CUBE: [usize; 4] = [1, 2, 4, 8];

// Masking without shifting leaves nibble i scaled by 16^i; the activation
// line is pre-divided by the same factors.
#[cube]
fn decode_word_unshifted(word: u32) -> Line<f32> {
    let mut raw = Line::<f32>::empty(4usize);

    raw[0] = f32::cast_from(word & 0x000f);
    raw[1] = f32::cast_from(word & 0x00f0);
    raw[2] = f32::cast_from(word & 0x0f00);
    raw[3] = f32::cast_from(word & 0xf000);
    raw
}

#[cube]
fn prescale_activation<F: Float>(a: Line<F>) -> Line<f32> {
    let mut scaled = Line::<f32>::empty(4usize);

    scaled[0] = f32::cast_from(a[0]);
    scaled[1] = f32::cast_from(a[1]) * f32::new(0.0625);
    scaled[2] = f32::cast_from(a[2]) * f32::new(0.00390625);
    scaled[3] = f32::cast_from(a[3]) * f32::new(0.000244140625);
    scaled
}

// The packed buffer is addressed in 32-bit words; pick the 16-bit half that
// covers positions k..k+4 of the row.
#[cube]
fn load_word(packed: &LinearView<u32>, half_word_idx: usize) -> u32 {
    let pair = packed[half_word_idx / 2];
    let shift = u32::cast_from(half_word_idx % 2) * 16u32;
    (pair >> shift) & 0xffff
}

// activation: (1, K)
// packed:     (N, K/2) bytes, read as u32
// scales:     (K/G, N)
// zeros:      (K/G, N)
// output:     (1, N)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GemvConfig {
    pub k: usize,
    pub n: usize,
    pub threads_per_tile: usize, // 32|64
    pub tiles_per_cube: usize,   // 1|2|4|8
}

impl GemvConfig {
    pub fn new(k: usize, n: usize, threads_per_tile: usize, tiles_per_cube: usize) -> Self {
        Self {
            k,
            n,
            threads_per_tile,
            tiles_per_cube,
        }
    }

    /// Contraction advance per loop iteration.
    pub fn jump(&self) -> usize {
        self.threads_per_tile * ELEMS_PER_THREAD
    }

    pub fn num_tiles(&self) -> usize {
        self.n / TILE_WIDTH
    }

    pub fn num_cubes(&self) -> usize {
        self.num_tiles().div_ceil(self.tiles_per_cube)
    }

    /// Threads required by the dispatch contract: `(N / 4) * threads_per_tile`.
    pub fn grid_threads(&self) -> usize {
        self.num_tiles() * self.threads_per_tile
    }
}

pub(crate) fn validate_gemv_params(config: &GemvConfig, group_size: usize) -> GemvResult<()> {
    if config.k == 0 {
        return Err(GemvError::Empty { name: "k" });
    }
    if config.n == 0 {
        return Err(GemvError::Empty { name: "n" });
    }
    if !SUPPORTED_GROUP_SIZES.contains(&group_size) {
        return Err(GemvError::UnsupportedGroupSize(group_size));
    }
    if !SUPPORTED_THREADS_PER_TILE.contains(&config.threads_per_tile) {
        return Err(GemvError::UnsupportedThreadsPerTile(config.threads_per_tile));
    }
    if !SUPPORTED_TILES_PER_CUBE.contains(&config.tiles_per_cube) {
        return Err(GemvError::UnsupportedTilesPerCube(config.tiles_per_cube));
    }

    ensure_multiple("n", config.n, TILE_WIDTH)?;
    ensure_multiple("k", config.k, config.jump())?;
    ensure_multiple("k", config.k, group_size)?;
    Ok(())
}

// One cube holds `tiles_per_cube` cooperative groups along Y; lane = X.
//
// Each thread accumulates a strided slice of K for the 4 channels of its tile:
// it starts at lane * 4 and advances by threads_per_tile * 4. The zero point
// is folded into a per-iteration correction term instead of being subtracted
// from every decoded code.
#[cube(launch)]
pub fn int4_gemv_kernel<F: Float>(
    activation: &LinearView<Line<F>>,
    packed: &LinearView<u32>,
    scales: &LinearView<Line<F>>,
    zeros: &LinearView<Line<F>>,
    output: &mut LinearView<Line<F>, ReadWrite>,
    #[comptime] config: &GemvConfig,
    #[comptime] group_size: usize,
) {
    let lane = UNIT_POS_X as usize;
    let tile = CUBE_POS * config.tiles_per_cube + UNIT_POS_Y as usize;
    let tiles = config.n / 4;
    let tile_valid = tile < tiles;

    let n0 = tile * 4;
    let jump = config.threads_per_tile * 4;
    let words_per_row = config.k / 4;

    let mut acc = Line::<f32>::empty(4usize).fill(f32::cast_from(0u32));

    if tile_valid {
        let mut k = lane * 4;
        while k < config.k {
            let sz = (k / group_size) * tiles + tile;
            let scale_line = scales[sz];
            let zero_line = zeros[sz];

            let a_line = activation[k / 4];
            let a_scaled = prescale_activation::<F>(a_line);
            let a_sum = f32::cast_from(a_line[0])
                + f32::cast_from(a_line[1])
                + f32::cast_from(a_line[2])
                + f32::cast_from(a_line[3]);

            #[unroll]
            for c in 0..4 {
                let word = load_word(packed, (n0 + c) * words_per_row + k / 4);
                let prod = decode_word_unshifted(word) * a_scaled;

                let scale = f32::cast_from(scale_line[c]);
                let zero = f32::cast_from(zero_line[c]) - scale * f32::new(8.0);
                acc[c] = acc[c] + (prod[0] + prod[1] + prod[2] + prod[3]) * scale + a_sum * zero;
            }

            k += jump;
        }
    }

    // Tree reduction across the group's lanes. Every thread of the cube
    // reaches every barrier, including threads of masked tiles.
    let mut sm_partial =
        SharedMemory::<f32>::new_lined(config.threads_per_tile * config.tiles_per_cube, 4usize);
    let slot = UNIT_POS_Y as usize * config.threads_per_tile + lane;
    sm_partial[slot] = acc;
    sync_cube();

    let mut stride = (CUBE_DIM_X / 2) as usize;
    while stride > 0 {
        if lane < stride {
            sm_partial[slot] = sm_partial[slot] + sm_partial[slot + stride];
        }
        sync_cube();
        stride = stride / 2;
    }

    if lane == 0 && tile_valid {
        let total = sm_partial[slot];
        let mut out = Line::<F>::empty(4usize);
        #[unroll]
        for c in 0..4 {
            out[c] = F::cast_from(total[c]);
        }
        output[tile] = out;
    }
}

/// Whether the device can compile kernels over `F`.
///
/// f16 needs shader-f16 support on wgpu and bf16 is missing from WGSL
/// entirely, so both are only usable where the adapter reports them.
pub fn element_supported<R: Runtime, F: Float>(client: &ComputeClient<R>) -> bool {
    client
        .properties()
        .supports_type(F::as_type_native_unchecked())
}

fn ensure_element_supported<R: Runtime, F: Float>(client: &ComputeClient<R>) -> GemvResult<()> {
    if element_supported::<R, F>(client) {
        Ok(())
    } else {
        log::warn!("int4_gemv: {} is not supported on this device", core::any::type_name::<F>());
        Err(GemvError::UnsupportedElement(core::any::type_name::<F>()))
    }
}

/// Launches the GEMV for one activation vector.
///
/// `packed` holds `N * K / 2` bytes viewed as `N * K / 8` 32-bit words.
/// `scales` and `zeros` are `[K / group_size, N]`. `output` receives `N`
/// values and is fully overwritten.
pub fn int4_gemv_launch<R: Runtime, F: Float>(
    client: &ComputeClient<R>,
    activation: &TensorHandleRef<R>,
    packed: &TensorHandleRef<R>,
    scales: &TensorHandleRef<R>,
    zeros: &TensorHandleRef<R>,
    output: &TensorHandleRef<R>,
    config: &GemvConfig,
    group_size: usize,
) -> GemvResult<()> {
    validate_gemv_params(config, group_size)?;

    let m = activation.shape.iter().product::<usize>() / config.k.max(1);
    if m != 1 {
        return Err(GemvError::BatchSize(m));
    }

    let num_groups = config.k / group_size;
    expect_len("activation", activation, config.k)?;
    expect_len("packed", packed, config.n * config.k / 8)?;
    expect_len("scales", scales, num_groups * config.n)?;
    expect_len("zeros", zeros, num_groups * config.n)?;
    expect_len("output", output, config.n)?;

    // Packed codes are bit-twiddled as 32-bit words; a narrower or wider
    // element type would shift every index.
    expect_elem_size("packed", packed, core::mem::size_of::<u32>())?;
    let elem_size = core::mem::size_of::<F>();
    expect_elem_size("activation", activation, elem_size)?;
    expect_elem_size("scales", scales, elem_size)?;
    expect_elem_size("zeros", zeros, elem_size)?;
    expect_elem_size("output", output, elem_size)?;
    ensure_element_supported::<R, F>(client)?;

    let cube_dim = CubeDim::new_2d(config.threads_per_tile as u32, config.tiles_per_cube as u32);
    let threads_per_cube = config.threads_per_tile * config.tiles_per_cube;
    let cube_count =
        calculate_cube_count_elemwise(client, config.num_cubes() * threads_per_cube, cube_dim);

    log::debug!(
        "int4_gemv launch: k={} n={} group_size={} threads_per_tile={} tiles_per_cube={} cubes={}",
        config.k,
        config.n,
        group_size,
        config.threads_per_tile,
        config.tiles_per_cube,
        config.num_cubes()
    );

    int4_gemv_kernel::launch::<F, R>(
        client,
        cube_count,
        cube_dim,
        linear_view(client, activation, LINE_SIZE),
        linear_view(client, packed, 1),
        linear_view(client, scales, LINE_SIZE),
        linear_view(client, zeros, LINE_SIZE),
        linear_view(client, output, LINE_SIZE),
        *config,
        group_size,
    )?;

    Ok(())
}
