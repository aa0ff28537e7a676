use cubecl::prelude::*;
use cubecl::{
    calculate_cube_count_elemwise,
    std::tensor::layout::linear::{linear_view, LinearView},
};

use crate::error::{ensure_multiple, expect_elem_size, expect_len, GemvError, GemvResult};
use crate::quant::SUPPORTED_GROUP_SIZES;

// Code i of a word sits in bits 4i..4i+4, so the low half-word holds
// positions 0..4 of the run and the high half-word positions 4..8.
#[cube]
fn word_codes<F: Float>(word: u32) -> Line<F> {
    let mut codes = Line::<F>::empty(8usize);

    #[unroll]
    for i in 0..8usize {
        codes[i] = F::cast_from((word >> u32::cast_from(i * 4)) & 0x0f);
    }
    codes
}

// Working unit: one packed u32 word = 8 consecutive codes of one row.
#[cube(launch_unchecked)]
fn dequantize_int4_rows<F: Float>(
    packed: &LinearView<u32>,
    scales: &LinearView<F>,
    zeros: &LinearView<F>,
    output: &mut LinearView<Line<F>, ReadWrite>,
    n: usize,
    k: usize,
    #[comptime] group_size: usize,
) {
    let words_per_row = k / 8;
    if ABSOLUTE_POS < n * words_per_row {
        let row = ABSOLUTE_POS / words_per_row;
        let col = (ABSOLUTE_POS % words_per_row) * 8;

        // 8 codes never straddle a group: group_size >= 32.
        let sz = (col / group_size) * n + row;
        let scale = scales[sz];
        let zero = zeros[sz];
        let mid = Line::<F>::empty(4usize).fill(F::new(8.0));
        let scale_line = Line::<F>::empty(4usize).fill(scale);
        let zero_line = Line::<F>::empty(4usize).fill(zero);

        let codes = word_codes::<F>(packed[ABSOLUTE_POS]);
        let mut lo = Line::<F>::empty(4usize);
        let mut hi = Line::<F>::empty(4usize);
        #[unroll]
        for i in 0..4usize {
            lo[i] = codes[i];
            hi[i] = codes[i + 4];
        }

        output[ABSOLUTE_POS * 2] = (lo - mid) * scale_line + zero_line;
        output[ABSOLUTE_POS * 2 + 1] = (hi - mid) * scale_line + zero_line;
    }
}

/// Expands packed codes into a dense `[n, k]` tensor using
/// `scale * (code - 8) + zero`.
pub fn dequantize_int4<R: Runtime, F: Float>(
    client: &ComputeClient<R>,
    packed: &TensorHandleRef<R>,
    scales: &TensorHandleRef<R>,
    zeros: &TensorHandleRef<R>,
    output: &TensorHandleRef<R>,
    n: usize,
    k: usize,
    group_size: usize,
) -> GemvResult<()> {
    if n == 0 {
        return Err(GemvError::Empty { name: "n" });
    }
    if k == 0 {
        return Err(GemvError::Empty { name: "k" });
    }
    if !SUPPORTED_GROUP_SIZES.contains(&group_size) {
        return Err(GemvError::UnsupportedGroupSize(group_size));
    }
    ensure_multiple("k", k, group_size)?;

    // The kernel indexes without bounds checks.
    let num_groups = k / group_size;
    expect_len("packed", packed, n * k / 8)?;
    expect_len("scales", scales, num_groups * n)?;
    expect_len("zeros", zeros, num_groups * n)?;
    expect_len("output", output, n * k)?;

    expect_elem_size("packed", packed, core::mem::size_of::<u32>())?;
    let elem_size = core::mem::size_of::<F>();
    expect_elem_size("scales", scales, elem_size)?;
    expect_elem_size("zeros", zeros, elem_size)?;
    expect_elem_size("output", output, elem_size)?;

    let num_words = n * k / 8;
    let cube_dim = CubeDim::new(client, 256);
    let cube_count = calculate_cube_count_elemwise(client, num_words, cube_dim);

    log::debug!("dequantize_int4 launch: n={n} k={k} group_size={group_size} words={num_words}");

    unsafe {
        dequantize_int4_rows::launch_unchecked::<F, R>(
            client,
            cube_count,
            cube_dim,
            linear_view(client, packed, 1),
            linear_view(client, scales, 1),
            linear_view(client, zeros, 1),
            linear_view(client, output, 4),
            ScalarArg::new(n),
            ScalarArg::new(k),
            group_size,
        )?;
    };

    Ok(())
}
