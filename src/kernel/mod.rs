pub mod dequantize;
pub mod int4_gemv;
pub mod specialization;

use burn_cubecl::{
    tensor::CubeTensor, BoolElement, CubeBackend, CubeRuntime, FloatElement, IntElement,
};
use burn_tensor::{DType, Int, Tensor, TensorMetadata, TensorPrimitive};
use dequantize::dequantize_int4;
use int4_gemv::{int4_gemv_launch, GemvConfig};
use std::sync::OnceLock;

const THREADS_PER_TILE_SMALL: usize = 32;
const THREADS_PER_TILE_LARGE: usize = 64;
// Wider groups only pay off once each lane has a few iterations to run.
const LARGE_GROUP_MIN_K: usize = 4096;
const MAX_THREADS_PER_CUBE: usize = 256;

fn env_override(name: &str, allowed: &[usize]) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(value) if allowed.contains(&value) => Some(value),
        _ => {
            log::warn!("ignoring {name}={raw:?}, expected one of {allowed:?}");
            None
        }
    }
}

fn forced_threads_per_tile_from_env() -> Option<usize> {
    static FORCED: OnceLock<Option<usize>> = OnceLock::new();
    *FORCED.get_or_init(|| env_override("INT4_GEMV_THREADS_PER_TILE", &[32, 64]))
}

fn forced_tiles_per_cube_from_env() -> Option<usize> {
    static FORCED: OnceLock<Option<usize>> = OnceLock::new();
    *FORCED.get_or_init(|| env_override("INT4_GEMV_TILES_PER_CUBE", &[1, 2, 4, 8]))
}

pub(crate) fn select_threads_per_tile(k: usize) -> usize {
    if let Some(forced) = forced_threads_per_tile_from_env() {
        if k.is_multiple_of(forced * int4_gemv::ELEMS_PER_THREAD) {
            return forced;
        }
        log::warn!("INT4_GEMV_THREADS_PER_TILE={forced} does not divide k={k}, falling back");
    }

    let large_jump = THREADS_PER_TILE_LARGE * int4_gemv::ELEMS_PER_THREAD;
    if k >= LARGE_GROUP_MIN_K && k.is_multiple_of(large_jump) {
        THREADS_PER_TILE_LARGE
    } else {
        THREADS_PER_TILE_SMALL
    }
}

pub(crate) fn select_tiles_per_cube(n: usize, threads_per_tile: usize) -> usize {
    if let Some(forced) = forced_tiles_per_cube_from_env() {
        return forced;
    }

    let tiles = n / int4_gemv::TILE_WIDTH;
    let mut tiles_per_cube = MAX_THREADS_PER_CUBE / threads_per_tile;
    while tiles_per_cube > 1 && tiles_per_cube > tiles {
        tiles_per_cube /= 2;
    }
    tiles_per_cube
}

/// Picks a launch configuration for a `[1, k] x [n, k]^T` product.
pub fn select_config(k: usize, n: usize) -> GemvConfig {
    let threads_per_tile = select_threads_per_tile(k);
    let tiles_per_cube = select_tiles_per_cube(n, threads_per_tile);
    GemvConfig::new(k, n, threads_per_tile, tiles_per_cube)
}

fn into_float<R: CubeRuntime, F: FloatElement, I: IntElement, BT: BoolElement, const D: usize>(
    tensor: Tensor<CubeBackend<R, F, I, BT>, D>,
) -> CubeTensor<R> {
    match tensor.into_primitive() {
        TensorPrimitive::Float(f) => f,
        TensorPrimitive::QFloat(_) => panic!("unsupported qfloat"),
    }
}

/// `[1, k] x dequant([n, k])^T -> [1, n]` on a cube backend.
///
/// `qweight` is `[n, k / 8]` packed 32-bit words, `scales` and `zeros` are
/// `[k / group_size, n]`.
pub fn int4_gemv_tensor<R: CubeRuntime, F: FloatElement, I: IntElement, BT: BoolElement>(
    activation: Tensor<CubeBackend<R, F, I, BT>, 2>,
    qweight: Tensor<CubeBackend<R, F, I, BT>, 2, Int>,
    scales: Tensor<CubeBackend<R, F, I, BT>, 2>,
    zeros: Tensor<CubeBackend<R, F, I, BT>, 2>,
    group_size: usize,
) -> CubeTensor<R> {
    let device = activation.device();
    let [m, k] = activation.dims();
    assert_eq!(m, 1, "int4 gemv only supports a single activation row");
    let [n, _] = qweight.dims();

    let out: Tensor<CubeBackend<R, F, I, BT>, 2> = Tensor::empty([1, n], &device);

    let a_primitive = into_float(activation);
    let w_primitive = qweight.into_primitive();
    let s_primitive = into_float(scales);
    let z_primitive = into_float(zeros);
    let o_primitive = into_float(out);

    assert!(matches!(w_primitive.dtype(), DType::I32 | DType::U32));

    let client = a_primitive.client.clone();
    let config = select_config(k, n);

    int4_gemv_launch::<R, F>(
        &client,
        &a_primitive.as_handle_ref(),
        &w_primitive.as_handle_ref(),
        &s_primitive.as_handle_ref(),
        &z_primitive.as_handle_ref(),
        &o_primitive.as_handle_ref(),
        &config,
        group_size,
    )
    .expect("int4 gemv launch failed");

    o_primitive
}

/// Dense `[n, k]` weights from packed codes on a cube backend.
pub fn dequantize_int4_tensor<R: CubeRuntime, F: FloatElement, I: IntElement, BT: BoolElement>(
    qweight: Tensor<CubeBackend<R, F, I, BT>, 2, Int>,
    scales: Tensor<CubeBackend<R, F, I, BT>, 2>,
    zeros: Tensor<CubeBackend<R, F, I, BT>, 2>,
    group_size: usize,
) -> CubeTensor<R> {
    let device = qweight.device();
    let [n, k_packed] = qweight.dims();
    let k = k_packed * 8;

    let out: Tensor<CubeBackend<R, F, I, BT>, 2> = Tensor::empty([n, k], &device);

    let w_primitive = qweight.into_primitive();
    let s_primitive = into_float(scales);
    let z_primitive = into_float(zeros);
    let o_primitive = into_float(out);

    assert!(matches!(w_primitive.dtype(), DType::I32 | DType::U32));

    let client = w_primitive.client.clone();
    dequantize_int4::<R, F>(
        &client,
        &w_primitive.as_handle_ref(),
        &s_primitive.as_handle_ref(),
        &z_primitive.as_handle_ref(),
        &o_primitive.as_handle_ref(),
        n,
        k,
        group_size,
    )
    .expect("int4 dequantize launch failed");

    o_primitive
}
