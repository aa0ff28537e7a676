use core::mem::size_of;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cube_int4_gemv::kernel::int4_gemv::GemvConfig;
use cube_int4_gemv::{element_supported, launcher_by_name, select_config, ElemKind};
use cubecl::bytes::Bytes;
use cubecl::future;
use cubecl::prelude::*;
use cubecl::server::Handle;
use cubecl::wgpu::{WgpuDevice, WgpuRuntime};
use half::f16;

type R = WgpuRuntime;

const DEFAULT_GROUP_SIZE: usize = 128;

#[derive(Clone, Copy, Debug)]
struct GemvCase {
    name: &'static str,
    k: usize,
    n: usize,
    group_size: usize,
    elem: ElemKind,
}

impl GemvCase {
    fn decode(name: &'static str, k: usize, n: usize, elem: ElemKind) -> Self {
        Self {
            name,
            k,
            n,
            group_size: DEFAULT_GROUP_SIZE,
            elem,
        }
    }

    fn variant_name(self) -> String {
        format!("int4_gemv_{}_g{}", self.elem.as_str(), self.group_size)
    }

    /// Bytes streamed per call: packed weights dominate.
    fn bytes_moved(self) -> u64 {
        let weights = self.n * self.k / 2;
        let params = 2 * (self.k / self.group_size) * self.n * self.elem.size();
        let vectors = (self.k + self.n) * self.elem.size();
        (weights + params + vectors) as u64
    }

    fn flops(self) -> u64 {
        2 * self.n as u64 * self.k as u64
    }
}

struct GemvBenchBuffers {
    activation: Handle,
    packed: Handle,
    scales: Handle,
    zeros: Handle,
    output: Handle,
    activation_shape: [usize; 2],
    activation_strides: [usize; 2],
    packed_shape: [usize; 2],
    packed_strides: [usize; 2],
    params_shape: [usize; 2],
    params_strides: [usize; 2],
    output_shape: [usize; 2],
    output_strides: [usize; 2],
}

fn build_packed(case: GemvCase) -> Vec<u32> {
    (0..case.n * case.k / 8)
        .map(|idx| (idx as u32).wrapping_mul(0x9e37_79b9))
        .collect()
}

fn build_values(len: usize, base: f32, step: f32) -> Vec<f32> {
    (0..len)
        .map(|idx| base + ((idx % 23) as f32) * step)
        .collect()
}

fn upload(client: &ComputeClient<R>, elem: ElemKind, values: &[f32]) -> Handle {
    let bytes: Vec<u8> = match elem {
        ElemKind::F32 => bytemuck::cast_slice(values).to_vec(),
        ElemKind::F16 => {
            let halves: Vec<f16> = values.iter().map(|&v| f16::from_f32(v)).collect();
            bytemuck::cast_slice(&halves).to_vec()
        }
        ElemKind::BF16 => {
            let halves: Vec<half::bf16> = values.iter().map(|&v| half::bf16::from_f32(v)).collect();
            bytemuck::cast_slice(&halves).to_vec()
        }
    };
    client.create(Bytes::from_bytes_vec(bytes))
}

fn prepare_buffers(client: &ComputeClient<R>, case: GemvCase) -> GemvBenchBuffers {
    let num_groups = case.k / case.group_size;
    let packed = build_packed(case);

    GemvBenchBuffers {
        activation: upload(client, case.elem, &build_values(case.k, -0.5, 0.05)),
        packed: client.create(Bytes::from_bytes_vec(bytemuck::cast_slice(&packed).to_vec())),
        scales: upload(client, case.elem, &build_values(num_groups * case.n, 0.01, 0.002)),
        zeros: upload(client, case.elem, &build_values(num_groups * case.n, -0.1, 0.01)),
        output: client.empty(case.n * case.elem.size()),
        activation_shape: [1, case.k],
        activation_strides: [case.k, 1],
        packed_shape: [case.n, case.k / 8],
        packed_strides: [case.k / 8, 1],
        params_shape: [num_groups, case.n],
        params_strides: [case.n, 1],
        output_shape: [1, case.n],
        output_strides: [case.n, 1],
    }
}

fn handle_ref<'a>(
    handle: &'a Handle,
    shape: &'a [usize],
    strides: &'a [usize],
    elem_size: usize,
) -> TensorHandleRef<'a, R> {
    TensorHandleRef {
        handle,
        strides,
        shape,
        elem_size,
        runtime: PhantomData,
    }
}

fn launch_once(client: &ComputeClient<R>, case: GemvCase, config: &GemvConfig, buffers: &GemvBenchBuffers) {
    let elem_size = case.elem.size();
    let launch = launcher_by_name::<R>(&case.variant_name()).expect("variant exists");
    launch(
        client,
        &handle_ref(&buffers.activation, &buffers.activation_shape, &buffers.activation_strides, elem_size),
        &handle_ref(&buffers.packed, &buffers.packed_shape, &buffers.packed_strides, size_of::<u32>()),
        &handle_ref(&buffers.scales, &buffers.params_shape, &buffers.params_strides, elem_size),
        &handle_ref(&buffers.zeros, &buffers.params_shape, &buffers.params_strides, elem_size),
        &handle_ref(&buffers.output, &buffers.output_shape, &buffers.output_strides, elem_size),
        config,
    )
    .expect("int4 gemv launch failed");

    future::block_on(client.sync()).expect("int4 gemv sync failed");
}

fn estimate_perf(
    case: GemvCase,
    client: &ComputeClient<R>,
    config: &GemvConfig,
    buffers: &GemvBenchBuffers,
    warmup_runs: usize,
    measure_runs: usize,
) -> (f64, f64) {
    for _ in 0..warmup_runs {
        launch_once(client, case, config, buffers);
    }

    let begin = Instant::now();
    for _ in 0..measure_runs {
        launch_once(client, case, config, buffers);
    }

    let sec_per_run = begin.elapsed().as_secs_f64() / measure_runs as f64;
    let gbps = case.bytes_moved() as f64 / sec_per_run / 1e9;
    (sec_per_run * 1_000.0, gbps)
}

fn case_filter() -> Option<String> {
    std::env::var("INT4_GEMV_BENCH_CASE_FILTER")
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

fn bench_cases() -> Vec<GemvCase> {
    let mut cases = Vec::new();
    for elem in [ElemKind::F32, ElemKind::F16] {
        cases.push(GemvCase::decode("qkv_proj", 4096, 4096, elem));
        cases.push(GemvCase::decode("mlp_up", 4096, 11008, elem));
        cases.push(GemvCase::decode("mlp_down", 11008, 4096, elem));
        cases.push(GemvCase::decode("small_qkv", 896, 896, elem));
    }
    cases
}

fn bench_int4_gemv(c: &mut Criterion) {
    let filter = case_filter();
    let cases: Vec<GemvCase> = bench_cases()
        .into_iter()
        .filter(|case| match &filter {
            Some(filter) => case.name.contains(filter.as_str()),
            None => true,
        })
        .collect();

    if cases.is_empty() {
        println!("[int4_gemv] no case matched filter.");
        return;
    }

    let mut group = c.benchmark_group("int4_gemv");
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(10));

    let device = WgpuDevice::default();
    let client = R::client(&device);

    for case in cases {
        if case.elem == ElemKind::F16 && !element_supported::<R, f16>(&client) {
            println!("[int4_gemv] skipping {} f16: not supported on this adapter.", case.name);
            continue;
        }

        let config = select_config(case.k, case.n);
        let buffers = prepare_buffers(&client, case);

        let (avg_ms, gbps) = estimate_perf(case, &client, &config, &buffers, 3, 10);
        println!(
            "[int4_gemv] {} {} (K={}, N={}, tpt={}, tpc={}) estimate: {:.3} ms, {:.1} GB/s, {:.2} GFLOPS",
            case.name,
            case.elem.as_str(),
            case.k,
            case.n,
            config.threads_per_tile,
            config.tiles_per_cube,
            avg_ms,
            gbps,
            case.flops() as f64 / (avg_ms / 1_000.0) / 1e9,
        );

        group.throughput(Throughput::Bytes(case.bytes_moved()));
        group.bench_with_input(
            BenchmarkId::new(case.elem.as_str(), case.name),
            &case,
            |b, &case| {
                b.iter(|| {
                    launch_once(&client, case, &config, &buffers);
                    black_box(&buffers.output);
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_int4_gemv);
criterion_main!(benches);
