//! The closed set of (element type, group size) kernel variants.
//!
//! Compile-time entry: [`int4_gemv`] only accepts element types implementing
//! [`GemvElement`] and group markers implementing [`QuantGroup`], both sealed,
//! so an unsupported pairing fails to build. Runtime entry: [`launcher_for`]
//! and [`launcher_by_name`] resolve a tag or name to a monomorphized function
//! pointer from [`KERNEL_VARIANTS`].

use cubecl::prelude::*;

use super::int4_gemv::{int4_gemv_launch, GemvConfig};
use crate::error::GemvResult;

mod sealed {
    pub trait Sealed {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElemKind {
    F32,
    F16,
    BF16,
}

impl ElemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }
}

/// Activation / scale / output element types the kernel is built for.
pub trait GemvElement: Float + sealed::Sealed {
    const KIND: ElemKind;
}

impl sealed::Sealed for f32 {}
impl sealed::Sealed for half::f16 {}
impl sealed::Sealed for half::bf16 {}

impl GemvElement for f32 {
    const KIND: ElemKind = ElemKind::F32;
}

impl GemvElement for half::f16 {
    const KIND: ElemKind = ElemKind::F16;
}

impl GemvElement for half::bf16 {
    const KIND: ElemKind = ElemKind::BF16;
}

/// Quantization group size marker.
pub trait QuantGroup: sealed::Sealed {
    const SIZE: usize;
}

macro_rules! quant_groups {
    ($($name:ident => $size:literal),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, Default)]
            pub struct $name;

            impl sealed::Sealed for $name {}

            impl QuantGroup for $name {
                const SIZE: usize = $size;
            }
        )*
    };
}

quant_groups!(Group32 => 32, Group64 => 64, Group128 => 128, Group256 => 256);

/// Statically specialized GEMV.
pub fn int4_gemv<R: Runtime, E: GemvElement, G: QuantGroup>(
    client: &ComputeClient<R>,
    activation: &TensorHandleRef<R>,
    packed: &TensorHandleRef<R>,
    scales: &TensorHandleRef<R>,
    zeros: &TensorHandleRef<R>,
    output: &TensorHandleRef<R>,
    config: &GemvConfig,
) -> GemvResult<()> {
    int4_gemv_launch::<R, E>(client, activation, packed, scales, zeros, output, config, G::SIZE)
}

pub type LaunchFn<R> = fn(
    &ComputeClient<R>,
    &TensorHandleRef<R>,
    &TensorHandleRef<R>,
    &TensorHandleRef<R>,
    &TensorHandleRef<R>,
    &TensorHandleRef<R>,
    &GemvConfig,
) -> GemvResult<()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelVariant {
    pub name: &'static str,
    pub elem: ElemKind,
    pub group_size: usize,
}

macro_rules! kernel_variants {
    ($($name:literal => ($elem:ty, $group:ty)),* $(,)?) => {
        pub const KERNEL_VARIANTS: &[KernelVariant] = &[
            $(
                KernelVariant {
                    name: $name,
                    elem: <$elem as GemvElement>::KIND,
                    group_size: <$group as QuantGroup>::SIZE,
                },
            )*
        ];

        fn variant_launcher<R: Runtime>(elem: ElemKind, group_size: usize) -> Option<LaunchFn<R>> {
            $(
                if elem == <$elem as GemvElement>::KIND && group_size == <$group as QuantGroup>::SIZE {
                    return Some(int4_gemv::<R, $elem, $group> as LaunchFn<R>);
                }
            )*
            None
        }
    };
}

kernel_variants!(
    "int4_gemv_f32_g32" => (f32, Group32),
    "int4_gemv_f32_g64" => (f32, Group64),
    "int4_gemv_f32_g128" => (f32, Group128),
    "int4_gemv_f32_g256" => (f32, Group256),
    "int4_gemv_f16_g32" => (half::f16, Group32),
    "int4_gemv_f16_g64" => (half::f16, Group64),
    "int4_gemv_f16_g128" => (half::f16, Group128),
    "int4_gemv_f16_g256" => (half::f16, Group256),
    "int4_gemv_bf16_g32" => (half::bf16, Group32),
    "int4_gemv_bf16_g64" => (half::bf16, Group64),
    "int4_gemv_bf16_g128" => (half::bf16, Group128),
    "int4_gemv_bf16_g256" => (half::bf16, Group256),
);

pub fn launcher_for<R: Runtime>(elem: ElemKind, group_size: usize) -> Option<LaunchFn<R>> {
    let launcher = variant_launcher::<R>(elem, group_size);
    if launcher.is_none() {
        log::trace!("no int4_gemv variant for {} / g{}", elem.as_str(), group_size);
    }
    launcher
}

pub fn launcher_by_name<R: Runtime>(name: &str) -> Option<LaunchFn<R>> {
    let variant = KERNEL_VARIANTS.iter().find(|v| v.name == name)?;
    log::trace!("resolved int4_gemv variant {name}");
    launcher_for::<R>(variant.elem, variant.group_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubecl::wgpu::WgpuRuntime;

    #[test]
    fn table_has_every_combination_once() {
        assert_eq!(KERNEL_VARIANTS.len(), 12);
        for elem in [ElemKind::F32, ElemKind::F16, ElemKind::BF16] {
            for gs in [32, 64, 128, 256] {
                let matches: Vec<_> = KERNEL_VARIANTS
                    .iter()
                    .filter(|v| v.elem == elem && v.group_size == gs)
                    .collect();
                assert_eq!(matches.len(), 1, "{elem:?} g{gs}");
                assert_eq!(matches[0].name, format!("int4_gemv_{}_g{}", elem.as_str(), gs));
            }
        }
    }

    #[test]
    fn every_variant_resolves_to_a_launcher() {
        for variant in KERNEL_VARIANTS {
            assert!(launcher_by_name::<WgpuRuntime>(variant.name).is_some(), "{}", variant.name);
        }
    }

    #[test]
    fn unknown_combinations_do_not_resolve() {
        assert!(launcher_for::<WgpuRuntime>(ElemKind::F16, 16).is_none());
        assert!(launcher_for::<WgpuRuntime>(ElemKind::BF16, 512).is_none());
        assert!(launcher_by_name::<WgpuRuntime>("int4_gemv_f64_g32").is_none());
    }

    #[test]
    fn elem_sizes_match_rust_types() {
        assert_eq!(ElemKind::F32.size(), core::mem::size_of::<f32>());
        assert_eq!(ElemKind::F16.size(), core::mem::size_of::<half::f16>());
        assert_eq!(ElemKind::BF16.size(), core::mem::size_of::<half::bf16>());
    }
}
