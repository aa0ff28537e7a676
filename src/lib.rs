//! 4-bit group-quantized matrix-vector product for single-token decode.
//!
//! The device kernel lives in [`kernel`], host-side packing, quantization and
//! reference math in [`quant`], and a burn linear layer built on top of the
//! kernel in [`modules`].

pub mod error;
pub mod kernel;
pub mod modules;
pub mod quant;

pub use error::{GemvError, GemvResult};
pub use kernel::int4_gemv::{element_supported, int4_gemv_launch, GemvConfig};
pub use kernel::select_config;
pub use kernel::specialization::{
    int4_gemv, launcher_by_name, launcher_for, ElemKind, GemvElement, Group128, Group256,
    Group32, Group64, KernelVariant, QuantGroup, KERNEL_VARIANTS,
};
pub use quant::{quantize_groupwise, QuantizedWeight};
