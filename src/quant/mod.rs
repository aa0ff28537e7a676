//! Host-side int4 packing, group-wise quantization and reference math.

pub mod groupwise;
pub mod lockstep;
pub mod packing;

pub use groupwise::{quantize_groupwise, QuantizedWeight, CODE_MIDPOINT, SUPPORTED_GROUP_SIZES};
pub use lockstep::{folded_gemv, CooperativeGroup};
pub use packing::{bytes_to_words, pack_codes, pack_word, unpack_codes, unpack_word};
