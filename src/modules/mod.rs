pub mod int4_linear;

pub use int4_linear::{Int4Linear, Int4LinearConfig};
