//! Tensor helpers shared by the query selection crates.

mod common;
pub mod tensor;

pub use tensor::*;

/// Lower bound applied to probabilities before taking logarithms.
pub const EPSILON: f64 = 1e-16;
