//! Common imports from external crates.

pub use anyhow::{ensure, format_err, Result};
pub use std::borrow::Borrow;
pub use tch::{Device, Kind, Tensor};
