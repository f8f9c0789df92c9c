//! Common imports from external crates.

pub use anyhow::{ensure, Result};
pub use chrono::Local;
pub use serde::{Deserialize, Serialize};
pub use std::{
    fs,
    path::{Path, PathBuf},
};
pub use tracing::{info, warn};
