//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context as _, Result};
pub use itertools::Itertools as _;
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::BTreeMap,
    convert::TryFrom,
    fmt::{self, Display},
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};
pub use tch::{Device, IndexOp, Kind, Tensor};
pub use tch_goodies::{TensorExt as _, EPSILON};
pub use tracing::{debug, info, info_span, warn};
