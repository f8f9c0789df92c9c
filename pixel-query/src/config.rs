//! Query selection options.

use crate::{common::*, error::QueryError, strategy::QueryStrategy};

/// The options of one active-learning query round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// The uncertainty criterion.
    pub query_strategy: QueryStrategy,
    /// The number of pixels queried per image.
    pub n_pixels_by_us: NonZeroUsize,
    /// If positive, the top ratio of pixels that form the candidate set.
    #[serde(default = "default_top_n_percent")]
    pub top_n_percent: R64,
    /// Draw the candidate set at random first, then rank within it.
    ///
    /// It requires a positive `top_n_percent`.
    #[serde(default)]
    pub reverse_order: bool,
    /// Keep dropout active and average repeated predictions.
    #[serde(default)]
    pub use_mc_dropout: bool,
    /// The number of forward passes in MC-dropout mode.
    #[serde(default = "default_mc_n_steps")]
    pub mc_n_steps: NonZeroUsize,
    /// The void class that is never queried.
    #[serde(default = "default_ignore_index")]
    pub ignore_index: i64,
    pub n_classes: NonZeroUsize,
    /// The total downsampling stride of the model.
    #[serde(default = "default_stride_total")]
    pub stride_total: NonZeroUsize,
    /// The dataset name. Inputs of the "voc" dataset are padded to stride multiples.
    pub dataset_name: String,
    /// The device where inference runs.
    #[serde(with = "tch_serde::serde_device", default = "default_device")]
    pub device: Device,
    /// The seed of candidate sampling and random scores.
    pub seed: Option<u64>,
}

impl QueryConfig {
    /// Creates a configuration with default values for optional fields.
    pub fn new(
        query_strategy: QueryStrategy,
        n_pixels_by_us: NonZeroUsize,
        n_classes: NonZeroUsize,
        dataset_name: impl Into<String>,
    ) -> Self {
        Self {
            query_strategy,
            n_pixels_by_us,
            top_n_percent: default_top_n_percent(),
            reverse_order: false,
            use_mc_dropout: false,
            mc_n_steps: default_mc_n_steps(),
            ignore_index: default_ignore_index(),
            n_classes,
            stride_total: default_stride_total(),
            dataset_name: dataset_name.into(),
            device: Device::Cpu,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let top_n_percent = self.top_n_percent.raw();

        if !(0.0..=1.0).contains(&top_n_percent) {
            bail!(QueryError::InvalidConfig(format!(
                "top_n_percent must be in range [0, 1], but get {}",
                top_n_percent
            )));
        }
        if self.reverse_order && !self.uses_percentage_budget() {
            bail!(QueryError::InvalidConfig(
                "reverse_order requires a positive top_n_percent".into()
            ));
        }

        Ok(())
    }

    pub fn uses_percentage_budget(&self) -> bool {
        self.top_n_percent.raw() > 0.0
    }

    /// The number of top ranked (or randomly drawn) candidates in a `height` x `width` image.
    pub fn candidate_budget(&self, height: i64, width: i64) -> i64 {
        if self.uses_percentage_budget() {
            (self.top_n_percent.raw() * (height * width) as f64).round() as i64
        } else {
            self.n_pixels_by_us.get() as i64
        }
    }

    /// Whether inputs are padded to multiples of `stride_total` before inference.
    pub fn pads_to_stride(&self) -> bool {
        self.dataset_name.eq_ignore_ascii_case("voc")
    }
}

fn default_top_n_percent() -> R64 {
    r64(0.0)
}

fn default_mc_n_steps() -> NonZeroUsize {
    NonZeroUsize::new(20).unwrap()
}

fn default_ignore_index() -> i64 {
    255
}

fn default_stride_total() -> NonZeroUsize {
    NonZeroUsize::new(32).unwrap()
}

fn default_device() -> Device {
    Device::cuda_if_available()
}
