//! Query program configuration format.

use crate::common::*;
use pixel_query::QueryConfig;

/// The main query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub experiment: ExperimentConfig,
    pub model: ModelConfig,
    pub pool: PoolConfig,
    pub query: QueryConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config: Self = json5::from_str(&text)?;
        config.query.validate()?;
        Ok(config)
    }
}

/// Experiment naming and output location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub dir_root: PathBuf,
    pub experim_name: String,
}

impl ExperimentConfig {
    /// The checkpoint directory `<dir_root>/checkpoints/<experim_name>`.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.dir_root.join("checkpoints").join(&self.experim_name)
    }
}

/// The model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModelConfig {
    /// A TorchScript module that returns per-pixel class logits.
    TorchScript { script_file: PathBuf },
}

/// The labelling pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PoolConfig {
    /// A directory of `*.ot` tensor files.
    TensorFiles { dir: PathBuf },
}
