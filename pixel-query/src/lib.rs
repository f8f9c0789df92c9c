//! The building blocks of pixel-level active-learning query selection.

mod common;
pub mod config;
pub mod error;
pub mod model;
pub mod pool;
pub mod selector;
pub mod stats;
pub mod store;
pub mod strategy;

pub use config::QueryConfig;
pub use error::QueryError;
pub use model::{InferenceMode, SegmentationModel, TorchScriptModel};
pub use pool::{MemoryPool, PoolRecord, QueryPool, TensorFilePool};
pub use selector::{QuerySelector, Selection};
pub use stats::{QueryStats, QueryStatsSnapshot};
pub use store::{JsonStatsStore, MemoryStatsStore, StatsStore};
pub use strategy::{QueryStrategy, UncertaintyScorer};
