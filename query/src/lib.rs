//! The query program of pixel-level active learning.

pub mod common;
pub mod config;
pub mod utils;

use crate::{
    common::*,
    config::{Config, ModelConfig, PoolConfig},
};
use pixel_query::{JsonStatsStore, QueryError, QuerySelector, TensorFilePool, TorchScriptModel};

/// The entry of query program.
///
/// It runs `num_rounds` consecutive rounds starting from `first_round`.
pub fn start(config: &Config, first_round: usize, num_rounds: usize) -> Result<()> {
    let start_time = Local::now();
    let Config {
        experiment,
        model: model_config,
        pool: pool_config,
        query: query_config,
    } = config;
    let checkpoint_dir = experiment.checkpoint_dir();

    // create dirs and save config
    {
        fs::create_dir_all(&checkpoint_dir)?;
        let path = checkpoint_dir.join(format!(
            "config-{}.json5",
            start_time.format(utils::FILE_STRFTIME)
        ));
        let text = serde_json::to_string_pretty(config)?;
        fs::write(&path, text)?;
    }

    // load model
    let mut model = match model_config {
        ModelConfig::TorchScript { script_file } => {
            TorchScriptModel::load(script_file, query_config.device)?
        }
    };

    // load pool
    let mut pool = match pool_config {
        PoolConfig::TensorFiles { dir } => TensorFilePool::open(dir)?,
    };

    let store = JsonStatsStore::from_dir(&checkpoint_dir);
    let mut selector = QuerySelector::new(query_config.clone(), store)?;

    for round in first_round..(first_round + num_rounds) {
        if let Err(err) = selector.run(round, &mut model, &mut pool) {
            let exhausted = matches!(
                err.downcast_ref::<QueryError>(),
                Some(QueryError::BudgetExhausted { .. })
            );
            if !exhausted {
                return Err(err);
            }

            warn!("{}, stop at round {}", err, round);
            break;
        }
    }

    info!(
        "query session finished in {}s",
        (Local::now() - start_time).num_seconds()
    );
    Ok(())
}
