use anyhow::{Context, Result};
use query::config::Config;
use std::{env, path::PathBuf};
use structopt::StructOpt;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Select pixels to annotate for active learning
struct Args {
    #[structopt(long, default_value = "query.json5")]
    /// configuration file
    pub config_file: PathBuf,
    #[structopt(long, default_value = "0")]
    /// the first query round
    pub round: usize,
    #[structopt(long, default_value = "1")]
    /// the number of consecutive rounds
    pub num_rounds: usize,
}

pub fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse arguments
    let Args {
        config_file,
        round,
        num_rounds,
    } = Args::from_args();
    let config = Config::open(&config_file)
        .with_context(|| format!("failed to load config file '{}'", config_file.display()))?;

    // start query rounds
    query::start(&config, round, num_rounds)?;

    Ok(())
}
