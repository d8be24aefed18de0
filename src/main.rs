// External crates
use anyhow::Result;
use log::{error, info};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sentitrend::build_info;
use sentitrend::pipeline::{run, PipelineConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Optional JSON config as the only argument
    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(PathBuf::from);
    info!(
        "sentitrend {} ({})",
        build_info::PKG_VERSION,
        build_info::RUSTC_VERSION
    );

    let config = PipelineConfig::load(config_path.as_deref())?;
    info!(
        "Forecasting {} over {} .. {} with {} backcandles",
        config.symbol, config.report_start, config.report_end, config.backcandles
    );

    match run(&config) {
        Ok(path) => {
            info!("Prediction summary written to {}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("Pipeline failed: {:#}", e);
            Err(e)
        }
    }
}
