mod boosting;
mod config;
mod derive;
mod difference;
mod dml;
mod error;
mod forest;
mod impute;
mod loader;
mod panel;
mod plot;
mod preprocess;
mod report;
mod scenario;
mod tree;
mod validate;

use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AnalysisConfig, ConfigSource, Verbosity};
use crate::error::Result;
use crate::loader::write_panel;
use crate::plot::save_cate_chart;
use crate::preprocess::preprocess;
use crate::scenario::run_all_scenarios;
use crate::validate::validate;

const CONFIG_PATH: &str = "config/analysis.toml";

// Diagnostics go to stderr; `RUST_LOG` wins over the configured verbosity.
fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

// Run the whole analysis
//
// Preprocess the raw panel, save it, estimate every scenario, draw its
// chart, and check the estimates against the reference table. Returns
// whether validation passed.
fn run(config: &AnalysisConfig) -> Result<bool> {
    let paths = &config.paths;
    let mut processed = preprocess(&paths.raw_data, &config.panel)?;
    if !processed.imputation.unresolved.is_empty() {
        warn!(
            columns = processed.imputation.unresolved.len(),
            cells = processed.imputation.missing_after,
            "missing values remain after imputation"
        );
    }
    if !processed.differenced {
        warn!("estimating on levels, the panel was not first-differenced");
    }
    write_panel(&mut processed.data, &paths.processed_data)?;

    let specs = config.scenario_specs();
    let estimates = run_all_scenarios(&processed.data, &specs, config);
    for estimate in &estimates {
        println!("{}", estimate);
        if let Err(e) = save_cate_chart(estimate, &paths.figures_dir) {
            warn!(scenario = %estimate.scenario, error = %e, "could not save plot");
        }
    }
    if estimates.is_empty() {
        warn!("no scenario produced an estimate, skipping validation");
        return Ok(false);
    }

    let report = validate(&estimates, &config.references);
    println!("{}", report);
    Ok(report.all_match)
}

fn main() -> ExitCode {
    let loaded = AnalysisConfig::load(Path::new(CONFIG_PATH));
    init_tracing(loaded.as_ref().map(|(c, _)| c.verbosity).unwrap_or_default());
    let config = match loaded {
        Ok((config, ConfigSource::File(path))) => {
            info!(path = %path.display(), scenarios = config.scenarios.len(), "loaded config");
            config
        }
        Ok((config, ConfigSource::Defaults)) => {
            info!(path = CONFIG_PATH, "no config file found, using built-in defaults");
            config
        }
        Err(e) => {
            error!(path = CONFIG_PATH, error = %e, "could not read configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) if !config.validation.fail_on_mismatch => {
            info!("validation failed but fail_on_mismatch is off");
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::FAILURE,
        Err(e) if e.is_load_failure() => {
            error!(error = %e, "halting execution because data preprocessing failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "analysis failed");
            ExitCode::FAILURE
        }
    }
}
