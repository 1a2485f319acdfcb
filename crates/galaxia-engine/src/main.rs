//! Simulation binary for Galaxia.
//!
//! Loads the run configuration, builds a singlezone or multizone
//! simulation from it, and evolves it to the final output time, writing
//! the `<name>.gce` output directory.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `galaxia-config.yaml` (or `GALAXIA_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the output schedule from the time config
//! 4. Build the simulation (zones, yields, migration)
//! 5. Run the simulation
//! 6. Log the result

mod error;
mod prompt;

use std::io::IsTerminal;
use std::path::PathBuf;

use galaxia_core::config::SimulationConfig;
use galaxia_core::simulation::{RunOutcome, Simulation};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::prompt::StdinPrompt;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "GALAXIA_CONFIG";

/// Configuration file read when `GALAXIA_CONFIG` is unset.
const DEFAULT_CONFIG: &str = "galaxia-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the simulation
/// fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging is not up yet, so remember whether
    //    the file was found and report it afterwards.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }

    info!("galaxia-engine starting");
    match &source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }
    info!(
        name = config.run.name,
        n_tracers = config.run.n_tracers,
        dt = config.time.dt,
        end = config.time.end,
        mode = config.disk.mode.as_str(),
        "Run configured"
    );

    // 3. Build the output schedule.
    let times = config.time.output_times().map_err(EngineError::from)?;
    info!(outputs = times.len(), "Output schedule built");

    // 4. Build the simulation.
    let mut simulation = Simulation::new(&config).map_err(EngineError::from)?;
    if std::io::stdin().is_terminal() {
        simulation.set_prompt(Box::new(StdinPrompt));
    }
    info!(
        name = simulation.name(),
        zones = simulation.n_zones(),
        "Simulation built"
    );

    // 5. Run.
    let outcome = simulation
        .run(&times, config.run.overwrite)
        .map_err(EngineError::from)?;

    // 6. Log the result.
    match outcome {
        RunOutcome::Completed(result) => {
            let tracers: usize = result.zones.values().map(|z| z.tracers).sum();
            let stars: f64 = result.zones.values().map(|z| z.stellar_mass).sum();
            info!(
                run_id = %result.run_id,
                steps = result.steps,
                output = %result.output.display(),
                tracers,
                stellar_mass = stars,
                "galaxia-engine finished"
            );
        }
        RunOutcome::Declined => {
            warn!(name = simulation.name(), "Existing output kept, nothing was run");
        }
    }
    Ok(())
}

/// Load the simulation configuration.
///
/// Reads the file named by `GALAXIA_CONFIG`, or `galaxia-config.yaml` in
/// the working directory. Falls back to defaults when the file does not
/// exist; the returned path is `None` in that case.
fn load_config() -> Result<(SimulationConfig, Option<PathBuf>), EngineError> {
    let path = std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    if path.exists() {
        let config = SimulationConfig::from_file(&path)?;
        Ok((config, Some(path)))
    } else {
        Ok((SimulationConfig::default(), None))
    }
}
