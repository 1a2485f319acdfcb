//! Error types for the Galaxia engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and the simulation run.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: galaxia_core::config::ConfigError,
    },

    /// The output schedule could not be built.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: galaxia_core::clock::ClockError,
    },

    /// Building or running the simulation failed.
    #[error("simulation error: {source}")]
    Simulation {
        /// The underlying simulation error.
        #[from]
        source: galaxia_core::error::SimulationError,
    },
}
