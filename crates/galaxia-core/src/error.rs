//! Error types for simulation setup and execution.
//!
//! [`SimulationError`] is what every public operation of this crate
//! returns. Subsystem errors convert into it with `?`: disk-model errors
//! and I/O keep their source, clock and matrix problems become
//! configuration or domain errors.

use galaxia_disk::DiskError;

use crate::integrator::IntegrationError;

/// Errors that can occur while configuring, running or reloading a
/// simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// Bad setup detected before the run starts (duplicate zone names,
    /// non-uniform timestep, malformed migration matrix).
    #[error("configuration error: {reason}")]
    Configuration {
        /// What is wrong with the setup.
        reason: String,
    },

    /// A physically invalid input (negative or non-finite output time).
    #[error("domain error: {reason}")]
    Domain {
        /// What is wrong with the input.
        reason: String,
    },

    /// The disk model rejected an operation.
    #[error("disk model error: {source}")]
    Disk {
        /// The underlying disk error.
        #[from]
        source: DiskError,
    },

    /// The single-zone integrator failed for one zone.
    #[error("integration error in zone {zone}: {source}")]
    Integration {
        /// Name of the zone that failed.
        zone: String,
        /// The underlying integrator error.
        source: IntegrationError,
    },

    /// Reading or writing simulation output failed.
    #[error("output I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Encoding or decoding persisted attributes failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// Zones drifted out of step or mass was not conserved.
    #[error("consistency violation at step {timestep}: {reason}")]
    Consistency {
        /// Step at which the violation was detected.
        timestep: u64,
        /// What was violated.
        reason: String,
    },
}

impl SimulationError {
    /// Shorthand for a [`SimulationError::Configuration`].
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
