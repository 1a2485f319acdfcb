//! Multizone chemical evolution for the Galaxia simulator.
//!
//! This crate owns the timestep loop that couples many one-zone chemical
//! evolution models through gas exchange and the radial migration of
//! stellar populations, plus everything around it: configuration, the
//! clock, consistency checks and persisted output.
//!
//! # Modules
//!
//! - [`clock`] -- Uniform-step clock with the output schedule.
//! - [`config`] -- Configuration loading from `galaxia-config.yaml` into
//!   strongly-typed structs.
//! - [`conservation`] -- Cross-zone consistency checks after every step.
//! - [`error`] -- [`SimulationError`].
//! - [`integrator`] -- [`ZoneIntegrator`] trait and [`SimpleIntegrator`].
//! - [`matrix`] -- Zone-to-zone migration matrices.
//! - [`mdf`] -- Metallicity distribution functions.
//! - [`multizone`] -- The multizone timestep loop.
//! - [`output`] -- The `<name>.gce` output directory.
//! - [`simulation`] -- [`Simulation`] factory over both variants.
//! - [`singlezone`] -- One zone without migration.
//! - [`yields`] -- [`YieldTable`] trait and constant yields.
//! - [`zone`] -- Per-zone state and science parameters.
//!
//! [`SimulationError`]: error::SimulationError
//! [`ZoneIntegrator`]: integrator::ZoneIntegrator
//! [`SimpleIntegrator`]: integrator::SimpleIntegrator
//! [`Simulation`]: simulation::Simulation
//! [`YieldTable`]: yields::YieldTable

pub mod clock;
pub mod config;
pub mod conservation;
pub mod error;
pub mod integrator;
pub mod matrix;
pub mod mdf;
pub mod multizone;
pub mod output;
pub mod simulation;
pub mod singlezone;
pub mod yields;
pub mod zone;
