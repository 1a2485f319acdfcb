//! Disk model for the Galaxia simulator: zones, analog star particles and
//! the radial migration of stellar populations.
//!
//! The catalog and binning are built once before a run and shared
//! read-only (via [`std::sync::Arc`]) by everything that migrates tracers.
//!
//! # Modules
//!
//! - [`catalog`] -- Column-wise analog star particle table with windowed search
//! - [`binning`] -- Radial zone edges, radius to zone mapping
//! - [`migration`] -- Analog assignment and the three kinematic modes
//! - [`analog_log`] -- Append-only record of analog assignments
//! - [`error`] -- Error types

pub mod analog_log;
pub mod binning;
pub mod catalog;
pub mod error;
pub mod migration;

pub use analog_log::AnalogLog;
pub use binning::RadialBinning;
pub use catalog::{AnalogCatalog, CatalogColumns, SearchWindow};
pub use error::DiskError;
pub use migration::{MAX_AGE_GYR, MigrationEngine, MigrationOutcome, MigrationStars, radius_at};
