//! Shared type definitions for the Galaxia chemical evolution simulator.
//!
//! This crate is the single source of truth for the identifiers, enums and
//! record types that flow between the disk model (`galaxia-disk`) and the
//! multizone coordinator (`galaxia-core`).
//!
//! # Modules
//!
//! - [`ids`] -- Run identifiers and dense zone / analog index newtypes
//! - [`enums`] -- Migration mode and run lifecycle phase
//! - [`structs`] -- Analog star particle records and tracer particles

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{MigrationMode, ParseModeError, RunPhase};
pub use ids::{AnalogIndex, RunId, ZoneIndex};
pub use structs::{AnalogRecord, NO_ANALOG_Z_FINAL, TracerParticle};
