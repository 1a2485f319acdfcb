//! Enumeration types shared across the Galaxia workspace.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Migration mode
// ---------------------------------------------------------------------------

/// How a stellar population moves from its birth radius to the final
/// radius of its analog star particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// Radius interpolated linearly in age between birth and 12.8 Gyr.
    #[default]
    Linear,
    /// Population stays at its birth radius until a randomly drawn
    /// switch time, then jumps to the final radius.
    Sudden,
    /// Radius follows a `sqrt(age)` dependence, approximating a random walk.
    Diffusion,
}

impl MigrationMode {
    /// Return the canonical lowercase name of this mode.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Sudden => "sudden",
            Self::Diffusion => "diffusion",
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a migration mode string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized migration mode: {0:?} (expected linear, sudden or diffusion)")]
pub struct ParseModeError(pub String);

impl FromStr for MigrationMode {
    type Err = ParseModeError;

    /// Parse a mode name. Matching is case-insensitive and ignores
    /// surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "sudden" => Ok(Self::Sudden),
            "diffusion" => Ok(Self::Diffusion),
            _ => Err(ParseModeError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle phase of a simulation.
///
/// `Configured -> Running -> {Completed, Failed}`. A simulation that was
/// declined at the overwrite prompt stays `Configured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Zones, matrices and tracer counts are set; nothing has run yet.
    #[default]
    Configured,
    /// The timestep loop is executing.
    Running,
    /// Every scheduled output time was processed.
    Completed,
    /// A fatal error stopped the run; persisted output is partial.
    Failed,
}

impl RunPhase {
    /// Whether the phase is terminal.
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
