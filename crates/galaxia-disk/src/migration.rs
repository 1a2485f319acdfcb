//! Radial migration of stellar populations via analog star particles.
//!
//! Every tracer is matched, at its formation time, to a star particle from
//! the [`AnalogCatalog`] that formed at a similar radius and time. From
//! then on the tracer moves from its birth radius towards the analog's
//! final radius according to the [`MigrationMode`].
//!
//! [`MigrationEngine`] holds no per-tracer state: everything it needs
//! (analog, birth and final radii, cached switch fraction) lives on the
//! [`TracerParticle`]. [`MigrationStars`] wraps an engine behind the
//! single-call `assign_or_advance(zone, t_form, t_now)` interface and keeps
//! the state of the most recent reset.
//!
//! # Search policy
//!
//! 1. Look for star particles within [`SearchWindow::NARROW`] of the
//!    birth radius and formation time.
//! 2. If none, retry once with [`SearchWindow::WIDE`].
//! 3. If still none, the tracer has no analog: it keeps its birth radius
//!    and records [`NO_ANALOG_Z_FINAL`].
//! 4. Otherwise pick one candidate uniformly at random.

use std::sync::Arc;

use galaxia_types::{AnalogIndex, MigrationMode, NO_ANALOG_Z_FINAL, TracerParticle, ZoneIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::analog_log::AnalogLog;
use crate::binning::RadialBinning;
use crate::catalog::{AnalogCatalog, SearchWindow};
use crate::error::DiskError;

/// Time span of the reference simulation, Gyr. Ages are capped here.
pub const MAX_AGE_GYR: f64 = 12.8;

/// Result of one migration step for one tracer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MigrationOutcome {
    /// Zone the tracer now resides in.
    pub zone: ZoneIndex,
    /// Galactocentric radius of the tracer, kpc.
    pub radius: f64,
    /// Whether the tracer's age exceeded [`MAX_AGE_GYR`] and was capped.
    pub age_capped: bool,
    /// Whether this step was the formation-time analog search.
    pub reset: bool,
}

/// Radius reached after a fraction `f` of the reference time span.
///
/// `switch` is the cached switch fraction for [`MigrationMode::Sudden`];
/// without one the jump happens at the end of the span.
pub fn radius_at(mode: MigrationMode, r_birth: f64, r_final: f64, f: f64, switch: Option<f64>) -> f64 {
    match mode {
        MigrationMode::Linear => r_birth + f * (r_final - r_birth),
        MigrationMode::Sudden => {
            if f < switch.unwrap_or(1.0) {
                r_birth
            } else {
                r_final
            }
        }
        MigrationMode::Diffusion => r_birth + f.sqrt() * (r_final - r_birth),
    }
}

/// Stateless analog search and interpolation over shared disk data.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    catalog: Arc<AnalogCatalog>,
    binning: Arc<RadialBinning>,
    mode: MigrationMode,
}

impl MigrationEngine {
    /// Create an engine over a shared catalog and binning.
    pub const fn new(
        catalog: Arc<AnalogCatalog>,
        binning: Arc<RadialBinning>,
        mode: MigrationMode,
    ) -> Self {
        Self {
            catalog,
            binning,
            mode,
        }
    }

    /// Current kinematic mode.
    pub const fn mode(&self) -> MigrationMode {
        self.mode
    }

    /// Switch the kinematic mode for subsequent steps.
    ///
    /// A tracer reset under linear or diffusion migration has no switch
    /// fraction; under sudden migration it reaches its final radius only
    /// at the age cap. [`MigrationStars::set_mode`] draws one instead.
    pub const fn set_mode(&mut self, mode: MigrationMode) {
        self.mode = mode;
    }

    /// The analog catalog.
    pub fn catalog(&self) -> &AnalogCatalog {
        &self.catalog
    }

    /// The zone boundaries.
    pub fn binning(&self) -> &RadialBinning {
        &self.binning
    }

    /// Pick an analog for a population born at radius `r` and time `t`,
    /// widening the window once if the narrow search is empty.
    pub fn search<R: Rng + ?Sized>(&self, r: f64, t: f64, rng: &mut R) -> Option<AnalogIndex> {
        let mut candidates = self.catalog.candidates(r, t, SearchWindow::NARROW);
        if candidates.is_empty() {
            candidates = self.catalog.candidates(r, t, SearchWindow::WIDE);
        }
        if candidates.is_empty() {
            return None;
        }
        let pick = rng.random_range(0..candidates.len());
        candidates.get(pick).copied()
    }

    /// Assign an analog to a freshly formed tracer.
    ///
    /// Overwrites any previous assignment. The tracer is placed back in
    /// its origin zone at its birth radius.
    pub fn reset<R: Rng + ?Sized>(
        &self,
        tracer: &mut TracerParticle,
        rng: &mut R,
    ) -> Result<MigrationOutcome, DiskError> {
        check_time("formation time", tracer.t_form)?;
        let r_birth = self.binning.birth_radius(tracer.zone_origin)?;

        tracer.r_birth = r_birth;
        tracer.analog = self.search(r_birth, tracer.t_form, rng);
        match tracer.analog {
            Some(index) => {
                let record = self.catalog.record(index)?;
                tracer.r_final = record.r_final;
                tracer.z_final = record.z_final;
            }
            None => {
                tracer.r_final = r_birth;
                tracer.z_final = NO_ANALOG_Z_FINAL;
            }
        }
        tracer.switch_fraction = match self.mode {
            MigrationMode::Sudden => Some(rng.random::<f64>()),
            MigrationMode::Linear | MigrationMode::Diffusion => None,
        };
        tracer.zone_current = tracer.zone_origin;

        Ok(MigrationOutcome {
            zone: tracer.zone_origin,
            radius: r_birth,
            age_capped: false,
            reset: true,
        })
    }

    /// Move an already assigned tracer to its position at `t_now`.
    pub fn advance(
        &self,
        tracer: &mut TracerParticle,
        t_now: f64,
    ) -> Result<MigrationOutcome, DiskError> {
        check_time("simulation time", t_now)?;
        check_order(tracer.t_form, t_now)?;

        let age = t_now - tracer.t_form;
        let age_capped = age > MAX_AGE_GYR;
        let f = age.min(MAX_AGE_GYR) / MAX_AGE_GYR;

        let radius = if tracer.has_analog() {
            radius_at(self.mode, tracer.r_birth, tracer.r_final, f, tracer.switch_fraction)
        } else {
            tracer.r_birth
        };
        let zone = self.binning.zone_of(radius)?;
        tracer.zone_current = zone;

        Ok(MigrationOutcome {
            zone,
            radius,
            age_capped,
            reset: false,
        })
    }

    /// Reset the tracer if it is at its formation time, otherwise advance it.
    #[allow(clippy::float_cmp)]
    pub fn step<R: Rng + ?Sized>(
        &self,
        tracer: &mut TracerParticle,
        t_now: f64,
        rng: &mut R,
    ) -> Result<MigrationOutcome, DiskError> {
        check_order(tracer.t_form, t_now)?;
        if t_now == tracer.t_form {
            self.reset(tracer, rng)
        } else {
            self.advance(tracer, t_now)
        }
    }
}

fn check_time(what: &str, t: f64) -> Result<(), DiskError> {
    if t.is_finite() && t >= 0.0 {
        Ok(())
    } else {
        Err(DiskError::domain(format!(
            "{what} must be finite and non-negative, got {t}"
        )))
    }
}

fn check_order(t_form: f64, t_now: f64) -> Result<(), DiskError> {
    if t_now < t_form {
        return Err(DiskError::domain(format!(
            "simulation time {t_now} precedes formation time {t_form}"
        )));
    }
    Ok(())
}

/// Callable migration engine that remembers its most recent reset.
///
/// Calling [`MigrationStars::assign_or_advance`] with `t_now == t_form`
/// performs an analog search; later calls for the same population follow
/// that analog. A call for a population that was never reset searches
/// first.
#[derive(Debug)]
pub struct MigrationStars {
    engine: MigrationEngine,
    rng: StdRng,
    tracer: Option<TracerParticle>,
    last_analog: Option<AnalogIndex>,
    last_radius: f64,
    log: Option<AnalogLog>,
    age_warned: bool,
}

impl MigrationStars {
    /// Create a wrapper seeded from the thread-local generator.
    pub fn new(catalog: Arc<AnalogCatalog>, binning: Arc<RadialBinning>, mode: MigrationMode) -> Self {
        Self::with_rng(catalog, binning, mode, StdRng::from_rng(&mut rand::rng()))
    }

    /// Create a wrapper with a reproducible generator.
    pub fn with_seed(
        catalog: Arc<AnalogCatalog>,
        binning: Arc<RadialBinning>,
        mode: MigrationMode,
        seed: u64,
    ) -> Self {
        Self::with_rng(catalog, binning, mode, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        catalog: Arc<AnalogCatalog>,
        binning: Arc<RadialBinning>,
        mode: MigrationMode,
        rng: StdRng,
    ) -> Self {
        Self {
            engine: MigrationEngine::new(catalog, binning, mode),
            rng,
            tracer: None,
            last_analog: None,
            last_radius: 0.0,
            log: None,
            age_warned: false,
        }
    }

    /// Attach (or detach) the analog log written at every reset.
    pub fn set_analog_log(&mut self, log: Option<AnalogLog>) {
        self.log = log;
    }

    /// Detach and return the analog log.
    pub const fn take_analog_log(&mut self) -> Option<AnalogLog> {
        self.log.take()
    }

    /// Set the kinematic mode from its name (case-insensitive).
    ///
    /// Switching to sudden migration draws a switch fraction for the
    /// population of the most recent reset if it has none, so it keeps
    /// following its analog under the new mode.
    pub fn set_mode(&mut self, mode: &str) -> Result<(), DiskError> {
        let parsed = mode
            .parse::<MigrationMode>()
            .map_err(|e| DiskError::domain(e.to_string()))?;
        self.engine.set_mode(parsed);
        if parsed == MigrationMode::Sudden {
            if let Some(tracer) = self.tracer.as_mut() {
                if tracer.switch_fraction.is_none() {
                    tracer.switch_fraction = Some(self.rng.random::<f64>());
                }
            }
        }
        Ok(())
    }

    /// Current kinematic mode.
    pub const fn mode(&self) -> MigrationMode {
        self.engine.mode()
    }

    /// The wrapped engine.
    pub const fn engine(&self) -> &MigrationEngine {
        &self.engine
    }

    /// Analog used by the most recent call.
    pub const fn last_analog(&self) -> Option<AnalogIndex> {
        self.last_analog
    }

    /// Radius computed by the most recent call, kpc.
    pub const fn last_radius(&self) -> f64 {
        self.last_radius
    }

    /// Zone of a population born in `zone` at `t_form`, evaluated at `t_now`.
    ///
    /// The analog log only records searches made at the formation time; a
    /// population first seen after it forms is searched for silently.
    #[allow(clippy::float_cmp)]
    pub fn assign_or_advance(
        &mut self,
        zone: ZoneIndex,
        t_form: f64,
        t_now: f64,
    ) -> Result<ZoneIndex, DiskError> {
        check_time("formation time", t_form)?;
        check_order(t_form, t_now)?;
        self.engine.binning().bounds_of(zone)?;

        let matches_last = self
            .tracer
            .as_ref()
            .is_some_and(|t| t.zone_origin == zone && t.t_form == t_form);
        if t_now == t_form || !matches_last {
            let mut tracer = TracerParticle::new(zone, 0, t_form, 0.0);
            let outcome = self.engine.reset(&mut tracer, &mut self.rng)?;
            if t_now == t_form {
                if let Some(log) = self.log.as_mut() {
                    log.record(zone, t_form, tracer.z_final)?;
                }
            }
            self.last_radius = outcome.radius;
            self.last_analog = tracer.analog;
            self.tracer = Some(tracer);
        }

        let Some(tracer) = self.tracer.as_mut() else {
            return Err(DiskError::domain("no tracer state after reset"));
        };
        let outcome = if t_now == t_form {
            MigrationOutcome {
                zone,
                radius: tracer.r_birth,
                age_capped: false,
                reset: true,
            }
        } else {
            self.engine.advance(tracer, t_now)?
        };

        if outcome.age_capped && !self.age_warned {
            warn!(
                age = t_now - t_form,
                cap = MAX_AGE_GYR,
                "Stellar population older than the reference simulation; age capped"
            );
            self.age_warned = true;
        }
        self.last_radius = outcome.radius;
        self.last_analog = tracer.analog;
        Ok(outcome.zone)
    }
}
