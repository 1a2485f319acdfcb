//! Multizone coordinator: the timestep loop.
//!
//! Each step runs through these phases:
//!
//! 1. **Capture** -- record every zone's metallicity for the step; at an
//!    output time, append a history row to every zone.
//!
//! 2. **Gas exchange** -- evaluate the gas migration matrix at the current
//!    time and move that fraction of each zone's gas and metals to its
//!    destinations.
//!
//! 3. **Integrate** -- advance every zone one step through the
//!    [`ZoneIntegrator`].
//!
//! 4. **Verify** -- every zone at the same step, the exchange conserves
//!    mass, no negative masses.
//!
//! 5. **Spawn** -- `n_tracers` new tracers per zone carry the stars just
//!    formed there and are assigned their analogs.
//!
//! 6. **Migrate** -- under analog migration every tracer, including the
//!    ones just formed, moves to its position at the end of the step.
//!    Under matrix migration each tracer present at the start of the step
//!    may change zone. Tracers are then filed under their new zones.
//!
//! When the last output has been captured the coordinator writes zone
//! histories, metallicity distributions and the tracer table.
//!
//! [`ZoneIntegrator`]: crate::integrator::ZoneIntegrator

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::path::PathBuf;

use chrono::Utc;
use galaxia_disk::{AnalogLog, MigrationEngine};
use galaxia_types::{RunId, RunPhase, TracerParticle, ZoneIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::clock::SimulationClock;
use crate::config::StellarMigrationKind;
use crate::conservation::{ConsistencyResult, verify_exchange, verify_zones};
use crate::error::SimulationError;
use crate::integrator::GasFlow;
use crate::matrix::MigrationMatrix;
use crate::mdf::Mdf;
use crate::output::{
    DeclineOverwrite, MigrationAttributes, OutputStore, OverwritePrompt, RunAttributes,
    StarMigrationAttributes, TracerRow,
};
use crate::simulation::{Chemistry, RunOutcome, RunResult, ZoneResult, record_failure};
use crate::zone::ZoneState;

/// Relative tolerance on the timestep of different zones.
const DT_TOLERANCE: f64 = 1e-12;

/// How tracers move between zones.
#[derive(Debug, Clone)]
pub enum StarMigration {
    /// Follow analog star particles.
    Analog(MigrationEngine),
    /// Sample zone changes from a matrix of per-step probabilities.
    Matrix(MigrationMatrix),
}

/// What happened during one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSummary {
    /// The step that was executed.
    pub timestep: u64,
    /// Time at the start of the step, Gyr.
    pub time: f64,
    /// Tracers created this step.
    pub tracers_formed: usize,
    /// Tracers that changed zone this step.
    pub tracers_moved: usize,
    /// Gas in all zones after the step, Msun.
    pub total_gas: f64,
}

/// Callback invoked after each step completes.
pub trait StepCallback: Send {
    /// Called after a step completes successfully.
    fn on_step(&mut self, summary: &StepSummary, zones: &[ZoneState]);
}

/// A no-op step callback.
pub struct NoOpCallback;

impl StepCallback for NoOpCallback {
    fn on_step(&mut self, _summary: &StepSummary, _zones: &[ZoneState]) {}
}

/// Many zones coupled by gas and stellar migration.
#[derive(Debug)]
pub struct Multizone {
    name: String,
    zones: Vec<ZoneState>,
    chemistry: Chemistry,
    gas_matrix: MigrationMatrix,
    stars: StarMigration,
    n_tracers: u32,
    simple: bool,
    verbose: bool,
    write_analogs: bool,
    phase: RunPhase,
    seed: Option<u64>,
    rng: StdRng,
    output_dir: PathBuf,
    prompt: Box<dyn OverwritePrompt>,
    catalog_path: Option<PathBuf>,
}

impl Multizone {
    /// Couple `zones` with stellar migration `stars` and no gas migration.
    ///
    /// Defaults: one tracer per zone per step, full zone histories, a
    /// fresh random seed, output in the working directory, existing output
    /// never overwritten without `overwrite`.
    pub fn new(
        name: impl Into<String>,
        zones: Vec<ZoneState>,
        chemistry: Chemistry,
        stars: StarMigration,
    ) -> Self {
        let size = zones.len();
        Self {
            name: name.into(),
            zones,
            chemistry,
            gas_matrix: MigrationMatrix::new(size),
            stars,
            n_tracers: 1,
            simple: false,
            verbose: false,
            write_analogs: false,
            phase: RunPhase::Configured,
            seed: None,
            rng: StdRng::from_rng(&mut rand::rng()),
            output_dir: PathBuf::from("."),
            prompt: Box::new(DeclineOverwrite),
            catalog_path: None,
        }
    }

    /// Simulation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of zones.
    pub fn n_zones(&self) -> usize {
        self.zones.len()
    }

    /// The zones in order.
    pub fn zones(&self) -> &[ZoneState] {
        &self.zones
    }

    /// Mutable access to the zones before the run.
    pub fn zones_mut(&mut self) -> &mut [ZoneState] {
        &mut self.zones
    }

    /// Shared physics.
    pub const fn chemistry(&self) -> &Chemistry {
        &self.chemistry
    }

    /// Mutable access to the shared physics.
    pub const fn chemistry_mut(&mut self) -> &mut Chemistry {
        &mut self.chemistry
    }

    /// Lifecycle phase.
    pub const fn phase(&self) -> RunPhase {
        self.phase
    }

    /// The gas migration matrix.
    pub const fn gas_matrix(&self) -> &MigrationMatrix {
        &self.gas_matrix
    }

    /// Mutable access to the gas migration matrix.
    pub const fn gas_matrix_mut(&mut self) -> &mut MigrationMatrix {
        &mut self.gas_matrix
    }

    /// Stellar migration.
    pub const fn stars(&self) -> &StarMigration {
        &self.stars
    }

    /// Tracers spawned per zone per step.
    pub const fn n_tracers(&self) -> u32 {
        self.n_tracers
    }

    /// Set the tracers spawned per zone per step.
    pub const fn set_n_tracers(&mut self, n: u32) {
        self.n_tracers = n;
    }

    /// Whether only final tracer positions are kept.
    pub const fn simple(&self) -> bool {
        self.simple
    }

    /// Keep only final tracer positions.
    pub const fn set_simple(&mut self, simple: bool) {
        self.simple = simple;
    }

    /// Whether each output time is logged at info level.
    pub const fn verbose(&self) -> bool {
        self.verbose
    }

    /// Log each output time at info level.
    pub const fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Write `analogs.tsv` during the run (analog migration only).
    pub const fn set_write_analogs(&mut self, write: bool) {
        self.write_analogs = write;
    }

    /// Fix the random seed.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Directory the `<name>.gce` output directory is created in.
    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = dir;
    }

    /// Replace the prompt consulted before overwriting output.
    pub fn set_prompt(&mut self, prompt: Box<dyn OverwritePrompt>) {
        self.prompt = prompt;
    }

    /// Record where the analog catalog came from.
    pub fn set_catalog_path(&mut self, path: Option<PathBuf>) {
        self.catalog_path = path;
    }

    /// Check the setup before running.
    ///
    /// Differences in stellar-physics parameters between zones are logged
    /// as warnings only.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Configuration`] for duplicate zone
    /// names, differing timesteps, a matrix or binning that does not match
    /// the number of zones, zero tracers with analog migration, or invalid
    /// distribution bins.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let n = self.zones.len();
        let Some(first) = self.zones.first() else {
            return Err(SimulationError::configuration("a multizone simulation needs at least one zone"));
        };

        let mut seen = BTreeSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.name.as_str()) {
                return Err(SimulationError::configuration(format!(
                    "duplicate zone name {}",
                    zone.name
                )));
            }
            if (zone.dt - first.dt).abs() > DT_TOLERANCE * first.dt.abs() {
                return Err(SimulationError::configuration(format!(
                    "zone {} has timestep {} but zone {} has {}",
                    zone.name, zone.dt, first.name, first.dt
                )));
            }
        }

        if self.gas_matrix.size() != n {
            return Err(SimulationError::configuration(format!(
                "gas migration matrix is {0}x{0} for {n} zones",
                self.gas_matrix.size()
            )));
        }
        match &self.stars {
            StarMigration::Analog(engine) => {
                if self.n_tracers == 0 {
                    return Err(SimulationError::configuration(
                        "analog migration needs at least one tracer per zone per step",
                    ));
                }
                let binned = engine.binning().n_zones();
                if binned != n {
                    return Err(SimulationError::configuration(format!(
                        "radial binning has {binned} zones, simulation has {n}"
                    )));
                }
            }
            StarMigration::Matrix(matrix) => {
                if matrix.size() != n {
                    return Err(SimulationError::configuration(format!(
                        "stellar migration matrix is {0}x{0} for {n} zones",
                        matrix.size()
                    )));
                }
            }
        }
        self.chemistry.mdf.validate()?;

        for zone in self.zones.iter().skip(1) {
            let differences = first.params.plausibility_differences(&zone.params);
            if !differences.is_empty() {
                warn!(
                    zone = %zone.name,
                    reference = %first.name,
                    parameters = ?differences,
                    "Zone parameters differ from the first zone"
                );
            }
        }
        Ok(())
    }

    /// Run the simulation, capturing output at `output_times` (Gyr).
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Configuration`] if the setup is invalid
    /// or the simulation already ran, [`SimulationError::Domain`] for a
    /// negative or non-finite output time, and any error raised during
    /// the run. A run that fails after starting leaves its output flagged
    /// as failed.
    pub fn run(&mut self, output_times: &[f64], overwrite: bool) -> Result<RunOutcome, SimulationError> {
        self.run_with_callback(output_times, overwrite, &mut NoOpCallback)
    }

    /// [`Multizone::run`] with a callback after every step.
    pub fn run_with_callback(
        &mut self,
        output_times: &[f64],
        overwrite: bool,
        callback: &mut dyn StepCallback,
    ) -> Result<RunOutcome, SimulationError> {
        if self.phase != RunPhase::Configured {
            return Err(SimulationError::configuration(format!(
                "simulation {} has already run",
                self.name
            )));
        }
        self.validate()?;
        let dt = self.zones.first().map_or(0.0, |z| z.dt);
        let mut clock = SimulationClock::new(dt, output_times)?;

        let store = OutputStore::new(&self.output_dir, &self.name);
        if !store.prepare(overwrite, self.prompt.as_mut())? {
            return Ok(RunOutcome::Declined);
        }
        let run_id = RunId::new();
        let mut attributes = self.attributes(run_id, clock.output_times());
        store.write_attributes(&attributes)?;
        store.write_migration(&MigrationAttributes {
            gas: self.gas_matrix.view(),
        })?;

        self.phase = RunPhase::Running;
        info!(
            name = %self.name,
            run_id = %run_id,
            zones = self.zones.len(),
            steps = clock.total_steps(),
            "Simulation starting"
        );

        if let Err(err) = self.evolve(&mut clock, &store, callback) {
            self.phase = RunPhase::Failed;
            record_failure(&store, &mut attributes, &err);
            return Err(err);
        }
        match self.write_results(&store, run_id, clock.timestep()) {
            Ok(result) => {
                self.phase = RunPhase::Completed;
                attributes.status = RunPhase::Completed;
                store.write_attributes(&attributes)?;
                info!(
                    name = %self.name,
                    steps = result.steps,
                    output = %result.output.display(),
                    "Simulation completed"
                );
                Ok(RunOutcome::Completed(result))
            }
            Err(err) => {
                self.phase = RunPhase::Failed;
                record_failure(&store, &mut attributes, &err);
                Err(err)
            }
        }
    }

    fn attributes(&self, run_id: RunId, output_times: &[f64]) -> RunAttributes {
        let stars = match &self.stars {
            StarMigration::Analog(engine) => StarMigrationAttributes {
                kind: StellarMigrationKind::Analog,
                mode: Some(engine.mode()),
                catalog: self.catalog_path.clone(),
                edges: Some(engine.binning().edges().to_vec()),
                matrix: None,
            },
            StarMigration::Matrix(matrix) => StarMigrationAttributes {
                kind: StellarMigrationKind::Matrix,
                mode: None,
                catalog: None,
                edges: None,
                matrix: Some(matrix.view()),
            },
        };
        RunAttributes {
            run_id,
            name: self.name.clone(),
            created_at: Utc::now(),
            status: RunPhase::Running,
            n_zones: self.zones.len(),
            n_tracers: self.n_tracers,
            simple: self.simple,
            verbose: self.verbose,
            dt: self.zones.first().map_or(0.0, |z| z.dt),
            elements: self.chemistry.elements.clone(),
            zone_names: self.zones.iter().map(|z| z.name.clone()).collect(),
            seed: self.seed,
            stars: Some(stars),
            mdf: Some(self.chemistry.mdf),
            solar: self.chemistry.solar.clone(),
            yields: self.chemistry.yield_table.clone(),
            output_times: output_times.to_vec(),
        }
    }

    fn evolve(
        &mut self,
        clock: &mut SimulationClock,
        store: &OutputStore,
        callback: &mut dyn StepCallback,
    ) -> Result<(), SimulationError> {
        let mut log = match (&self.stars, self.write_analogs) {
            (StarMigration::Analog(_), true) => Some(AnalogLog::create(&store.analogs_path())?),
            _ => None,
        };
        let mut age_warned = false;

        loop {
            for zone in &mut self.zones {
                zone.record_metallicity();
            }
            if clock.output_due() {
                let time = clock.time();
                for zone in &mut self.zones {
                    zone.capture(time);
                }
                clock.mark_output();
                if self.verbose {
                    info!(time, "Output captured");
                } else {
                    debug!(time, "Output captured");
                }
            }
            if clock.finished() {
                break;
            }

            let summary = self.step(clock, log.as_mut(), &mut age_warned)?;
            debug!(
                timestep = summary.timestep,
                time = summary.time,
                tracers = summary.tracers_formed,
                moved = summary.tracers_moved,
                "Step complete"
            );
            callback.on_step(&summary, &self.zones);
            clock.advance()?;
        }

        if let Some(mut log) = log {
            log.flush()?;
            info!(rows = log.rows(), "Analog log written");
        }
        Ok(())
    }

    fn step(
        &mut self,
        clock: &SimulationClock,
        mut log: Option<&mut AnalogLog>,
        age_warned: &mut bool,
    ) -> Result<StepSummary, SimulationError> {
        let time = clock.time();
        let dt = clock.dt();
        let timestep = clock.timestep();
        let next = timestep.saturating_add(1);

        // --- Gas exchange ---
        let (inflows, outflows) = self.exchange(time)?;

        // --- Integrate ---
        for ((zone, inflow), outflow) in self.zones.iter_mut().zip(&inflows).zip(&outflows) {
            let report = self
                .chemistry
                .integrator
                .advance(zone, dt, inflow, outflow, self.chemistry.yields.as_ref())
                .map_err(|source| SimulationError::Integration {
                    zone: zone.name.clone(),
                    source,
                })?;
            zone.finish_step(report);
        }

        // --- Verify ---
        for check in [verify_exchange(&inflows, &outflows), verify_zones(&self.zones, next)] {
            if let ConsistencyResult::Violation(reason) = check {
                return Err(SimulationError::Consistency {
                    timestep: next,
                    reason,
                });
            }
        }

        // --- Spawn ---
        let mut resident: Vec<TracerParticle> = self
            .zones
            .iter_mut()
            .flat_map(|z| mem::take(&mut z.tracers))
            .collect();
        let births: Vec<f64> = self.zones.iter().map(|z| z.last_step.formed).collect();
        let mut born = Vec::with_capacity(births.len().saturating_mul(self.n_tracers as usize));
        if self.n_tracers > 0 {
            let per_tracer = f64::from(self.n_tracers);
            for (index, formed) in births.into_iter().enumerate() {
                for _ in 0..self.n_tracers {
                    let mut tracer = TracerParticle::new(ZoneIndex(index), timestep, time, formed / per_tracer);
                    if let StarMigration::Analog(engine) = &self.stars {
                        engine.reset(&mut tracer, &mut self.rng)?;
                        if let Some(log) = log.as_deref_mut() {
                            log.record(tracer.zone_origin, tracer.t_form, tracer.z_final)?;
                        }
                    }
                    born.push(tracer);
                }
            }
        }
        let tracers_formed = born.len();

        // --- Migrate ---
        // Positions are evaluated at the end of the step, where the zones
        // now are. Analog tracers formed this step move too.
        let after = next as f64 * dt;
        let mut tracers_moved = 0;
        match &self.stars {
            StarMigration::Analog(engine) => {
                for tracer in born.iter_mut().chain(resident.iter_mut()) {
                    let previous = tracer.zone_current;
                    let outcome = engine.advance(tracer, after)?;
                    if outcome.age_capped && !*age_warned {
                        warn!(
                            t_form = tracer.t_form,
                            time = after,
                            "Tracer older than the reference simulation, holding its final position"
                        );
                        *age_warned = true;
                    }
                    if tracer.zone_current != previous {
                        tracers_moved += 1;
                    }
                }
            }
            StarMigration::Matrix(matrix) => {
                // per-step probabilities apply to tracers present at the start
                let rows = matrix.fractions(time)?;
                for tracer in &mut resident {
                    let previous = tracer.zone_current.get();
                    let row = rows.get(previous).map_or(&[][..], Vec::as_slice);
                    let u: f64 = self.rng.random();
                    let destination = sample_destination(row, u, previous);
                    if destination != previous {
                        tracers_moved += 1;
                    }
                    tracer.zone_current = ZoneIndex(destination);
                }
            }
        }

        // --- File tracers under their zones ---
        for mut tracer in born.into_iter().chain(resident) {
            if !self.simple {
                tracer.zone_history.push(tracer.zone_current);
            }
            let n = self.zones.len();
            let index = tracer.zone_current.get();
            let Some(zone) = self.zones.get_mut(index) else {
                return Err(SimulationError::Consistency {
                    timestep: next,
                    reason: format!("tracer moved to zone {index} of {n}"),
                });
            };
            zone.tracers.push(tracer);
        }

        Ok(StepSummary {
            timestep,
            time,
            tracers_formed,
            tracers_moved,
            total_gas: self.zones.iter().map(|z| z.gas).sum(),
        })
    }

    /// Gas arriving in and leaving every zone during the step at `time`.
    fn exchange(&self, time: f64) -> Result<(Vec<GasFlow>, Vec<GasFlow>), SimulationError> {
        let n = self.zones.len();
        let mut inflows = vec![GasFlow::default(); n];
        let mut outflows = vec![GasFlow::default(); n];
        if self.gas_matrix.is_zero() {
            return Ok((inflows, outflows));
        }
        let fractions = self.gas_matrix.fractions(time)?;
        for ((source, row), outflow) in self.zones.iter().zip(&fractions).zip(&mut outflows) {
            for (inflow, &fraction) in inflows.iter_mut().zip(row) {
                if fraction > 0.0 {
                    outflow.add_fraction_of(source, fraction);
                    inflow.add_fraction_of(source, fraction);
                }
            }
        }
        Ok((inflows, outflows))
    }

    /// Metallicity of a tracer's birth zone at its formation step.
    fn birth_metallicity(&self, tracer: &TracerParticle) -> Option<&BTreeMap<String, f64>> {
        self.zones
            .get(tracer.zone_origin.get())
            .and_then(|z| z.metallicity_at(tracer.timestep_origin))
    }

    /// Metallicity distributions of the stars resident in each zone.
    ///
    /// With full histories a tracer counts towards each zone in proportion
    /// to the steps it spent there; otherwise it counts towards its final
    /// zone only.
    pub fn distributions(&self) -> Vec<Mdf> {
        let mut builders: Vec<_> = self
            .zones
            .iter()
            .map(|_| self.chemistry.distribution_builder())
            .collect();
        for tracer in self.zones.iter().flat_map(|z| &z.tracers) {
            let Some(metallicity) = self.birth_metallicity(tracer) else {
                continue;
            };
            if self.simple || tracer.zone_history.is_empty() {
                if let Some(builder) = builders.get_mut(tracer.zone_current.get()) {
                    builder.add(tracer.mass, metallicity);
                }
                continue;
            }
            let mut visits: BTreeMap<usize, u32> = BTreeMap::new();
            for zone in &tracer.zone_history {
                *visits.entry(zone.get()).or_insert(0) += 1;
            }
            let steps = tracer.zone_history.len() as f64;
            for (zone, count) in visits {
                if let Some(builder) = builders.get_mut(zone) {
                    builder.add(tracer.mass * f64::from(count) / steps, metallicity);
                }
            }
        }
        builders.into_iter().map(|b| b.finish()).collect()
    }

    /// One row per tracer, ordered by formation step and birth zone.
    fn tracer_rows(&self) -> Vec<TracerRow> {
        let mut tracers: Vec<&TracerParticle> = self.zones.iter().flat_map(|z| &z.tracers).collect();
        tracers.sort_by_key(|t| (t.timestep_origin, t.zone_origin));
        tracers
            .into_iter()
            .map(|t| TracerRow {
                t_form: t.t_form,
                zone_origin: t.zone_origin.get(),
                zone_final: t.zone_current.get(),
                mass: t.mass,
                metallicity: self.birth_metallicity(t).cloned().unwrap_or_default(),
            })
            .collect()
    }

    fn write_results(&self, store: &OutputStore, run_id: RunId, steps: u64) -> Result<RunResult, SimulationError> {
        let distributions = self.distributions();
        let mut zones = BTreeMap::new();
        for (zone, mdf) in self.zones.iter().zip(distributions) {
            store.write_zone(zone)?;
            store.write_mdf(&zone.name, &mdf)?;
            zones.insert(
                zone.name.clone(),
                ZoneResult {
                    tracers: zone.tracers.len(),
                    stellar_mass: zone.tracer_mass(),
                    gas: zone.gas,
                    mdf,
                },
            );
        }
        store.write_tracers(&self.chemistry.elements, &self.tracer_rows())?;
        Ok(RunResult {
            run_id,
            steps,
            output: store.root().to_path_buf(),
            zones,
        })
    }
}

/// Destination of a tracer leaving `current` given the row of per-step
/// transfer probabilities and a uniform draw `u`.
fn sample_destination(row: &[f64], u: f64, current: usize) -> usize {
    let mut cumulative = 0.0;
    for (destination, &p) in row.iter().enumerate() {
        if destination == current {
            continue;
        }
        cumulative += p;
        if u < cumulative {
            return destination;
        }
    }
    current
}
