//! One-zone simulation without migration.
//!
//! Uses the same integrator, yields, clock and output layout as the
//! multizone coordinator but allocates no tracers and no migration
//! matrix. Its metallicity distribution weights the stars formed in every
//! step by the gas-phase metallicity at the start of that step.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use galaxia_types::{RunId, RunPhase};
use tracing::{debug, info};

use crate::clock::SimulationClock;
use crate::conservation::{ConsistencyResult, verify_zones};
use crate::error::SimulationError;
use crate::integrator::GasFlow;
use crate::mdf::Mdf;
use crate::output::{DeclineOverwrite, OutputStore, OverwritePrompt, RunAttributes};
use crate::simulation::{Chemistry, RunOutcome, RunResult, ZoneResult, record_failure};
use crate::zone::ZoneState;

/// A single zone evolved on its own.
#[derive(Debug)]
pub struct Singlezone {
    name: String,
    zone: ZoneState,
    chemistry: Chemistry,
    verbose: bool,
    phase: RunPhase,
    output_dir: PathBuf,
    prompt: Box<dyn OverwritePrompt>,
}

impl Singlezone {
    /// Wrap `zone` as a simulation called `name`.
    pub fn new(name: impl Into<String>, zone: ZoneState, chemistry: Chemistry) -> Self {
        Self {
            name: name.into(),
            zone,
            chemistry,
            verbose: false,
            phase: RunPhase::Configured,
            output_dir: PathBuf::from("."),
            prompt: Box::new(DeclineOverwrite),
        }
    }

    /// Simulation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The zone.
    pub const fn zone(&self) -> &ZoneState {
        &self.zone
    }

    /// Shared physics.
    pub const fn chemistry(&self) -> &Chemistry {
        &self.chemistry
    }

    /// Lifecycle phase.
    pub const fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Log each output time at info level.
    pub const fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Directory the `<name>.gce` output directory is created in.
    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = dir;
    }

    /// Replace the prompt consulted before overwriting output.
    pub fn set_prompt(&mut self, prompt: Box<dyn OverwritePrompt>) {
        self.prompt = prompt;
    }

    /// Run the simulation, capturing output at `output_times` (Gyr).
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Configuration`] if the simulation
    /// already ran or the bins are invalid, [`SimulationError::Domain`]
    /// for a negative or non-finite output time, and
    /// [`SimulationError::Integration`] if the zone cannot be advanced.
    pub fn run(&mut self, output_times: &[f64], overwrite: bool) -> Result<RunOutcome, SimulationError> {
        if self.phase != RunPhase::Configured {
            return Err(SimulationError::configuration(format!(
                "simulation {} has already run",
                self.name
            )));
        }
        self.chemistry.mdf.validate()?;
        let mut clock = SimulationClock::new(self.zone.dt, output_times)?;

        let store = OutputStore::new(&self.output_dir, &self.name);
        if !store.prepare(overwrite, self.prompt.as_mut())? {
            return Ok(RunOutcome::Declined);
        }
        let run_id = RunId::new();
        let mut attributes = RunAttributes {
            run_id,
            name: self.name.clone(),
            created_at: Utc::now(),
            status: RunPhase::Running,
            n_zones: 1,
            n_tracers: 0,
            simple: false,
            verbose: self.verbose,
            dt: self.zone.dt,
            elements: self.chemistry.elements.clone(),
            zone_names: vec![self.zone.name.clone()],
            seed: None,
            stars: None,
            mdf: Some(self.chemistry.mdf),
            solar: self.chemistry.solar.clone(),
            yields: self.chemistry.yield_table.clone(),
            output_times: clock.output_times().to_vec(),
        };
        store.write_attributes(&attributes)?;

        self.phase = RunPhase::Running;
        info!(name = %self.name, run_id = %run_id, steps = clock.total_steps(), "Simulation starting");

        let finished = self.evolve(&mut clock).and_then(|()| {
            let mdf = self.distribution();
            store.write_zone(&self.zone)?;
            store.write_mdf(&self.zone.name, &mdf)?;
            Ok(mdf)
        });
        let mdf = match finished {
            Ok(mdf) => mdf,
            Err(err) => {
                self.phase = RunPhase::Failed;
                record_failure(&store, &mut attributes, &err);
                return Err(err);
            }
        };

        self.phase = RunPhase::Completed;
        attributes.status = RunPhase::Completed;
        store.write_attributes(&attributes)?;
        info!(name = %self.name, steps = clock.timestep(), "Simulation completed");

        let zones = BTreeMap::from([(
            self.zone.name.clone(),
            ZoneResult {
                tracers: 0,
                stellar_mass: self.zone.stars,
                gas: self.zone.gas,
                mdf,
            },
        )]);
        Ok(RunOutcome::Completed(RunResult {
            run_id,
            steps: clock.timestep(),
            output: store.root().to_path_buf(),
            zones,
        }))
    }

    fn evolve(&mut self, clock: &mut SimulationClock) -> Result<(), SimulationError> {
        let none = GasFlow::default();
        loop {
            self.zone.record_metallicity();
            if clock.output_due() {
                let time = clock.time();
                self.zone.capture(time);
                clock.mark_output();
                if self.verbose {
                    info!(time, "Output captured");
                } else {
                    debug!(time, "Output captured");
                }
            }
            if clock.finished() {
                return Ok(());
            }

            let report = self
                .chemistry
                .integrator
                .advance(&mut self.zone, clock.dt(), &none, &none, self.chemistry.yields.as_ref())
                .map_err(|source| SimulationError::Integration {
                    zone: self.zone.name.clone(),
                    source,
                })?;
            self.zone.finish_step(report);

            let next = clock.timestep().saturating_add(1);
            if let ConsistencyResult::Violation(reason) = verify_zones(std::slice::from_ref(&self.zone), next) {
                return Err(SimulationError::Consistency {
                    timestep: next,
                    reason,
                });
            }
            clock.advance()?;
        }
    }

    /// Metallicity distribution of every star formed so far.
    pub fn distribution(&self) -> Mdf {
        let mut builder = self.chemistry.distribution_builder();
        for (formed, metallicity) in self.zone.formed_history.iter().zip(&self.zone.metallicity_history) {
            builder.add(*formed, metallicity);
        }
        builder.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::zone::ZoneParameters;

    fn singlezone() -> Singlezone {
        let elements = vec!["fe".to_owned(), "o".to_owned()];
        let zone = ZoneState::new("solo", 0.05, ZoneParameters::default(), &elements);
        let mut sz = Singlezone::new("solo", zone, Chemistry::new(elements));
        sz.set_output_dir(std::env::temp_dir().join(format!("galaxia-singlezone-{}", uuid::Uuid::now_v7())));
        sz
    }

    #[test]
    fn run_captures_history_and_enriches() {
        let mut sz = singlezone();
        let result = sz.run(&[0.0, 0.5, 1.0], false).unwrap().completed().unwrap();
        assert_eq!(sz.phase(), RunPhase::Completed);
        assert_eq!(result.steps, 20);
        assert_eq!(sz.zone().history.len(), 3);
        assert!(sz.zone().metallicity("o") > 0.0);

        let solo = result.zones.get("solo").unwrap();
        assert_eq!(solo.tracers, 0);
        assert!(solo.stellar_mass > 0.0);
        let width = solo.mdf.edges.get(1).unwrap() - solo.mdf.edges.first().unwrap();
        let integral: f64 = solo.mdf.column("dn/d[o/h]").unwrap().iter().sum::<f64>() * width;
        assert!((integral - 1.0).abs() < 1e-9);

        let store = OutputStore::new(result.output.parent().unwrap(), "solo");
        let attributes = store.read_attributes().unwrap();
        assert_eq!(attributes.status, RunPhase::Completed);
        assert!(attributes.stars.is_none());
        std::fs::remove_dir_all(result.output.parent().unwrap()).unwrap();
    }

    #[test]
    fn existing_output_is_kept_when_declined() {
        let mut first = singlezone();
        let result = first.run(&[0.1], false).unwrap().completed().unwrap();
        let dir = result.output.parent().unwrap().to_path_buf();

        let mut second = singlezone();
        second.set_output_dir(dir.clone());
        assert_eq!(second.run(&[0.1], false).unwrap(), RunOutcome::Declined);
        assert_eq!(second.phase(), RunPhase::Configured);

        let mut third = singlezone();
        third.set_output_dir(dir.clone());
        assert!(third.run(&[0.1], true).unwrap().completed().is_some());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
