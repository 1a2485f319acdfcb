//! The simulation entry point.
//!
//! A [`Simulation`] is either a [`Singlezone`] (one zone, no migration) or
//! a [`Multizone`] (many zones exchanging gas and tracers). The variant is
//! chosen once by [`Simulation::new`] from the configured number of zones,
//! or by [`Simulation::from_output`] from a persisted run.
//!
//! Both variants share a [`Chemistry`]: the integrator, the yield table,
//! the tracked elements and the metallicity distribution settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use galaxia_disk::{AnalogCatalog, CatalogColumns, MigrationEngine, RadialBinning};
use galaxia_types::{MigrationMode, RunId, RunPhase};
use tracing::{error, info, warn};

use crate::config::{MatrixEntry, SimulationConfig, StellarMigrationKind};
use crate::error::SimulationError;
use crate::integrator::{SimpleIntegrator, ZoneIntegrator};
use crate::matrix::{MatrixView, MigrationMatrix};
use crate::mdf::{Mdf, MdfBins, MdfBuilder};
use crate::multizone::{Multizone, StarMigration};
use crate::output::{OutputStore, OverwritePrompt, RunAttributes, StarMigrationAttributes};
use crate::singlezone::Singlezone;
use crate::yields::{ConstantYields, ElementYield, YieldTable, default_yields, solar_abundance};
use crate::zone::{ZoneParameters, ZoneState};

/// Outer radius used when a persisted run does not record its zone edges, kpc.
const FALLBACK_MAX_RADIUS: f64 = 30.0;

/// Physics shared by every zone of a simulation.
#[derive(Debug)]
pub struct Chemistry {
    /// Advances one zone by one step.
    pub integrator: Box<dyn ZoneIntegrator>,
    /// Nucleosynthetic yields handed to the integrator.
    pub yields: Arc<dyn YieldTable>,
    /// The constant table behind `yields`, kept so it can be persisted.
    pub yield_table: Option<BTreeMap<String, ElementYield>>,
    /// Tracked elements in configuration order.
    pub elements: Vec<String>,
    /// Solar abundances for `[X/H]`.
    pub solar: BTreeMap<String, f64>,
    /// Metallicity distribution binning.
    pub mdf: MdfBins,
}

impl Chemistry {
    /// Default physics for `elements`: forward Euler, built-in yields and
    /// solar abundances, default bins.
    pub fn new(elements: Vec<String>) -> Self {
        let solar = elements
            .iter()
            .filter_map(|e| solar_abundance(e).map(|z| (e.clone(), z)))
            .collect();
        Self {
            integrator: Box::new(SimpleIntegrator),
            yields: Arc::new(ConstantYields::new(default_yields())),
            yield_table: Some(default_yields()),
            elements,
            solar,
            mdf: MdfBins::default(),
        }
    }

    /// Physics described by a configuration.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let table = config.yields.table.clone();
        Self {
            integrator: Box::new(SimpleIntegrator),
            yields: Arc::new(ConstantYields::new(table.clone())),
            yield_table: Some(table),
            elements: config.run.elements.clone(),
            solar: config.solar_abundances(),
            mdf: config.mdf,
        }
    }

    /// Replace the yield table with an arbitrary implementation. The table
    /// is no longer persisted.
    pub fn set_yields(&mut self, yields: Arc<dyn YieldTable>) {
        self.yields = yields;
        self.yield_table = None;
    }

    /// Replace the integrator.
    pub fn set_integrator(&mut self, integrator: Box<dyn ZoneIntegrator>) {
        self.integrator = integrator;
    }

    /// An empty distribution builder for one zone.
    pub(crate) fn distribution_builder(&self) -> MdfBuilder {
        MdfBuilder::new(self.mdf, &self.elements, &self.solar)
    }
}

/// Per-zone summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneResult {
    /// Tracers resident at the end of the run.
    pub tracers: usize,
    /// Stellar mass resident at the end of the run, Msun.
    pub stellar_mass: f64,
    /// Gas mass at the end of the run, Msun.
    pub gas: f64,
    /// Metallicity distribution functions of the resident stars.
    pub mdf: Mdf,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Identifier written to the attributes.
    pub run_id: RunId,
    /// Steps taken.
    pub steps: u64,
    /// The output directory.
    pub output: PathBuf,
    /// Results keyed by zone name.
    pub zones: BTreeMap<String, ZoneResult>,
}

/// How a call to `run` ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run finished and wrote its output.
    Completed(RunResult),
    /// Output already existed and replacing it was declined.
    Declined,
}

impl RunOutcome {
    /// The result, if the run completed.
    pub fn completed(self) -> Option<RunResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Declined => None,
        }
    }
}

/// Flag persisted output as failed after `err`.
pub(crate) fn record_failure(
    store: &OutputStore,
    attributes: &mut RunAttributes,
    err: &SimulationError,
) {
    attributes.status = RunPhase::Failed;
    error!(name = %attributes.name, error = %err, "Simulation failed");
    if let Err(secondary) = store.write_attributes(attributes) {
        warn!(error = %secondary, "Could not mark output as failed");
    }
}

/// A configured simulation.
#[derive(Debug)]
pub enum Simulation {
    /// One zone, no migration.
    Singlezone(Box<Singlezone>),
    /// Many zones with gas and stellar migration.
    Multizone(Box<Multizone>),
}

impl Simulation {
    /// Build the simulation a configuration describes.
    ///
    /// One zone gives [`Simulation::Singlezone`]; anything more gives
    /// [`Simulation::Multizone`] with zones named `zone0`, `zone1`, ...
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Disk`] if the zone edges are invalid or
    /// the analog catalog cannot be loaded, and
    /// [`SimulationError::Configuration`] for zero zones or a migration
    /// entry outside the matrix.
    pub fn new(config: &SimulationConfig) -> Result<Self, SimulationError> {
        let binning = config.disk.binning()?;
        let n_zones = config.run.n_zones.unwrap_or_else(|| binning.n_zones());
        if n_zones == 0 {
            return Err(SimulationError::configuration("a simulation needs at least one zone"));
        }
        let chemistry = Chemistry::from_config(config);
        let dt = config.time.dt;

        if n_zones == 1 {
            let zone = ZoneState::new(&config.run.name, dt, config.zone.clone(), &chemistry.elements);
            let mut sz = Singlezone::new(&config.run.name, zone, chemistry);
            sz.set_verbose(config.run.verbose);
            sz.set_output_dir(config.run.output_dir.clone());
            info!(name = %config.run.name, "Singlezone simulation configured");
            return Ok(Self::Singlezone(Box::new(sz)));
        }

        let zones: Vec<ZoneState> = (0..n_zones)
            .map(|i| ZoneState::new(format!("zone{i}"), dt, config.zone.clone(), &chemistry.elements))
            .collect();

        let stars = match config.disk.stellar_migration {
            StellarMigrationKind::Analog => {
                let catalog = match &config.disk.catalog {
                    Some(path) => AnalogCatalog::from_file(path)?,
                    None => {
                        warn!("No analog catalog configured, every tracer stays at its birth radius");
                        AnalogCatalog::from_columns(CatalogColumns::default())?
                    }
                };
                StarMigration::Analog(MigrationEngine::new(
                    Arc::new(catalog),
                    Arc::new(binning),
                    config.disk.mode,
                ))
            }
            StellarMigrationKind::Matrix => {
                StarMigration::Matrix(matrix_from_entries(n_zones, &config.disk.star_matrix)?)
            }
        };

        let mut mz = Multizone::new(&config.run.name, zones, chemistry, stars);
        *mz.gas_matrix_mut() = matrix_from_entries(n_zones, &config.disk.gas_matrix)?;
        mz.set_n_tracers(config.run.n_tracers);
        mz.set_simple(config.run.simple);
        mz.set_verbose(config.run.verbose);
        mz.set_write_analogs(config.run.write_analogs);
        mz.set_output_dir(config.run.output_dir.clone());
        mz.set_catalog_path(config.disk.catalog.clone());
        if let Some(seed) = config.run.seed {
            mz.set_seed(seed);
        }
        info!(
            name = %config.run.name,
            zones = n_zones,
            tracers_per_step = config.run.n_tracers,
            migration = ?config.disk.stellar_migration,
            "Multizone simulation configured"
        );
        Ok(Self::Multizone(Box::new(mz)))
    }

    /// Rebuild a simulation from the output directory of an earlier run.
    ///
    /// Missing optional data (zone parameters, the gas matrix, stellar
    /// migration settings, the catalog file) is replaced by defaults with a
    /// warning. Matrix entries that were functions of time come back as 0.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Io`] if the directory or its attributes
    /// file is missing and [`SimulationError::Serialization`] if a file is
    /// malformed.
    pub fn from_output(path: &Path) -> Result<Self, SimulationError> {
        let store = OutputStore::open(path);
        let attributes = store.read_attributes()?;

        let mut elements = attributes.elements.clone();
        if elements.is_empty() {
            warn!(path = %store.root().display(), "No elements recorded, using defaults");
            elements = SimulationConfig::default().run.elements;
        }
        let mut chemistry = Chemistry::new(elements);
        match &attributes.yields {
            Some(table) => {
                chemistry.yields = Arc::new(ConstantYields::new(table.clone()));
                chemistry.yield_table = Some(table.clone());
            }
            None => warn!("No yield table recorded, using built-in yields"),
        }
        chemistry.solar.extend(attributes.solar.clone());
        match attributes.mdf {
            Some(bins) => chemistry.mdf = bins,
            None => warn!("No MDF binning recorded, using defaults"),
        }

        let mut names = attributes.zone_names.clone();
        if names.len() != attributes.n_zones {
            warn!(
                recorded = names.len(),
                n_zones = attributes.n_zones,
                "Zone names missing, regenerating"
            );
            names = (0..attributes.n_zones).map(|i| format!("zone{i}")).collect();
        }
        let mut zones = Vec::with_capacity(names.len());
        for name in names {
            let zone = match store.read_zone(&name)? {
                Some(saved) => ZoneState::new(&name, saved.dt, saved.params, &chemistry.elements),
                None => {
                    warn!(zone = %name, "Zone attributes missing, using defaults");
                    ZoneState::new(&name, attributes.dt, ZoneParameters::default(), &chemistry.elements)
                }
            };
            zones.push(zone);
        }
        let output_dir = store
            .root()
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        if attributes.n_zones == 1 && attributes.stars.is_none() {
            let Some(zone) = zones.pop() else {
                return Err(SimulationError::configuration("persisted run has no zone"));
            };
            let mut sz = Singlezone::new(&attributes.name, zone, chemistry);
            sz.set_verbose(attributes.verbose);
            sz.set_output_dir(output_dir);
            return Ok(Self::Singlezone(Box::new(sz)));
        }

        let n_zones = zones.len();
        let stars = restore_stars(attributes.stars.as_ref(), n_zones)?;
        let mut mz = Multizone::new(&attributes.name, zones, chemistry, stars);
        match store.read_migration()? {
            Some(migration) => *mz.gas_matrix_mut() = restore_matrix("gas", &migration.gas)?,
            None => warn!("Gas migration matrix missing, using no gas migration"),
        }
        mz.set_n_tracers(attributes.n_tracers);
        mz.set_simple(attributes.simple);
        mz.set_verbose(attributes.verbose);
        mz.set_output_dir(output_dir);
        if let Some(stars) = &attributes.stars {
            mz.set_catalog_path(stars.catalog.clone());
        }
        if let Some(seed) = attributes.seed {
            mz.set_seed(seed);
        }
        info!(name = %attributes.name, zones = n_zones, "Simulation restored from output");
        Ok(Self::Multizone(Box::new(mz)))
    }

    /// Run the simulation, capturing output at `output_times` (Gyr).
    ///
    /// # Errors
    ///
    /// See [`Singlezone::run`] and [`Multizone::run`].
    pub fn run(&mut self, output_times: &[f64], overwrite: bool) -> Result<RunOutcome, SimulationError> {
        match self {
            Self::Singlezone(sz) => sz.run(output_times, overwrite),
            Self::Multizone(mz) => mz.run(output_times, overwrite),
        }
    }

    /// Simulation name.
    pub fn name(&self) -> &str {
        match self {
            Self::Singlezone(sz) => sz.name(),
            Self::Multizone(mz) => mz.name(),
        }
    }

    /// Number of zones.
    pub fn n_zones(&self) -> usize {
        match self {
            Self::Singlezone(_) => 1,
            Self::Multizone(mz) => mz.n_zones(),
        }
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> RunPhase {
        match self {
            Self::Singlezone(sz) => sz.phase(),
            Self::Multizone(mz) => mz.phase(),
        }
    }

    /// The multizone variant, if this is one.
    pub fn as_multizone(&self) -> Option<&Multizone> {
        match self {
            Self::Singlezone(_) => None,
            Self::Multizone(mz) => Some(mz),
        }
    }

    /// Mutable access to the multizone variant, if this is one.
    pub fn as_multizone_mut(&mut self) -> Option<&mut Multizone> {
        match self {
            Self::Singlezone(_) => None,
            Self::Multizone(mz) => Some(mz),
        }
    }

    /// Replace the prompt consulted before overwriting output.
    pub fn set_prompt(&mut self, prompt: Box<dyn OverwritePrompt>) {
        match self {
            Self::Singlezone(sz) => sz.set_prompt(prompt),
            Self::Multizone(mz) => mz.set_prompt(prompt),
        }
    }

    /// Replace the output directory the `<name>.gce` directory goes in.
    pub fn set_output_dir(&mut self, dir: PathBuf) {
        match self {
            Self::Singlezone(sz) => sz.set_output_dir(dir),
            Self::Multizone(mz) => mz.set_output_dir(dir),
        }
    }
}

/// Build a matrix from its non-zero constant entries.
fn matrix_from_entries(size: usize, entries: &[MatrixEntry]) -> Result<MigrationMatrix, SimulationError> {
    let mut matrix = MigrationMatrix::new(size);
    for entry in entries {
        matrix.set_constant(entry.from, entry.to, entry.rate)?;
    }
    Ok(matrix)
}

/// Rebuild a persisted matrix, warning about entries that were functions.
fn restore_matrix(which: &str, view: &MatrixView) -> Result<MigrationMatrix, SimulationError> {
    let (matrix, unencoded) = MigrationMatrix::from_view(view)?;
    for (row, column) in unencoded {
        warn!(
            matrix = which,
            row,
            column,
            "Matrix entry was a function of time and was not saved, using 0"
        );
    }
    Ok(matrix)
}

/// Rebuild stellar migration from persisted settings.
fn restore_stars(
    saved: Option<&StarMigrationAttributes>,
    n_zones: usize,
) -> Result<StarMigration, SimulationError> {
    let Some(saved) = saved else {
        warn!("Stellar migration settings missing, using analogs with an empty catalog");
        return analog_migration(None, None, MigrationMode::default(), n_zones);
    };
    match saved.kind {
        StellarMigrationKind::Analog => {
            let mode = saved.mode.unwrap_or_else(|| {
                warn!("Migration mode missing, using linear");
                MigrationMode::default()
            });
            analog_migration(saved.catalog.as_deref(), saved.edges.clone(), mode, n_zones)
        }
        StellarMigrationKind::Matrix => match &saved.matrix {
            Some(view) => Ok(StarMigration::Matrix(restore_matrix("stars", view)?)),
            None => {
                warn!("Stellar migration matrix missing, stars stay in their birth zone");
                Ok(StarMigration::Matrix(MigrationMatrix::new(n_zones)))
            }
        },
    }
}

fn analog_migration(
    catalog: Option<&Path>,
    edges: Option<Vec<f64>>,
    mode: MigrationMode,
    n_zones: usize,
) -> Result<StarMigration, SimulationError> {
    let catalog = match catalog {
        Some(path) if path.exists() => AnalogCatalog::from_file(path)?,
        Some(path) => {
            warn!(path = %path.display(), "Analog catalog not found, using an empty catalog");
            AnalogCatalog::from_columns(CatalogColumns::default())?
        }
        None => {
            warn!("No analog catalog recorded, using an empty catalog");
            AnalogCatalog::from_columns(CatalogColumns::default())?
        }
    };
    let binning = match edges {
        Some(edges) => RadialBinning::new(edges)?,
        None => {
            warn!("Zone edges missing, using equal-width zones");
            let n = n_zones.max(1) as f64;
            RadialBinning::new(
                (0..=n_zones.max(1))
                    .map(|i| FALLBACK_MAX_RADIUS * i as f64 / n)
                    .collect(),
            )?
        }
    };
    Ok(StarMigration::Analog(MigrationEngine::new(
        Arc::new(catalog),
        Arc::new(binning),
        mode,
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn one_zone_builds_singlezone() {
        let config = SimulationConfig::parse("run:\n  n_zones: 1\n  name: solo\n").unwrap();
        let sim = Simulation::new(&config).unwrap();
        assert!(matches!(sim, Simulation::Singlezone(_)));
        assert_eq!(sim.n_zones(), 1);
        assert_eq!(sim.name(), "solo");
        assert_eq!(sim.phase(), RunPhase::Configured);
    }

    #[test]
    fn binning_decides_zone_count() {
        let config = SimulationConfig::parse("disk:\n  edges: [0, 10, 20, 30]\n").unwrap();
        let sim = Simulation::new(&config).unwrap();
        let mz = sim.as_multizone().unwrap();
        assert_eq!(mz.n_zones(), 3);
        assert_eq!(mz.zones().first().unwrap().name, "zone0");
        assert!(mz.gas_matrix().is_zero());
    }

    #[test]
    fn gas_matrix_entries_are_applied() {
        let yaml = "disk:\n  edges: [0, 10, 20, 30]\n  gas_matrix:\n    - { from: 2, to: 1, rate: 0.05 }\n";
        let config = SimulationConfig::parse(yaml).unwrap();
        let sim = Simulation::new(&config).unwrap();
        let mz = sim.as_multizone().unwrap();
        assert!((mz.gas_matrix().rate(2, 1, 0.0).unwrap() - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn gas_matrix_entry_out_of_range() {
        let yaml = "disk:\n  edges: [0, 10, 20, 30]\n  gas_matrix:\n    - { from: 3, to: 1, rate: 0.05 }\n";
        let config = SimulationConfig::parse(yaml).unwrap();
        assert!(matches!(
            Simulation::new(&config),
            Err(SimulationError::Configuration { .. })
        ));
    }

    #[test]
    fn chemistry_defaults() {
        let chemistry = Chemistry::new(vec!["fe".to_owned(), "xx".to_owned()]);
        assert!(chemistry.solar.contains_key("fe"));
        assert!(!chemistry.solar.contains_key("xx"));
        assert!(chemistry.yield_table.is_some());
    }
}
