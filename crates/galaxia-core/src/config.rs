//! Configuration loading and typed config structures for Galaxia.
//!
//! The canonical configuration lives in `galaxia-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads the file. Every field has a
//! default, so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use galaxia_disk::{DiskError, RadialBinning};
use galaxia_types::MigrationMode;
use serde::{Deserialize, Serialize};

use crate::clock::ClockError;
use crate::mdf::MdfBins;
use crate::yields::{ElementYield, default_yields, solar_abundance};
use crate::zone::ZoneParameters;

/// Environment variable overriding `disk.catalog`.
pub const CATALOG_ENV: &str = "GALAXIA_CATALOG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `galaxia-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Run identity, tracer settings and output location.
    #[serde(default)]
    pub run: RunConfig,

    /// Timestep and output schedule.
    #[serde(default)]
    pub time: TimeConfig,

    /// Zone layout, stellar migration and gas exchange.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Science parameters applied to every zone.
    #[serde(default)]
    pub zone: ZoneParameters,

    /// Yield table and solar abundance overrides.
    #[serde(default)]
    pub yields: YieldConfig,

    /// Metallicity distribution binning.
    #[serde(default)]
    pub mdf: MdfBins,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The `GALAXIA_CATALOG` environment variable overrides
    /// `disk.catalog` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.disk.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.disk.apply_env_overrides();
        Ok(config)
    }

    /// Solar abundance of every tracked element: the override from
    /// `yields.solar` when present, the built-in table otherwise.
    pub fn solar_abundances(&self) -> BTreeMap<String, f64> {
        self.run
            .elements
            .iter()
            .filter_map(|e| {
                self.yields
                    .solar
                    .get(e)
                    .copied()
                    .or_else(|| solar_abundance(e))
                    .map(|z| (e.clone(), z))
            })
            .collect()
    }
}

/// Run identity and bookkeeping settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Simulation name; output goes to `<output_dir>/<name>.gce`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Expected number of zones. When absent the radial binning decides.
    #[serde(default)]
    pub n_zones: Option<usize>,

    /// Tracers spawned per zone per step.
    #[serde(default = "default_n_tracers")]
    pub n_tracers: u32,

    /// Only final tracer positions matter (no per-step zone history).
    #[serde(default)]
    pub simple: bool,

    /// Log the simulation time at every output.
    #[serde(default)]
    pub verbose: bool,

    /// Random seed; a fresh one is drawn when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Write the analog assignment log.
    #[serde(default)]
    pub write_analogs: bool,

    /// Directory the `<name>.gce` output directory is created in.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Replace existing output without asking.
    #[serde(default)]
    pub overwrite: bool,

    /// Tracked elements.
    #[serde(default = "default_elements")]
    pub elements: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            n_zones: None,
            n_tracers: default_n_tracers(),
            simple: false,
            verbose: false,
            seed: None,
            write_analogs: false,
            output_dir: default_output_dir(),
            overwrite: false,
            elements: default_elements(),
        }
    }
}

/// Timestep and output schedule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeConfig {
    /// Step size, Gyr.
    #[serde(default = "default_dt")]
    pub dt: f64,

    /// Final output time, Gyr.
    #[serde(default = "default_end")]
    pub end: f64,

    /// Spacing of output times, Gyr.
    #[serde(default = "default_output_interval")]
    pub output_interval: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            end: default_end(),
            output_interval: default_output_interval(),
        }
    }
}

impl TimeConfig {
    /// Output times `0, interval, 2 * interval, ...` up to and including
    /// `end`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the interval is not
    /// positive, and [`ClockError::InvalidOutputTime`] if `end` is
    /// negative or not finite.
    pub fn output_times(&self) -> Result<Vec<f64>, ClockError> {
        if !(self.end.is_finite() && self.end >= 0.0) {
            return Err(ClockError::InvalidOutputTime { time: self.end });
        }
        if !(self.output_interval.is_finite() && self.output_interval > 0.0) {
            return Err(ClockError::InvalidConfig {
                reason: format!(
                    "output interval must be positive, got {}",
                    self.output_interval
                ),
            });
        }
        let mut times = Vec::new();
        let mut k: u32 = 0;
        loop {
            let t = f64::from(k) * self.output_interval;
            if t > self.end - self.output_interval * 1e-9 {
                break;
            }
            times.push(t);
            k = k.saturating_add(1);
        }
        times.push(self.end);
        Ok(times)
    }
}

/// How tracers move between zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StellarMigrationKind {
    /// Follow analog star particles from the catalog.
    #[default]
    Analog,
    /// Sample zone changes from the stellar migration matrix.
    Matrix,
}

/// One constant migration matrix entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Source zone.
    pub from: usize,
    /// Destination zone.
    pub to: usize,
    /// Fraction moved per step.
    pub rate: f64,
}

/// Zone layout and migration settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiskConfig {
    /// Explicit zone edges in kpc. Overrides `max_radius` and `zone_width`.
    #[serde(default)]
    pub edges: Option<Vec<f64>>,

    /// Outer edge of the disk, kpc.
    #[serde(default = "default_max_radius")]
    pub max_radius: f64,

    /// Width of each zone, kpc.
    #[serde(default = "default_zone_width")]
    pub zone_width: f64,

    /// Kinematic mode for analog migration.
    #[serde(default)]
    pub mode: MigrationMode,

    /// Path of the analog star particle catalog.
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    /// How tracers move between zones.
    #[serde(default)]
    pub stellar_migration: StellarMigrationKind,

    /// Non-zero gas migration entries.
    #[serde(default)]
    pub gas_matrix: Vec<MatrixEntry>,

    /// Non-zero stellar migration entries (matrix migration only).
    #[serde(default)]
    pub star_matrix: Vec<MatrixEntry>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            edges: None,
            max_radius: default_max_radius(),
            zone_width: default_zone_width(),
            mode: MigrationMode::default(),
            catalog: None,
            stellar_migration: StellarMigrationKind::default(),
            gas_matrix: Vec::new(),
            star_matrix: Vec::new(),
        }
    }
}

impl DiskConfig {
    /// Override the catalog path with `GALAXIA_CATALOG` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_catalog_override(std::env::var_os(CATALOG_ENV).map(PathBuf::from));
    }

    fn apply_catalog_override(&mut self, value: Option<PathBuf>) {
        if let Some(path) = value.filter(|p| !p.as_os_str().is_empty()) {
            self.catalog = Some(path);
        }
    }

    /// Build the radial binning described by this section.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Domain`] if the edges are invalid.
    pub fn binning(&self) -> Result<RadialBinning, DiskError> {
        match &self.edges {
            Some(edges) => RadialBinning::new(edges.clone()),
            None => RadialBinning::uniform(self.max_radius, self.zone_width),
        }
    }
}

/// Yield settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct YieldConfig {
    /// Net yields per element.
    #[serde(default = "default_yields")]
    pub table: BTreeMap<String, ElementYield>,

    /// Solar abundance overrides per element.
    #[serde(default)]
    pub solar: BTreeMap<String, f64>,
}

impl Default for YieldConfig {
    fn default() -> Self {
        Self {
            table: default_yields(),
            solar: BTreeMap::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_name() -> String {
    "galaxia".to_owned()
}

const fn default_n_tracers() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_elements() -> Vec<String> {
    vec!["fe".to_owned(), "sr".to_owned(), "o".to_owned()]
}

const fn default_dt() -> f64 {
    0.01
}

const fn default_end() -> f64 {
    13.2
}

const fn default_output_interval() -> f64 {
    0.1
}

const fn default_max_radius() -> f64 {
    30.0
}

const fn default_zone_width() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert_eq!(config.run.name, "galaxia");
        assert_eq!(config.run.n_tracers, 1);
        assert_eq!(config.run.elements.len(), 3);
        assert!((config.time.dt - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.disk.binning().unwrap().n_zones(), 300);
        assert_eq!(config.disk.stellar_migration, StellarMigrationKind::Analog);
        assert_eq!(config.mdf.count, 400);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
run:
  name: "inside-out"
  n_tracers: 4
  simple: true
  verbose: true
  seed: 99
  write_analogs: true
  output_dir: "/tmp/galaxia"
  elements: [fe, o, mg]

time:
  dt: 0.02
  end: 2.0
  output_interval: 0.5

disk:
  edges: [0, 5, 10, 20, 30]
  mode: diffusion
  catalog: "data/analogs.dat"
  gas_matrix:
    - { from: 1, to: 0, rate: 0.01 }

zone:
  tau_star: 3.5
  eta: 1.0
  imf: salpeter

yields:
  table:
    mg: { ccsn: 0.00099 }
  solar:
    o: 0.0057

mdf:
  lower: -2.0
  upper: 0.5
  count: 50

logging:
  level: "debug"
  json: true
"#;

        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.run.name, "inside-out");
        assert_eq!(config.run.n_tracers, 4);
        assert!(config.run.simple);
        assert_eq!(config.run.seed, Some(99));
        assert_eq!(config.disk.mode, MigrationMode::Diffusion);
        assert_eq!(config.disk.binning().unwrap().n_zones(), 4);
        assert_eq!(config.disk.gas_matrix.len(), 1);
        assert!((config.zone.tau_star - 3.5).abs() < f64::EPSILON);
        assert_eq!(config.zone.imf, "salpeter");
        // unset zone fields keep their defaults
        assert!((config.zone.recycling - 0.4).abs() < f64::EPSILON);
        assert!(config.yields.table.contains_key("mg"));
        assert_eq!(config.mdf.count, 50);
        assert!(config.logging.json);

        let solar = config.solar_abundances();
        assert!((solar["o"] - 0.0057).abs() < f64::EPSILON);
        assert!(solar.contains_key("mg"));
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = SimulationConfig::parse("run:\n  n_tracers: 3\n").unwrap();
        assert_eq!(config.run.n_tracers, 3);
        assert_eq!(config.run.name, "galaxia");
        assert!((config.time.end - 13.2).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(SimulationConfig::parse("").is_ok());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(SimulationConfig::parse("disk:\n  mode: teleport\n").is_err());
    }

    #[test]
    fn output_times_include_end() {
        let time = TimeConfig {
            dt: 0.01,
            end: 1.0,
            output_interval: 0.3,
        };
        let times = time.output_times().unwrap();
        assert_eq!(times.len(), 5);
        assert!((times.last().unwrap() - 1.0).abs() < f64::EPSILON);

        let bad = TimeConfig {
            output_interval: 0.0,
            ..time
        };
        assert!(bad.output_times().is_err());
    }

    #[test]
    fn catalog_override() {
        let mut disk = DiskConfig::default();
        disk.apply_catalog_override(None);
        assert!(disk.catalog.is_none());
        disk.apply_catalog_override(Some(PathBuf::new()));
        assert!(disk.catalog.is_none());
        disk.apply_catalog_override(Some(PathBuf::from("/data/h277.dat")));
        assert_eq!(disk.catalog, Some(PathBuf::from("/data/h277.dat")));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("galaxia-config.yaml");
        if path.exists() {
            let config = SimulationConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
