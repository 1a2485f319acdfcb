//! Persisted simulation output.
//!
//! Everything a run writes lives in one directory, `<name>.gce`:
//!
//! ```text
//! <name>.gce/
//!   attributes.json        run identity, settings, status
//!   migration.json         gas migration matrix
//!   tracers.tsv            one row per tracer (multizone only)
//!   analogs.tsv            analog assignment log (optional)
//!   <zone>.gce/
//!     zone.json            zone name, timestep, science parameters
//!     history.tsv          one row per output time
//!     mdf.tsv              metallicity distribution functions
//! ```
//!
//! An existing directory is never replaced silently: either the caller
//! passes `overwrite = true` or an [`OverwritePrompt`] agrees.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use galaxia_types::{MigrationMode, RunId, RunPhase};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StellarMigrationKind;
use crate::error::SimulationError;
use crate::matrix::MatrixView;
use crate::mdf::{Mdf, MdfBins};
use crate::yields::ElementYield;
use crate::zone::{ZoneParameters, ZoneState};

/// Extension of every output directory.
pub const EXTENSION: &str = "gce";
/// Run attributes file.
pub const ATTRIBUTES_FILE: &str = "attributes.json";
/// Gas migration matrix file.
pub const MIGRATION_FILE: &str = "migration.json";
/// Tracer particle table.
pub const TRACERS_FILE: &str = "tracers.tsv";
/// Analog assignment log.
pub const ANALOGS_FILE: &str = "analogs.tsv";
/// Per-zone attributes file.
pub const ZONE_FILE: &str = "zone.json";
/// Per-zone history table.
pub const HISTORY_FILE: &str = "history.tsv";
/// Per-zone metallicity distribution table.
pub const MDF_FILE: &str = "mdf.tsv";

/// Decides whether existing output may be replaced.
pub trait OverwritePrompt: Send + fmt::Debug {
    /// Return `true` to delete `path` and proceed.
    fn confirm(&mut self, path: &Path) -> bool;
}

/// Prompt that always declines. Used when nobody can be asked.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineOverwrite;

impl OverwritePrompt for DeclineOverwrite {
    fn confirm(&mut self, _path: &Path) -> bool {
        false
    }
}

/// Stellar migration settings as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarMigrationAttributes {
    /// Analog or matrix migration.
    pub kind: StellarMigrationKind,
    /// Kinematic mode (analog migration).
    #[serde(default)]
    pub mode: Option<MigrationMode>,
    /// Catalog path (analog migration).
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    /// Zone edges in kpc (analog migration).
    #[serde(default)]
    pub edges: Option<Vec<f64>>,
    /// Stellar migration matrix (matrix migration).
    #[serde(default)]
    pub matrix: Option<MatrixView>,
}

/// Contents of `attributes.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAttributes {
    /// Unique identifier of the run.
    pub run_id: RunId,
    /// Simulation name.
    pub name: String,
    /// When the run started.
    pub created_at: DateTime<Utc>,
    /// Lifecycle phase at the time of writing.
    pub status: RunPhase,
    /// Number of zones.
    pub n_zones: usize,
    /// Tracers per zone per step.
    #[serde(default)]
    pub n_tracers: u32,
    /// Final-position-only bookkeeping.
    #[serde(default)]
    pub simple: bool,
    /// Verbose logging.
    #[serde(default)]
    pub verbose: bool,
    /// Step size, Gyr.
    pub dt: f64,
    /// Tracked elements.
    #[serde(default)]
    pub elements: Vec<String>,
    /// Zone names in zone order.
    #[serde(default)]
    pub zone_names: Vec<String>,
    /// Random seed, when one was fixed.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Stellar migration settings (multizone only).
    #[serde(default)]
    pub stars: Option<StarMigrationAttributes>,
    /// Metallicity distribution binning.
    #[serde(default)]
    pub mdf: Option<MdfBins>,
    /// Solar abundances used for `[X/H]`.
    #[serde(default)]
    pub solar: BTreeMap<String, f64>,
    /// Yield table, when a constant table was used.
    #[serde(default)]
    pub yields: Option<BTreeMap<String, ElementYield>>,
    /// Output times requested.
    #[serde(default)]
    pub output_times: Vec<f64>,
}

/// Contents of `migration.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationAttributes {
    /// Gas migration matrix.
    pub gas: MatrixView,
}

/// Contents of `<zone>.gce/zone.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAttributes {
    /// Zone name.
    pub name: String,
    /// Step size, Gyr.
    pub dt: f64,
    /// Science parameters.
    pub params: ZoneParameters,
}

/// One row of `tracers.tsv`.
#[derive(Debug, Clone, PartialEq)]
pub struct TracerRow {
    /// Formation time, Gyr.
    pub t_form: f64,
    /// Zone of birth.
    pub zone_origin: usize,
    /// Zone at the end of the run.
    pub zone_final: usize,
    /// Stellar mass, Msun.
    pub mass: f64,
    /// Metallicity of the birth zone at formation, per element.
    pub metallicity: BTreeMap<String, f64>,
}

/// Reads and writes one run's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    /// Store for simulation `name` under `output_dir`.
    pub fn new(output_dir: &Path, name: &str) -> Self {
        Self {
            root: output_dir.join(format!("{name}.{EXTENSION}")),
        }
    }

    /// Store at an existing path, adding the `.gce` extension when the
    /// bare path does not exist.
    pub fn open(path: &Path) -> Self {
        let has_extension = path.extension().is_some_and(|e| e == EXTENSION);
        let root = if has_extension || path.exists() {
            path.to_path_buf()
        } else {
            path.with_extension(EXTENSION)
        };
        Self { root }
    }

    /// The output directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one zone.
    pub fn zone_dir(&self, zone: &str) -> PathBuf {
        self.root.join(format!("{zone}.{EXTENSION}"))
    }

    /// Path of the analog log.
    pub fn analogs_path(&self) -> PathBuf {
        self.root.join(ANALOGS_FILE)
    }

    /// Create the output directory, replacing an existing one only when
    /// `overwrite` is set or `prompt` agrees. Returns `false` when the
    /// caller declined.
    pub fn prepare(
        &self,
        overwrite: bool,
        prompt: &mut dyn OverwritePrompt,
    ) -> Result<bool, SimulationError> {
        if self.root.exists() {
            if !overwrite && !prompt.confirm(&self.root) {
                info!(path = %self.root.display(), "Existing output kept, run declined");
                return Ok(false);
            }
            warn!(path = %self.root.display(), "Overwriting existing output");
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(true)
    }

    /// Write `attributes.json`.
    pub fn write_attributes(&self, attributes: &RunAttributes) -> Result<(), SimulationError> {
        write_json(&self.root.join(ATTRIBUTES_FILE), attributes)
    }

    /// Read `attributes.json`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Io`] if the directory or file is missing
    /// and [`SimulationError::Serialization`] if it is malformed.
    pub fn read_attributes(&self) -> Result<RunAttributes, SimulationError> {
        let text = fs::read_to_string(self.root.join(ATTRIBUTES_FILE))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write `migration.json`.
    pub fn write_migration(&self, migration: &MigrationAttributes) -> Result<(), SimulationError> {
        write_json(&self.root.join(MIGRATION_FILE), migration)
    }

    /// Read `migration.json`; `None` when absent.
    pub fn read_migration(&self) -> Result<Option<MigrationAttributes>, SimulationError> {
        read_optional_json(&self.root.join(MIGRATION_FILE))
    }

    /// Read a zone's `zone.json`; `None` when absent.
    pub fn read_zone(&self, zone: &str) -> Result<Option<ZoneAttributes>, SimulationError> {
        read_optional_json(&self.zone_dir(zone).join(ZONE_FILE))
    }

    /// Write a zone's `zone.json` and `history.tsv`.
    pub fn write_zone(&self, zone: &ZoneState) -> Result<(), SimulationError> {
        let dir = self.zone_dir(&zone.name);
        fs::create_dir_all(&dir)?;
        write_json(
            &dir.join(ZONE_FILE),
            &ZoneAttributes {
                name: zone.name.clone(),
                dt: zone.dt,
                params: zone.params.clone(),
            },
        )?;

        let mut out = BufWriter::new(File::create(dir.join(HISTORY_FILE))?);
        let elements: Vec<&String> = zone.elements.keys().collect();
        let mut header = String::from("# time\tgas\tstars\tsfr");
        for e in &elements {
            header.push_str(&format!("\tmass({e})"));
        }
        for e in &elements {
            header.push_str(&format!("\tz({e})"));
        }
        header.push_str("\ttracers");
        writeln!(out, "{header}")?;

        for row in &zone.history {
            write!(out, "{}\t{}\t{}\t{}", row.time, row.gas, row.stars, row.sfr)?;
            for e in &elements {
                write!(out, "\t{}", row.elements.get(*e).copied().unwrap_or_default())?;
            }
            for e in &elements {
                write!(out, "\t{}", row.metallicity.get(*e).copied().unwrap_or_default())?;
            }
            writeln!(out, "\t{}", row.tracers)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write a zone's `mdf.tsv`.
    pub fn write_mdf(&self, zone: &str, mdf: &Mdf) -> Result<(), SimulationError> {
        let dir = self.zone_dir(zone);
        fs::create_dir_all(&dir)?;
        let mut out = BufWriter::new(File::create(dir.join(MDF_FILE))?);

        let mut header = String::from("# bin_edge_left\tbin_edge_right");
        for name in mdf.columns.keys() {
            header.push('\t');
            header.push_str(name);
        }
        writeln!(out, "{header}")?;

        for (i, pair) in mdf.edges.windows(2).enumerate() {
            let (Some(left), Some(right)) = (pair.first(), pair.last()) else {
                continue;
            };
            write!(out, "{left}\t{right}")?;
            for values in mdf.columns.values() {
                write!(out, "\t{}", values.get(i).copied().unwrap_or_default())?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write `tracers.tsv`.
    pub fn write_tracers(&self, elements: &[String], rows: &[TracerRow]) -> Result<(), SimulationError> {
        let mut out = BufWriter::new(File::create(self.root.join(TRACERS_FILE))?);
        let mut header = String::from("# formation_time\tzone_origin\tzone_final\tmass");
        for e in elements {
            header.push_str(&format!("\tz({e})"));
        }
        writeln!(out, "{header}")?;
        for row in rows {
            write!(
                out,
                "{}\t{}\t{}\t{}",
                row.t_form, row.zone_origin, row.zone_final, row.mass
            )?;
            for e in elements {
                write!(out, "\t{}", row.metallicity.get(e).copied().unwrap_or_default())?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SimulationError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}

fn read_optional_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, SimulationError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Prompt that answers a fixed value and counts how often it was asked.
    #[derive(Debug)]
    struct FixedPrompt {
        answer: bool,
        asked: u32,
    }

    impl OverwritePrompt for FixedPrompt {
        fn confirm(&mut self, _path: &Path) -> bool {
            self.asked += 1;
            self.answer
        }
    }

    fn scratch() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("galaxia-output-{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn attributes() -> RunAttributes {
        RunAttributes {
            run_id: RunId::new(),
            name: "test".to_owned(),
            created_at: Utc::now(),
            status: RunPhase::Running,
            n_zones: 2,
            n_tracers: 3,
            simple: true,
            verbose: false,
            dt: 0.01,
            elements: vec!["fe".to_owned()],
            zone_names: vec!["zone0".to_owned(), "zone1".to_owned()],
            seed: Some(5),
            stars: None,
            mdf: Some(MdfBins::default()),
            solar: BTreeMap::new(),
            yields: None,
            output_times: vec![0.0, 1.0],
        }
    }

    #[test]
    fn prepare_respects_prompt() {
        let dir = scratch();
        let store = OutputStore::new(&dir, "run");
        let mut decline = DeclineOverwrite;
        assert!(store.prepare(false, &mut decline).unwrap());
        fs::write(store.root().join("marker"), "x").unwrap();

        assert!(!store.prepare(false, &mut decline).unwrap());
        assert!(store.root().join("marker").exists());

        let mut yes = FixedPrompt {
            answer: true,
            asked: 0,
        };
        assert!(store.prepare(false, &mut yes).unwrap());
        assert_eq!(yes.asked, 1);
        assert!(!store.root().join("marker").exists());

        let mut no = FixedPrompt {
            answer: false,
            asked: 0,
        };
        assert!(store.prepare(true, &mut no).unwrap());
        assert_eq!(no.asked, 0);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn attributes_round_trip() {
        let dir = scratch();
        let store = OutputStore::new(&dir, "run");
        store.prepare(false, &mut DeclineOverwrite).unwrap();
        let attrs = attributes();
        store.write_attributes(&attrs).unwrap();
        assert_eq!(store.read_attributes().unwrap(), attrs);
        assert!(store.read_migration().unwrap().is_none());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_attributes_is_io_error() {
        let store = OutputStore::open(&std::env::temp_dir().join("galaxia-does-not-exist"));
        assert!(store.root().ends_with("galaxia-does-not-exist.gce"));
        assert!(matches!(store.read_attributes(), Err(SimulationError::Io { .. })));
    }

    #[test]
    fn zone_history_is_tab_separated() {
        let dir = scratch();
        let store = OutputStore::new(&dir, "run");
        store.prepare(false, &mut DeclineOverwrite).unwrap();
        let mut zone = ZoneState::new("zone0", 0.01, ZoneParameters::default(), &["fe".to_owned()]);
        zone.capture(0.0);
        zone.capture(0.5);
        store.write_zone(&zone).unwrap();

        let text = fs::read_to_string(store.zone_dir("zone0").join(HISTORY_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines.first().copied(),
            Some("# time\tgas\tstars\tsfr\tmass(fe)\tz(fe)\ttracers")
        );
        assert_eq!(lines.get(2).unwrap().split('\t').count(), 7);
        assert_eq!(store.read_zone("zone0").unwrap().unwrap().name, "zone0");
        fs::remove_dir_all(&dir).unwrap();
    }
}
