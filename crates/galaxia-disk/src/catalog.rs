//! The analog catalog: star particles from a hydrodynamical disk simulation.
//!
//! The catalog is loaded once and never mutated. Data is stored column-wise
//! (one vector per field) together with a copy of the formation times sorted
//! ascending, so a search only scans the rows inside the requested time
//! window instead of the whole table.
//!
//! # Text format
//!
//! One star particle per line, whitespace separated, eight columns:
//!
//! ```text
//! # id  tform  rform  rfinal  zfinal  vrad  vphi  vz
//! 15745 1.02   4.91   2.64    0.12    92.2  201.3 -4.1
//! ```
//!
//! Lines starting with `#` and blank lines are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use galaxia_types::{AnalogIndex, AnalogRecord};
use serde::{Deserialize, Serialize};

use crate::error::DiskError;

/// Number of whitespace-separated fields per catalog row.
const FIELDS_PER_ROW: usize = 8;

/// Tolerances for matching a stellar population to star particles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWindow {
    /// Maximum difference in formation radius, kpc.
    pub radius: f64,
    /// Maximum difference in formation time, Gyr.
    pub time: f64,
}

impl SearchWindow {
    /// First-pass window: 300 pc and 250 Myr.
    pub const NARROW: Self = Self {
        radius: 0.3,
        time: 0.25,
    };

    /// Fallback window used when the narrow search finds nothing: 600 pc
    /// and 500 Myr.
    pub const WIDE: Self = Self {
        radius: 0.6,
        time: 0.5,
    };
}

/// Raw catalog columns, one entry per star particle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumns {
    /// Particle identifiers from the source simulation.
    pub id: Vec<u64>,
    /// Formation times in Gyr.
    pub t_form: Vec<f64>,
    /// Formation radii in kpc.
    pub r_form: Vec<f64>,
    /// Final radii in kpc.
    pub r_final: Vec<f64>,
    /// Final heights above the midplane in kpc.
    pub z_final: Vec<f64>,
    /// Final radial velocities in km/s.
    pub v_rad: Vec<f64>,
    /// Final azimuthal velocities in km/s.
    pub v_phi: Vec<f64>,
    /// Final vertical velocities in km/s.
    pub v_z: Vec<f64>,
}

impl CatalogColumns {
    /// Append one row.
    pub fn push(&mut self, record: &AnalogRecord) {
        self.id.push(record.particle_id);
        self.t_form.push(record.t_form);
        self.r_form.push(record.r_form);
        self.r_final.push(record.r_final);
        self.z_final.push(record.z_final);
        self.v_rad.push(record.v_rad);
        self.v_phi.push(record.v_phi);
        self.v_z.push(record.v_z);
    }

    /// Length of every column paired with its name, `id` first.
    fn lengths(&self) -> [(&'static str, usize); FIELDS_PER_ROW] {
        [
            ("id", self.id.len()),
            ("tform", self.t_form.len()),
            ("rform", self.r_form.len()),
            ("rfinal", self.r_final.len()),
            ("zfinal", self.z_final.len()),
            ("vrad", self.v_rad.len()),
            ("vphi", self.v_phi.len()),
            ("vz", self.v_z.len()),
        ]
    }
}

/// Immutable table of reference star-particle trajectories.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogCatalog {
    columns: CatalogColumns,
    /// `(t_form, row)` pairs sorted by formation time.
    by_time: Vec<(f64, usize)>,
}

impl AnalogCatalog {
    /// Build a catalog from in-memory columns.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Format`] if the columns have different lengths
    /// or a formation time or radius is not finite.
    pub fn from_columns(columns: CatalogColumns) -> Result<Self, DiskError> {
        let expected = columns.id.len();
        for (name, len) in columns.lengths() {
            if len != expected {
                return Err(DiskError::format(format!(
                    "column {name} has {len} rows, expected {expected}"
                )));
            }
        }

        let finite = |v: &[f64]| v.iter().all(|x| x.is_finite());
        if !finite(&columns.t_form) || !finite(&columns.r_form) || !finite(&columns.r_final) {
            return Err(DiskError::format(
                "formation times and radii must be finite",
            ));
        }

        let mut by_time: Vec<(f64, usize)> =
            columns.t_form.iter().copied().zip(0_usize..).collect();
        by_time.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(Self { columns, by_time })
    }

    /// Parse a catalog from whitespace-separated text.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Io`] if reading fails and [`DiskError::Format`]
    /// if a row does not have eight numeric fields.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, DiskError> {
        let mut columns = CatalogColumns::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let record = parse_row(trimmed, line_no.saturating_add(1), columns.id.len())?;
            columns.push(&record);
        }
        Self::from_columns(columns)
    }

    /// Load a catalog from a text file.
    ///
    /// # Errors
    ///
    /// See [`AnalogCatalog::from_reader`].
    pub fn from_file(path: &Path) -> Result<Self, DiskError> {
        let file = File::open(path)?;
        let catalog = Self::from_reader(BufReader::new(file))?;
        tracing::info!(
            path = %path.display(),
            star_particles = catalog.len(),
            "Analog catalog loaded"
        );
        Ok(catalog)
    }

    /// Number of star particles.
    pub fn len(&self) -> usize {
        self.columns.id.len()
    }

    /// Whether the catalog has no rows.
    pub fn is_empty(&self) -> bool {
        self.columns.id.is_empty()
    }

    /// Return the full record at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::IndexOutOfRange`] if `index` is not a valid row.
    pub fn record(&self, index: AnalogIndex) -> Result<AnalogRecord, DiskError> {
        let i = index.get();
        let c = &self.columns;
        let out_of_range = || DiskError::IndexOutOfRange {
            kind: "analog",
            index: i,
            len: self.len(),
        };
        Ok(AnalogRecord {
            index,
            particle_id: *c.id.get(i).ok_or_else(out_of_range)?,
            t_form: *c.t_form.get(i).ok_or_else(out_of_range)?,
            r_form: *c.r_form.get(i).ok_or_else(out_of_range)?,
            r_final: *c.r_final.get(i).ok_or_else(out_of_range)?,
            z_final: *c.z_final.get(i).ok_or_else(out_of_range)?,
            v_rad: *c.v_rad.get(i).ok_or_else(out_of_range)?,
            v_phi: *c.v_phi.get(i).ok_or_else(out_of_range)?,
            v_z: *c.v_z.get(i).ok_or_else(out_of_range)?,
        })
    }

    /// Read-only access to the raw columns.
    pub const fn columns(&self) -> &CatalogColumns {
        &self.columns
    }

    /// All rows that formed within `window` of radius `r` and time `t`.
    ///
    /// Both bounds are inclusive. Rows come back in formation-time order.
    pub fn candidates(&self, r: f64, t: f64, window: SearchWindow) -> Vec<AnalogIndex> {
        let t_low = t - window.time;
        let t_high = t + window.time;
        let start = self.by_time.partition_point(|&(tf, _)| tf < t_low);
        let end = self.by_time.partition_point(|&(tf, _)| tf <= t_high);

        self.by_time
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter(|&&(_, row)| {
                self.columns
                    .r_form
                    .get(row)
                    .is_some_and(|&rf| (rf - r).abs() <= window.radius)
            })
            .map(|&(_, row)| AnalogIndex(row))
            .collect()
    }
}

/// Parse one data line into a record.
fn parse_row(line: &str, line_no: usize, row: usize) -> Result<AnalogRecord, DiskError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELDS_PER_ROW {
        return Err(DiskError::format(format!(
            "line {line_no}: expected {FIELDS_PER_ROW} fields, found {}",
            fields.len()
        )));
    }

    let number = |pos: usize| -> Result<f64, DiskError> {
        let raw = fields.get(pos).copied().unwrap_or_default();
        raw.parse::<f64>().map_err(|e| {
            DiskError::format(format!("line {line_no}: field {pos} ({raw:?}): {e}"))
        })
    };

    let raw_id = fields.first().copied().unwrap_or_default();
    let particle_id = raw_id.parse::<u64>().map_err(|e| {
        DiskError::format(format!("line {line_no}: particle id ({raw_id:?}): {e}"))
    })?;

    Ok(AnalogRecord {
        index: AnalogIndex(row),
        particle_id,
        t_form: number(1)?,
        r_form: number(2)?,
        r_final: number(3)?,
        z_final: number(4)?,
        v_rad: number(5)?,
        v_phi: number(6)?,
        v_z: number(7)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const SAMPLE: &str = "\
# id tform rform rfinal zfinal vrad vphi vz
1 1.00 5.00 15.00 0.20 10.0 220.0 1.0
2 1.10 5.20 6.00 0.05 -3.0 210.0 0.5

3 4.00 8.00 8.50 0.90 1.0 200.0 -2.0
4 1.40 5.50 4.00 0.10 0.0 190.0 0.0
";

    fn sample() -> AnalogCatalog {
        AnalogCatalog::from_reader(Cursor::new(SAMPLE)).unwrap()
    }

    #[test]
    fn parses_rows_and_skips_comments() {
        let catalog = sample();
        assert_eq!(catalog.len(), 4);
        let rec = catalog.record(AnalogIndex(2)).unwrap();
        assert_eq!(rec.particle_id, 3);
        assert!((rec.r_final - 8.5).abs() < 1e-12);
        assert!((rec.z_final - 0.9).abs() < 1e-12);
    }

    #[test]
    fn record_out_of_range_is_index_error() {
        let err = sample().record(AnalogIndex(4));
        assert!(matches!(
            err,
            Err(DiskError::IndexOutOfRange {
                kind: "analog",
                index: 4,
                len: 4
            })
        ));
    }

    #[test]
    fn mismatched_columns_are_format_error() {
        let columns = CatalogColumns {
            id: vec![1, 2],
            t_form: vec![1.0],
            ..CatalogColumns::default()
        };
        assert!(matches!(
            AnalogCatalog::from_columns(columns),
            Err(DiskError::Format { .. })
        ));
    }

    #[test]
    fn short_row_is_format_error() {
        let err = AnalogCatalog::from_reader(Cursor::new("1 1.0 5.0 15.0\n"));
        assert!(matches!(err, Err(DiskError::Format { .. })));
    }

    #[test]
    fn garbage_number_is_format_error() {
        let err = AnalogCatalog::from_reader(Cursor::new("1 1.0 abc 15.0 0.2 0 0 0\n"));
        let msg = err.unwrap_err().to_string();
        assert!(msg.contains("line 1"), "{msg}");
    }

    #[test]
    fn narrow_window_filters_radius_and_time() {
        let catalog = sample();
        let found = catalog.candidates(5.0, 1.0, SearchWindow::NARROW);
        // rows 0 and 1 qualify; row 3 is 0.4 Gyr away and 0.5 kpc out
        assert_eq!(found, vec![AnalogIndex(0), AnalogIndex(1)]);
    }

    #[test]
    fn wide_window_reaches_further() {
        let catalog = sample();
        let found = catalog.candidates(5.0, 1.0, SearchWindow::WIDE);
        assert_eq!(found, vec![AnalogIndex(0), AnalogIndex(1), AnalogIndex(3)]);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let catalog = sample();
        let found = catalog.candidates(8.0, 3.75, SearchWindow::NARROW);
        assert_eq!(found, vec![AnalogIndex(2)]);
    }

    #[test]
    fn empty_catalog_has_no_candidates() {
        let catalog = AnalogCatalog::from_columns(CatalogColumns::default()).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.candidates(5.0, 1.0, SearchWindow::WIDE).is_empty());
    }
}
