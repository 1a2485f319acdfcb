//! Append-only record of analog assignments.
//!
//! One row per reset, tab separated, two decimals:
//!
//! ```text
//! # zone_origin	time_origin	zfinal
//! 0	1.00	0.20
//! 3	1.01	100.00
//! ```

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use galaxia_types::ZoneIndex;

use crate::error::DiskError;

/// Header line written before the first row.
pub const HEADER: &str = "# zone_origin\ttime_origin\tzfinal";

/// Single writer for analog assignment rows.
pub struct AnalogLog {
    writer: Box<dyn Write + Send>,
    rows: u64,
}

impl AnalogLog {
    /// Create (truncating) a log file at `path` and write the header.
    pub fn create(path: &Path) -> Result<Self, DiskError> {
        let file = File::create(path)?;
        Self::from_writer(Box::new(BufWriter::new(file)))
    }

    /// Wrap an arbitrary writer and write the header.
    pub fn from_writer(mut writer: Box<dyn Write + Send>) -> Result<Self, DiskError> {
        writeln!(writer, "{HEADER}")?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append one assignment.
    pub fn record(&mut self, zone: ZoneIndex, t_form: f64, z_final: f64) -> Result<(), DiskError> {
        writeln!(self.writer, "{zone}\t{t_form:.2}\t{z_final:.2}")?;
        self.rows = self.rows.saturating_add(1);
        Ok(())
    }

    /// Rows written so far.
    pub const fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush buffered rows.
    pub fn flush(&mut self) -> Result<(), DiskError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for AnalogLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalogLog").field("rows", &self.rows).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let path = std::env::temp_dir().join(format!("analogs-{}.tsv", uuid::Uuid::now_v7()));
        {
            let mut log = AnalogLog::create(&path).unwrap();
            log.record(ZoneIndex(0), 1.0, 0.2).unwrap();
            log.record(ZoneIndex(12), 0.1234, 100.0).unwrap();
            assert_eq!(log.rows(), 2);
            log.flush().unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(
            text,
            "# zone_origin\ttime_origin\tzfinal\n0\t1.00\t0.20\n12\t0.12\t100.00\n"
        );
    }
}
