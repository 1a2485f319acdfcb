//! Zone-to-zone migration matrices.
//!
//! Entry `(i, j)` gives the fraction of zone `i`'s content that moves to
//! zone `j` during one step. It is either a constant or a function of
//! time. The matrix itself accepts any value; [`MigrationMatrix::fractions`]
//! validates the rows when they are used.
//!
//! For gas, the fractions are applied deterministically to every zone's
//! gas and element masses. For stars (when analog migration is not used),
//! a tracer in zone `i` moves to `j` with probability equal to the
//! fraction.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Relative slack allowed on a row sum before it counts as exceeding 1.
const ROW_SUM_TOLERANCE: f64 = 1e-12;

/// Errors that can occur when reading or evaluating a matrix.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    /// Row or column outside the matrix.
    #[error("matrix index ({row}, {column}) out of range for {size}x{size} matrix")]
    IndexOutOfRange {
        /// Requested row.
        row: usize,
        /// Requested column.
        column: usize,
        /// Matrix dimension.
        size: usize,
    },

    /// An entry evaluated to a negative or non-finite value.
    #[error("rate ({row}, {column}) at time {time} is {rate}; rates must be finite and non-negative")]
    InvalidRate {
        /// Source zone.
        row: usize,
        /// Destination zone.
        column: usize,
        /// Evaluation time, Gyr.
        time: f64,
        /// The offending value.
        rate: f64,
    },

    /// The fractions leaving one zone add up to more than 1.
    #[error("rates out of zone {row} at time {time} sum to {sum}, exceeding 1")]
    RowOverflow {
        /// Source zone.
        row: usize,
        /// Evaluation time, Gyr.
        time: f64,
        /// Sum of the off-diagonal entries.
        sum: f64,
    },
}

impl From<MatrixError> for SimulationError {
    fn from(err: MatrixError) -> Self {
        Self::Configuration {
            reason: err.to_string(),
        }
    }
}

/// One matrix entry.
#[derive(Clone)]
pub enum Rate {
    /// Time-independent fraction per step.
    Constant(f64),
    /// Fraction per step as a function of time in Gyr.
    Function(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl Rate {
    /// Evaluate at `time`.
    pub fn at(&self, time: f64) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Function(f) => f(time),
        }
    }

    /// The constant value, or `None` for a function.
    pub const fn as_constant(&self) -> Option<f64> {
        match self {
            Self::Constant(value) => Some(*value),
            Self::Function(_) => None,
        }
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

impl fmt::Debug for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Square table of [`Rate`]s, all zero by default.
#[derive(Debug, Clone)]
pub struct MigrationMatrix {
    size: usize,
    /// Row-major entries.
    entries: Vec<Rate>,
}

impl MigrationMatrix {
    /// A `size` by `size` matrix of zeros.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            entries: vec![Rate::default(); size.saturating_mul(size)],
        }
    }

    /// Matrix dimension.
    pub const fn size(&self) -> usize {
        self.size
    }

    fn slot(&self, row: usize, column: usize) -> Result<usize, MatrixError> {
        if row < self.size && column < self.size {
            Ok(row.saturating_mul(self.size).saturating_add(column))
        } else {
            Err(MatrixError::IndexOutOfRange {
                row,
                column,
                size: self.size,
            })
        }
    }

    /// The entry at `(row, column)`.
    pub fn entry(&self, row: usize, column: usize) -> Result<&Rate, MatrixError> {
        let slot = self.slot(row, column)?;
        self.entries.get(slot).ok_or(MatrixError::IndexOutOfRange {
            row,
            column,
            size: self.size,
        })
    }

    /// Replace the entry at `(row, column)`.
    pub fn set(&mut self, row: usize, column: usize, rate: Rate) -> Result<(), MatrixError> {
        let slot = self.slot(row, column)?;
        if let Some(entry) = self.entries.get_mut(slot) {
            *entry = rate;
        }
        Ok(())
    }

    /// Set a constant entry.
    pub fn set_constant(&mut self, row: usize, column: usize, value: f64) -> Result<(), MatrixError> {
        self.set(row, column, Rate::Constant(value))
    }

    /// Set a time-dependent entry.
    pub fn set_function<F>(&mut self, row: usize, column: usize, f: F) -> Result<(), MatrixError>
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.set(row, column, Rate::Function(Arc::new(f)))
    }

    /// Value of entry `(row, column)` at `time`. The diagonal is always 0.
    pub fn rate(&self, row: usize, column: usize, time: f64) -> Result<f64, MatrixError> {
        let rate = self.entry(row, column)?;
        Ok(if row == column { 0.0 } else { rate.at(time) })
    }

    /// Sum of the off-diagonal entries of `row` at `time`.
    pub fn row_sum(&self, row: usize, time: f64) -> Result<f64, MatrixError> {
        (0..self.size).try_fold(0.0, |acc, column| Ok(acc + self.rate(row, column, time)?))
    }

    /// Whether every entry is the constant 0.
    pub fn is_zero(&self) -> bool {
        self.entries
            .iter()
            .all(|r| r.as_constant().is_some_and(|v| v == 0.0))
    }

    /// Validated transfer fractions at `time`, one row per source zone.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::InvalidRate`] for a negative or non-finite
    /// off-diagonal entry and [`MatrixError::RowOverflow`] when a row sums
    /// to more than 1.
    pub fn fractions(&self, time: f64) -> Result<Vec<Vec<f64>>, MatrixError> {
        let mut rows = Vec::with_capacity(self.size);
        for row in 0..self.size {
            let mut values = Vec::with_capacity(self.size);
            for column in 0..self.size {
                let rate = self.rate(row, column, time)?;
                if !rate.is_finite() || rate < 0.0 {
                    return Err(MatrixError::InvalidRate {
                        row,
                        column,
                        time,
                        rate,
                    });
                }
                values.push(rate);
            }
            let sum: f64 = values.iter().sum();
            if sum > 1.0 + ROW_SUM_TOLERANCE {
                return Err(MatrixError::RowOverflow { row, time, sum });
            }
            rows.push(values);
        }
        Ok(rows)
    }

    /// Serializable view: constants are kept, functions become `None`.
    pub fn view(&self) -> MatrixView {
        MatrixView {
            size: self.size,
            entries: self
                .entries
                .chunks(self.size.max(1))
                .map(|row| row.iter().map(Rate::as_constant).collect())
                .collect(),
        }
    }

    /// Rebuild from a view. Returns the matrix and the positions of
    /// entries that were not encoded (functions), which are left at 0.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::IndexOutOfRange`] if the view is ragged.
    pub fn from_view(view: &MatrixView) -> Result<(Self, Vec<(usize, usize)>), MatrixError> {
        let mut matrix = Self::new(view.size);
        let mut unencoded = Vec::new();
        for (row, values) in view.entries.iter().enumerate() {
            for (column, value) in values.iter().enumerate() {
                match value {
                    Some(v) => matrix.set_constant(row, column, *v)?,
                    None => unencoded.push((row, column)),
                }
            }
        }
        Ok((matrix, unencoded))
    }
}

/// Persisted form of a [`MigrationMatrix`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixView {
    /// Matrix dimension.
    pub size: usize,
    /// Row-major entries; `None` marks a function of time.
    pub entries: Vec<Vec<Option<f64>>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_is_zero() {
        let m = MigrationMatrix::new(3);
        assert!(m.is_zero());
        assert!(m.rate(0, 2, 5.0).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_entry() {
        let mut m = MigrationMatrix::new(2);
        assert!(matches!(
            m.rate(2, 0, 0.0),
            Err(MatrixError::IndexOutOfRange { row: 2, column: 0, size: 2 })
        ));
        assert!(m.set_constant(0, 5, 0.1).is_err());
    }

    #[test]
    fn diagonal_is_ignored() {
        let mut m = MigrationMatrix::new(2);
        m.set_constant(1, 1, 0.9).unwrap();
        m.set_constant(1, 0, 0.2).unwrap();
        assert!(m.rate(1, 1, 0.0).unwrap().abs() < f64::EPSILON);
        assert!((m.row_sum(1, 0.0).unwrap() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn function_entries_depend_on_time() {
        let mut m = MigrationMatrix::new(2);
        m.set_function(0, 1, |t| 0.01 * t).unwrap();
        assert!((m.rate(0, 1, 3.0).unwrap() - 0.03).abs() < 1e-12);
        assert!(!m.is_zero());
    }

    #[test]
    fn fractions_validate_rows() {
        let mut m = MigrationMatrix::new(3);
        m.set_constant(0, 1, 0.6).unwrap();
        m.set_constant(0, 2, 0.3).unwrap();
        assert!(m.fractions(0.0).is_ok());

        m.set_constant(0, 2, 0.5).unwrap();
        assert!(matches!(m.fractions(0.0), Err(MatrixError::RowOverflow { row: 0, .. })));

        m.set_constant(0, 2, -0.1).unwrap();
        assert!(matches!(m.fractions(0.0), Err(MatrixError::InvalidRate { column: 2, .. })));

        let err: SimulationError = m.fractions(0.0).unwrap_err().into();
        assert!(matches!(err, SimulationError::Configuration { .. }));
    }

    #[test]
    fn view_keeps_constants_and_drops_functions() {
        let mut m = MigrationMatrix::new(2);
        m.set_constant(0, 1, 0.25).unwrap();
        m.set_function(1, 0, |t| t).unwrap();
        let view = m.view();
        assert_eq!(view.entries, vec![vec![Some(0.0), Some(0.25)], vec![None, Some(0.0)]]);

        let (back, unencoded) = MigrationMatrix::from_view(&view).unwrap();
        assert_eq!(unencoded, vec![(1, 0)]);
        assert!((back.rate(0, 1, 0.0).unwrap() - 0.25).abs() < f64::EPSILON);
        assert!(back.rate(1, 0, 7.0).unwrap().abs() < f64::EPSILON);
    }
}
