//! Metallicity distribution functions.
//!
//! For every element `x` the distribution of `[x/H] = log10(Z_x / Z_x,sun)`
//! is binned over the stars of a zone, weighted by stellar mass. For every
//! pair of elements `x`, `y` (in configuration order) the ratio
//! `[x/y] = [x/H] - [y/H]` is binned the same way. Each distribution is
//! normalized to unit integral over the binned range; a distribution with
//! no stars in range is all zeros.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Largest accepted number of bins per distribution.
pub const MAX_BINS: usize = 100_000;

/// Uniform bins shared by every distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MdfBins {
    /// Lower edge of the first bin.
    #[serde(default = "default_lower")]
    pub lower: f64,
    /// Upper edge of the last bin.
    #[serde(default = "default_upper")]
    pub upper: f64,
    /// Number of bins.
    #[serde(default = "default_count")]
    pub count: usize,
}

impl Default for MdfBins {
    fn default() -> Self {
        Self {
            lower: default_lower(),
            upper: default_upper(),
            count: default_count(),
        }
    }
}

impl MdfBins {
    /// Check that the range is increasing and the bin count is between 1
    /// and [`MAX_BINS`].
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.lower.is_finite() && self.upper.is_finite() && self.lower < self.upper) {
            return Err(SimulationError::configuration(format!(
                "MDF range [{}, {}] is not increasing",
                self.lower, self.upper
            )));
        }
        if self.count == 0 {
            return Err(SimulationError::configuration("MDF needs at least one bin"));
        }
        if self.count > MAX_BINS {
            return Err(SimulationError::configuration(format!(
                "MDF bin count {} exceeds the limit of {MAX_BINS}",
                self.count
            )));
        }
        Ok(())
    }

    /// Bin width.
    pub fn width(&self) -> f64 {
        (self.upper - self.lower) / self.count.max(1) as f64
    }

    /// The `count + 1` bin edges.
    pub fn edges(&self) -> Vec<f64> {
        let width = self.width();
        (0..=self.count)
            .map(|i| (i as f64).mul_add(width, self.lower))
            .collect()
    }

    /// Index of the bin containing `x`; the upper edge belongs to the last
    /// bin.
    #[allow(clippy::cast_sign_loss)]
    pub fn bin_of(&self, x: f64) -> Option<usize> {
        if !x.is_finite() || x < self.lower || x > self.upper {
            return None;
        }
        let raw = ((x - self.lower) / self.width()).floor();
        Some((raw as usize).min(self.count.saturating_sub(1)))
    }
}

/// Binned distributions for one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mdf {
    /// Bin edges, one more than the number of bins.
    pub edges: Vec<f64>,
    /// Normalized distributions keyed by column name, e.g. `dn/d[fe/h]`
    /// or `dn/d[o/fe]`.
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl Mdf {
    /// The distribution of one column.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }
}

/// Accumulates weighted stars into distributions.
#[derive(Debug, Clone)]
pub struct MdfBuilder {
    bins: MdfBins,
    /// Element order and solar abundances.
    solar: Vec<(String, f64)>,
    counts: BTreeMap<String, Vec<f64>>,
    totals: BTreeMap<String, f64>,
}

impl MdfBuilder {
    /// Start empty distributions for `elements` with the given solar
    /// abundances (elements without one are skipped).
    pub fn new(bins: MdfBins, elements: &[String], solar: &BTreeMap<String, f64>) -> Self {
        let solar: Vec<(String, f64)> = elements
            .iter()
            .filter_map(|e| solar.get(e).map(|&z| (e.clone(), z)))
            .collect();
        let mut counts = BTreeMap::new();
        for name in column_names(&solar) {
            counts.insert(name, vec![0.0; bins.count]);
        }
        Self {
            bins,
            solar,
            counts,
            totals: BTreeMap::new(),
        }
    }

    /// Add stars of total `weight` with gas-phase mass fractions
    /// `metallicity` at their formation.
    pub fn add(&mut self, weight: f64, metallicity: &BTreeMap<String, f64>) {
        if !(weight.is_finite() && weight > 0.0) {
            return;
        }
        let abundances: Vec<Option<f64>> = self
            .solar
            .iter()
            .map(|(element, solar)| {
                let z = metallicity.get(element).copied().unwrap_or_default();
                (z > 0.0 && *solar > 0.0).then(|| (z / solar).log10())
            })
            .collect();

        let mut deposits = Vec::new();
        for ((element, _), abundance) in self.solar.iter().zip(&abundances) {
            if let Some(x_h) = abundance {
                deposits.push((format!("dn/d[{element}/h]"), *x_h));
            }
        }
        for (i, (x, _)) in self.solar.iter().enumerate() {
            for (j, (y, _)) in self.solar.iter().enumerate().skip(i.saturating_add(1)) {
                if let (Some(Some(x_h)), Some(Some(y_h))) = (abundances.get(i), abundances.get(j)) {
                    deposits.push((format!("dn/d[{x}/{y}]"), x_h - y_h));
                }
            }
        }
        for (column, value) in deposits {
            self.deposit(column, value, weight);
        }
    }

    fn deposit(&mut self, column: String, value: f64, weight: f64) {
        let Some(bin) = self.bins.bin_of(value) else {
            return;
        };
        if let Some(slot) = self.counts.get_mut(&column).and_then(|c| c.get_mut(bin)) {
            *slot += weight;
            *self.totals.entry(column).or_insert(0.0) += weight;
        }
    }

    /// Normalize and return the distributions.
    pub fn finish(self) -> Mdf {
        let width = self.bins.width();
        let columns = self
            .counts
            .into_iter()
            .map(|(name, mut values)| {
                let total = self.totals.get(&name).copied().unwrap_or_default();
                if total > 0.0 {
                    values.iter_mut().for_each(|v| *v /= total * width);
                }
                (name, values)
            })
            .collect();
        Mdf {
            edges: self.bins.edges(),
            columns,
        }
    }
}

/// Column names in output order: every `[x/h]`, then every `[x/y]` pair.
fn column_names(solar: &[(String, f64)]) -> Vec<String> {
    let mut names: Vec<String> = solar.iter().map(|(e, _)| format!("dn/d[{e}/h]")).collect();
    for (i, (x, _)) in solar.iter().enumerate() {
        for (y, _) in solar.iter().skip(i.saturating_add(1)) {
            names.push(format!("dn/d[{x}/{y}]"));
        }
    }
    names
}

const fn default_lower() -> f64 {
    -3.0
}

const fn default_upper() -> f64 {
    1.0
}

const fn default_count() -> usize {
    400
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn solar() -> BTreeMap<String, f64> {
        BTreeMap::from([("fe".to_owned(), 1.0e-3), ("o".to_owned(), 5.0e-3)])
    }

    fn elements() -> Vec<String> {
        vec!["fe".to_owned(), "o".to_owned()]
    }

    fn integral(mdf: &Mdf, column: &str) -> f64 {
        let width = mdf.edges.get(1).unwrap() - mdf.edges.first().unwrap();
        mdf.column(column).unwrap().iter().sum::<f64>() * width
    }

    #[test]
    fn default_bins() {
        let bins = MdfBins::default();
        assert_eq!(bins.edges().len(), 401);
        assert!((bins.width() - 0.01).abs() < 1e-12);
        assert_eq!(bins.bin_of(-3.0), Some(0));
        assert_eq!(bins.bin_of(1.0), Some(399));
        assert_eq!(bins.bin_of(1.5), None);
        assert_eq!(bins.bin_of(f64::NEG_INFINITY), None);
    }

    #[test]
    fn invalid_bins_are_configuration_errors() {
        let bins = MdfBins {
            lower: 1.0,
            upper: -1.0,
            count: 10,
        };
        assert!(matches!(bins.validate(), Err(SimulationError::Configuration { .. })));
    }

    #[test]
    fn oversized_bin_count_is_rejected() {
        let mut bins = MdfBins {
            count: 4_000_000_000,
            ..MdfBins::default()
        };
        assert!(matches!(bins.validate(), Err(SimulationError::Configuration { .. })));
        bins.count = MAX_BINS;
        assert!(bins.validate().is_ok());
    }

    #[test]
    fn solar_stars_land_at_zero() {
        let bins = MdfBins {
            lower: -1.0,
            upper: 1.0,
            count: 4,
        };
        let mut builder = MdfBuilder::new(bins, &elements(), &solar());
        builder.add(2.0, &solar());
        let mdf = builder.finish();

        let fe = mdf.column("dn/d[fe/h]").unwrap();
        assert_eq!(fe.len(), 4);
        assert!(fe.get(2).unwrap() > &0.0);
        assert!((integral(&mdf, "dn/d[fe/h]") - 1.0).abs() < 1e-12);
        assert!((integral(&mdf, "dn/d[fe/o]") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weights_are_respected() {
        let bins = MdfBins {
            lower: -2.0,
            upper: 1.0,
            count: 3,
        };
        let mut builder = MdfBuilder::new(bins, &elements(), &solar());
        // [fe/h] = -1.5 with weight 1, [fe/h] = 0.5 with weight 3
        builder.add(1.0, &BTreeMap::from([("fe".to_owned(), 1.0e-3 * 10f64.powf(-1.5))]));
        builder.add(3.0, &BTreeMap::from([("fe".to_owned(), 1.0e-3 * 10f64.powf(0.5))]));
        let mdf = builder.finish();
        let fe = mdf.column("dn/d[fe/h]").unwrap();
        assert!((fe.first().unwrap() - 0.25).abs() < 1e-12);
        assert!((fe.last().unwrap() - 0.75).abs() < 1e-12);
        // oxygen absent: no [o/h] or [fe/o] entries
        assert!(mdf.column("dn/d[o/h]").unwrap().iter().all(|v| *v == 0.0));
        assert!(mdf.column("dn/d[fe/o]").unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn empty_distribution_is_zero() {
        let mdf = MdfBuilder::new(MdfBins::default(), &elements(), &solar()).finish();
        assert_eq!(mdf.columns.len(), 3);
        assert!(mdf.columns.values().all(|c| c.iter().all(|v| *v == 0.0)));
    }
}
