//! Nucleosynthetic yields and solar abundances.
//!
//! The integrator never reaches for a global yield table: it receives a
//! [`YieldTable`] handle on every call. [`ConstantYields`] is the bundled
//! table, with metallicity-independent net yields per element split into
//! core-collapse and type Ia contributions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Source of nucleosynthetic yields.
///
/// Implementations must be pure and must not fail: metallicities or masses
/// outside a tabulated range are extrapolated or clamped by the
/// implementation.
pub trait YieldTable: Send + Sync + fmt::Debug {
    /// Mass of `element` (Msun) returned to the gas by a stellar population
    /// of `mass` Msun formed at gas-phase `metallicity`.
    fn yield_of(&self, element: &str, mass: f64, metallicity: f64) -> f64;
}

/// Net yield of one element as a fraction of the stellar mass formed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementYield {
    /// Core-collapse supernova yield.
    #[serde(default)]
    pub ccsn: f64,
    /// Type Ia supernova yield.
    #[serde(default)]
    pub sn1a: f64,
}

impl ElementYield {
    /// Combined yield.
    pub fn total(self) -> f64 {
        self.ccsn + self.sn1a
    }
}

/// Metallicity-independent yield table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstantYields {
    table: BTreeMap<String, ElementYield>,
}

impl ConstantYields {
    /// Build a table from per-element yields. Element names are matched
    /// case-insensitively.
    pub fn new(table: BTreeMap<String, ElementYield>) -> Self {
        Self {
            table: table
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    /// Yield of one element, if tabulated.
    pub fn get(&self, element: &str) -> Option<ElementYield> {
        self.table.get(&element.to_lowercase()).copied()
    }

    /// Tabulated elements.
    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

impl YieldTable for ConstantYields {
    fn yield_of(&self, element: &str, mass: f64, _metallicity: f64) -> f64 {
        self.get(element).map_or(0.0, |y| y.total() * mass)
    }
}

/// Default yields for iron, strontium and oxygen.
pub fn default_yields() -> BTreeMap<String, ElementYield> {
    BTreeMap::from([
        (
            "fe".to_owned(),
            ElementYield {
                ccsn: 0.000_473,
                sn1a: 0.002_58,
            },
        ),
        (
            "o".to_owned(),
            ElementYield {
                ccsn: 0.015,
                sn1a: 0.0,
            },
        ),
        (
            "sr".to_owned(),
            ElementYield {
                ccsn: 3.5e-8,
                sn1a: 0.0,
            },
        ),
    ])
}

/// Solar photospheric mass fraction of `element`.
pub fn solar_abundance(element: &str) -> Option<f64> {
    let z = match element.to_lowercase().as_str() {
        "c" => 2.37e-3,
        "n" => 6.93e-4,
        "o" => 5.72e-3,
        "ne" => 1.25e-3,
        "na" => 2.91e-5,
        "mg" => 7.06e-4,
        "al" => 5.55e-5,
        "si" => 6.64e-4,
        "s" => 3.09e-4,
        "ca" => 6.40e-5,
        "ti" => 3.13e-6,
        "cr" => 1.67e-5,
        "mn" => 1.08e-5,
        "fe" => 1.29e-3,
        "ni" => 7.11e-5,
        "sr" => 3.12e-8,
        "ba" => 1.56e-8,
        "eu" => 3.55e-10,
        _ => return None,
    };
    Some(z)
}
