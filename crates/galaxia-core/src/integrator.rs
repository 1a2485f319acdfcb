//! Single-zone integrator seam.
//!
//! The coordinator treats the chemical evolution of one zone over one
//! step as a black box behind [`ZoneIntegrator`]. It passes in the gas the
//! zone receives from and sends to its neighbours along with a
//! [`YieldTable`] handle; the integrator updates the zone in place and
//! reports what happened during the step.
//!
//! [`SimpleIntegrator`] is a first-order (forward Euler) integrator with
//! linear star formation, a mass-loaded outflow, instantaneous recycling
//! and instantaneous enrichment.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::yields::YieldTable;
use crate::zone::ZoneState;

/// Years per Gyr: rates are in Msun/yr, steps in Gyr.
const YEARS_PER_GYR: f64 = 1.0e9;

/// Errors that can occur while advancing one zone.
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// A reservoir would become negative.
    #[error("{quantity} would become negative ({value:e} Msun); reduce the timestep")]
    NegativeMass {
        /// Which reservoir (`gas`, `stars` or an element name).
        quantity: String,
        /// The value it would have taken.
        value: f64,
    },

    /// A reservoir became NaN or infinite.
    #[error("{quantity} is not finite")]
    NonFinite {
        /// Which reservoir.
        quantity: String,
    },
}

/// Gas exchanged with other zones during one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasFlow {
    /// Total gas mass, Msun.
    pub gas: f64,
    /// Element masses carried with the gas, Msun.
    pub elements: BTreeMap<String, f64>,
}

impl GasFlow {
    /// Add `fraction` of a zone's gas reservoir to this flow.
    pub fn add_fraction_of(&mut self, zone: &ZoneState, fraction: f64) {
        self.gas += fraction * zone.gas;
        for (element, mass) in &zone.elements {
            *self.elements.entry(element.clone()).or_insert(0.0) += fraction * mass;
        }
    }

    /// Element mass carried, 0 when absent.
    pub fn element(&self, element: &str) -> f64 {
        self.elements.get(element).copied().unwrap_or_default()
    }
}

/// What happened in one zone during one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Star formation rate, Msun/yr.
    pub sfr: f64,
    /// Stellar mass formed, Msun.
    pub formed: f64,
    /// Mass returned to the gas by recycling, Msun.
    pub returned: f64,
    /// Gas ejected by the outflow, Msun.
    pub wind: f64,
    /// Pristine gas accreted, Msun.
    pub infall: f64,
}

/// Advances one zone by one step.
pub trait ZoneIntegrator: Send + Sync + fmt::Debug {
    /// Advance `zone` by `dt` Gyr.
    ///
    /// `inflow` is gas arriving from other zones and `outflow` gas leaving
    /// for other zones during this step.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError`] if the step cannot be taken; the zone
    /// is left unchanged in that case.
    fn advance(
        &self,
        zone: &mut ZoneState,
        dt: f64,
        inflow: &GasFlow,
        outflow: &GasFlow,
        yields: &dyn YieldTable,
    ) -> Result<StepReport, IntegrationError>;
}

/// Forward Euler integrator with instantaneous recycling and enrichment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleIntegrator;

impl ZoneIntegrator for SimpleIntegrator {
    fn advance(
        &self,
        zone: &mut ZoneState,
        dt: f64,
        inflow: &GasFlow,
        outflow: &GasFlow,
        yields: &dyn YieldTable,
    ) -> Result<StepReport, IntegrationError> {
        let params = &zone.params;
        let tau = params.effective_tau_star(zone.gas);
        // Msun/Gyr
        let sfr_gyr = if tau > 0.0 && zone.gas > 0.0 { zone.gas / tau } else { 0.0 };
        let formed = sfr_gyr * dt;
        let returned = params.recycling * formed;
        let wind = params.eta * formed;
        let infall = params.infall_rate * YEARS_PER_GYR * dt;

        let gas = zone.gas + infall - formed + returned - wind + inflow.gas - outflow.gas;
        let stars = zone.stars + formed - returned;
        check("gas", gas)?;
        check("stars", stars)?;

        let mut elements = BTreeMap::new();
        for (element, &mass) in &zone.elements {
            let z = zone.metallicity(element);
            let produced = yields.yield_of(element, formed, z);
            let next = mass + produced + z * (returned - formed - wind) + inflow.element(element)
                - outflow.element(element);
            check(element, next)?;
            elements.insert(element.clone(), next);
        }

        zone.gas = gas;
        zone.stars = stars;
        zone.elements = elements;

        Ok(StepReport {
            sfr: sfr_gyr / YEARS_PER_GYR,
            formed,
            returned,
            wind,
            infall,
        })
    }
}

/// Reject non-finite values and negative masses.
fn check(quantity: &str, value: f64) -> Result<(), IntegrationError> {
    if !value.is_finite() {
        return Err(IntegrationError::NonFinite {
            quantity: quantity.to_owned(),
        });
    }
    if value < 0.0 {
        return Err(IntegrationError::NegativeMass {
            quantity: quantity.to_owned(),
            value,
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::yields::{ConstantYields, default_yields};
    use crate::zone::ZoneParameters;

    fn zone(params: ZoneParameters) -> ZoneState {
        ZoneState::new("zone0", 0.01, params, &["fe".to_owned(), "o".to_owned()])
    }

    #[test]
    fn closed_box_step() {
        let params = ZoneParameters {
            initial_gas: 1.0e9,
            tau_star: 1.0,
            eta: 0.0,
            recycling: 0.0,
            infall_rate: 0.0,
            ..ZoneParameters::default()
        };
        let mut z = zone(params);
        let yields = ConstantYields::new(default_yields());
        let report = SimpleIntegrator
            .advance(&mut z, 0.01, &GasFlow::default(), &GasFlow::default(), &yields)
            .unwrap();

        assert!((report.formed - 1.0e7).abs() < 1e-3);
        assert!((report.sfr - 1.0).abs() < 1e-12);
        assert!((z.gas - 0.99e9).abs() < 1e-3);
        assert!((z.stars - 1.0e7).abs() < 1e-3);
        // oxygen produced by the stars formed, none locked up yet
        assert!((z.elements["o"] - 1.5e5).abs() < 1e-6);
    }

    #[test]
    fn exchange_moves_gas_and_metals() {
        let params = ZoneParameters {
            initial_gas: 1.0e9,
            tau_star: 1.0e30,
            infall_rate: 0.0,
            ..ZoneParameters::default()
        };
        let mut z = zone(params);
        let inflow = GasFlow {
            gas: 2.0e8,
            elements: BTreeMap::from([("fe".to_owned(), 2.0e5)]),
        };
        let outflow = GasFlow {
            gas: 1.0e8,
            elements: BTreeMap::new(),
        };
        SimpleIntegrator
            .advance(&mut z, 0.01, &inflow, &outflow, &ConstantYields::default())
            .unwrap();
        assert!((z.gas - 1.1e9).abs() < 1.0);
        assert!((z.elements["fe"] - 2.0e5).abs() < 1e-6);
    }

    #[test]
    fn overdrawn_zone_is_rejected_unchanged() {
        let params = ZoneParameters {
            initial_gas: 1.0e9,
            tau_star: 0.001,
            eta: 10.0,
            infall_rate: 0.0,
            ..ZoneParameters::default()
        };
        let mut z = zone(params);
        let before = z.gas;
        let err = SimpleIntegrator.advance(
            &mut z,
            0.01,
            &GasFlow::default(),
            &GasFlow::default(),
            &ConstantYields::default(),
        );
        assert!(matches!(err, Err(IntegrationError::NegativeMass { .. })));
        assert!((z.gas - before).abs() < f64::EPSILON);
    }

    #[test]
    fn add_fraction_of_zone() {
        let mut z = zone(ZoneParameters::default());
        z.gas = 1.0e9;
        z.elements.insert("o".to_owned(), 1.0e6);
        let mut flow = GasFlow::default();
        flow.add_fraction_of(&z, 0.1);
        assert!((flow.gas - 1.0e8).abs() < 1e-3);
        assert!((flow.element("o") - 1.0e5).abs() < 1e-9);
        assert!(flow.element("fe").abs() < f64::EPSILON);
    }
}
