//! Cross-zone consistency checks run after every step.
//!
//! Gas exchange between zones is an internal movement: every unit of gas
//! (and of each element) leaving one zone must arrive in another. For each
//! step the check is:
//!
//! ```text
//! sum(outflow[zone] for all zones) == sum(inflow[zone] for all zones)
//! ```
//!
//! within a relative tolerance, separately for the total gas and for
//! every element. Infall, star formation and outflows to the
//! circumgalactic medium are source and sink terms handled by the
//! integrator and do not take part in the balance.
//!
//! The exchange is built so that it balances by construction; a violation
//! means the exchange or a zone's state was corrupted and the run stops.

use std::collections::{BTreeMap, BTreeSet};

use crate::integrator::GasFlow;
use crate::zone::ZoneState;

/// Relative tolerance on the exchange balance.
const RELATIVE_TOLERANCE: f64 = 1e-9;

/// Outcome of a consistency check.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyResult {
    /// Everything checks out.
    Consistent,
    /// Something is off; the description names what.
    Violation(String),
}

impl ConsistencyResult {
    /// Whether the check passed.
    pub const fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }
}

/// Verify that the gas leaving zones equals the gas arriving in zones.
pub fn verify_exchange(inflows: &[GasFlow], outflows: &[GasFlow]) -> ConsistencyResult {
    let total_in: f64 = inflows.iter().map(|f| f.gas).sum();
    let total_out: f64 = outflows.iter().map(|f| f.gas).sum();
    if !balanced(total_in, total_out) {
        return ConsistencyResult::Violation(format!(
            "gas exchange unbalanced: {total_out:e} Msun left zones, {total_in:e} Msun arrived"
        ));
    }

    let mut element_in: BTreeMap<&str, f64> = BTreeMap::new();
    let mut element_out: BTreeMap<&str, f64> = BTreeMap::new();
    for flow in inflows {
        for (element, mass) in &flow.elements {
            *element_in.entry(element).or_insert(0.0) += mass;
        }
    }
    for flow in outflows {
        for (element, mass) in &flow.elements {
            *element_out.entry(element).or_insert(0.0) += mass;
        }
    }

    let all: BTreeSet<&str> = element_in.keys().chain(element_out.keys()).copied().collect();
    for element in all {
        let arrived = element_in.get(element).copied().unwrap_or_default();
        let left = element_out.get(element).copied().unwrap_or_default();
        if !balanced(arrived, left) {
            return ConsistencyResult::Violation(format!(
                "{element} exchange unbalanced: {left:e} Msun left zones, {arrived:e} Msun arrived"
            ));
        }
    }
    ConsistencyResult::Consistent
}

/// Verify that every zone completed `timestep` steps and holds no
/// negative or non-finite mass.
pub fn verify_zones(zones: &[ZoneState], timestep: u64) -> ConsistencyResult {
    for zone in zones {
        if zone.timestep != timestep {
            return ConsistencyResult::Violation(format!(
                "zone {} is at step {}, expected {timestep}",
                zone.name, zone.timestep
            ));
        }
        let masses = [("gas", zone.gas), ("stars", zone.stars)]
            .into_iter()
            .chain(zone.elements.iter().map(|(e, m)| (e.as_str(), *m)));
        for (quantity, mass) in masses {
            if !mass.is_finite() || mass < 0.0 {
                return ConsistencyResult::Violation(format!(
                    "zone {} has invalid {quantity} mass {mass}",
                    zone.name
                ));
            }
        }
    }
    ConsistencyResult::Consistent
}

fn balanced(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs());
    (a - b).abs() <= RELATIVE_TOLERANCE * scale || scale < f64::MIN_POSITIVE
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::zone::ZoneParameters;

    fn flow(gas: f64, fe: f64) -> GasFlow {
        GasFlow {
            gas,
            elements: BTreeMap::from([("fe".to_owned(), fe)]),
        }
    }

    #[test]
    fn balanced_exchange_passes() {
        let inflows = [flow(1.0e8, 1.0e4), flow(3.0e8, 2.0e4)];
        let outflows = [flow(4.0e8, 3.0e4), flow(0.0, 0.0)];
        assert!(verify_exchange(&inflows, &outflows).is_consistent());
    }

    #[test]
    fn no_exchange_is_balanced() {
        let none = [GasFlow::default(), GasFlow::default()];
        assert!(verify_exchange(&none, &none).is_consistent());
    }

    #[test]
    fn lost_gas_is_a_violation() {
        let inflows = [flow(1.0e8, 0.0)];
        let outflows = [flow(1.1e8, 0.0)];
        assert!(!verify_exchange(&inflows, &outflows).is_consistent());
    }

    #[test]
    fn lost_metals_are_a_violation() {
        let inflows = [flow(1.0e8, 1.0e4)];
        let outflows = [flow(1.0e8, 2.0e4)];
        assert!(matches!(
            verify_exchange(&inflows, &outflows),
            ConsistencyResult::Violation(msg) if msg.starts_with("fe")
        ));
    }

    #[test]
    fn zone_out_of_step_is_a_violation() {
        let elements = ["fe".to_owned()];
        let mut zones = vec![
            ZoneState::new("a", 0.1, ZoneParameters::default(), &elements),
            ZoneState::new("b", 0.1, ZoneParameters::default(), &elements),
        ];
        zones.iter_mut().for_each(|z| z.timestep = 4);
        assert!(verify_zones(&zones, 4).is_consistent());

        zones.last_mut().unwrap().timestep = 3;
        assert!(!verify_zones(&zones, 4).is_consistent());
    }

    #[test]
    fn negative_mass_is_a_violation() {
        let mut zone = ZoneState::new("a", 0.1, ZoneParameters::default(), &["fe".to_owned()]);
        zone.elements.insert("fe".to_owned(), -1.0);
        assert!(!verify_zones(&[zone], 0).is_consistent());
    }
}
