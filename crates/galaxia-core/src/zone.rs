//! Per-zone chemical evolution state.
//!
//! A [`ZoneState`] holds one annulus of the disk: its gas reservoir,
//! in-situ stellar mass, element masses in the gas phase, science
//! parameters, the history rows captured at output times, the gas-phase
//! metallicity at every step (used to tag tracers formed there), and the
//! tracers currently resident in it.

use std::collections::BTreeMap;

use galaxia_types::TracerParticle;
use serde::{Deserialize, Serialize};

use crate::integrator::StepReport;

/// Science parameters of one zone.
///
/// The parameters that describe the stellar physics (IMF, recycling,
/// delay-time distribution, star formation law, mass range, solar
/// metallicity, AGB yields) are expected to agree across the zones of one
/// simulation; see [`ZoneParameters::plausibility_differences`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneParameters {
    /// Initial gas mass in Msun.
    #[serde(default = "default_initial_gas")]
    pub initial_gas: f64,

    /// Star formation timescale in Gyr.
    #[serde(default = "default_tau_star")]
    pub tau_star: f64,

    /// Mass loading factor of the outflow.
    #[serde(default = "default_eta")]
    pub eta: f64,

    /// Instantaneous return fraction of newly formed stars.
    #[serde(default = "default_recycling")]
    pub recycling: f64,

    /// Infall rate of pristine gas in Msun/yr.
    #[serde(default = "default_infall_rate")]
    pub infall_rate: f64,

    /// Stellar initial mass function.
    #[serde(default = "default_imf")]
    pub imf: String,

    /// Minimum delay before the first type Ia supernova, Gyr.
    #[serde(default = "default_delay")]
    pub delay: f64,

    /// Type Ia supernova delay-time distribution.
    #[serde(default = "default_ria")]
    pub ria: String,

    /// Whether the star formation timescale follows a Kennicutt-Schmidt law.
    #[serde(default)]
    pub schmidt: bool,

    /// Power-law index of the Kennicutt-Schmidt law.
    #[serde(default = "default_schmidt_index")]
    pub schmidt_index: f64,

    /// Normalization gas mass of the Kennicutt-Schmidt law, Msun.
    #[serde(default = "default_mg_schmidt")]
    pub mg_schmidt: f64,

    /// Upper mass limit of star formation, Msun.
    #[serde(default = "default_m_upper")]
    pub m_upper: f64,

    /// Lower mass limit of star formation, Msun.
    #[serde(default = "default_m_lower")]
    pub m_lower: f64,

    /// Total solar metallicity by mass.
    #[serde(default = "default_z_solar")]
    pub z_solar: f64,

    /// Asymptotic giant branch yield model.
    #[serde(default = "default_agb_model")]
    pub agb_model: String,
}

impl Default for ZoneParameters {
    fn default() -> Self {
        Self {
            initial_gas: default_initial_gas(),
            tau_star: default_tau_star(),
            eta: default_eta(),
            recycling: default_recycling(),
            infall_rate: default_infall_rate(),
            imf: default_imf(),
            delay: default_delay(),
            ria: default_ria(),
            schmidt: false,
            schmidt_index: default_schmidt_index(),
            mg_schmidt: default_mg_schmidt(),
            m_upper: default_m_upper(),
            m_lower: default_m_lower(),
            z_solar: default_z_solar(),
            agb_model: default_agb_model(),
        }
    }
}

impl ZoneParameters {
    /// Names of the stellar-physics parameters that differ from `other`.
    ///
    /// Differences are not errors; a caller usually logs them as warnings.
    #[allow(clippy::float_cmp)]
    pub fn plausibility_differences(&self, other: &Self) -> Vec<&'static str> {
        let checks = [
            ("imf", self.imf != other.imf),
            ("recycling", self.recycling != other.recycling),
            ("delay", self.delay != other.delay),
            ("ria", self.ria != other.ria),
            ("schmidt", self.schmidt != other.schmidt),
            ("schmidt_index", self.schmidt_index != other.schmidt_index),
            ("mg_schmidt", self.mg_schmidt != other.mg_schmidt),
            ("m_upper", self.m_upper != other.m_upper),
            ("m_lower", self.m_lower != other.m_lower),
            ("z_solar", self.z_solar != other.z_solar),
            ("agb_model", self.agb_model != other.agb_model),
        ];
        checks
            .into_iter()
            .filter_map(|(name, differs)| differs.then_some(name))
            .collect()
    }

    /// Effective star formation timescale for a gas mass, Gyr.
    pub fn effective_tau_star(&self, gas: f64) -> f64 {
        if self.schmidt && gas > 0.0 && self.mg_schmidt > 0.0 {
            self.tau_star * (gas / self.mg_schmidt).powf(-self.schmidt_index)
        } else {
            self.tau_star
        }
    }
}

/// Zone quantities captured at one output time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    /// Simulation time, Gyr.
    pub time: f64,
    /// Gas mass, Msun.
    pub gas: f64,
    /// In-situ stellar mass, Msun.
    pub stars: f64,
    /// Star formation rate during the previous step, Msun/yr.
    pub sfr: f64,
    /// Gas-phase element masses, Msun.
    pub elements: BTreeMap<String, f64>,
    /// Gas-phase element mass fractions.
    pub metallicity: BTreeMap<String, f64>,
    /// Tracers resident at capture time.
    pub tracers: usize,
}

/// One spatial zone of the disk.
#[derive(Debug, Clone)]
pub struct ZoneState {
    /// Unique zone name.
    pub name: String,
    /// Step size in Gyr.
    pub dt: f64,
    /// Steps this zone has completed.
    pub timestep: u64,
    /// Gas mass, Msun.
    pub gas: f64,
    /// In-situ stellar mass (formed minus returned), Msun.
    pub stars: f64,
    /// Gas-phase element masses, Msun.
    pub elements: BTreeMap<String, f64>,
    /// Science parameters.
    pub params: ZoneParameters,
    /// Rows captured at output times.
    pub history: Vec<HistoryRow>,
    /// Gas-phase metallicity at the start of every step.
    pub metallicity_history: Vec<BTreeMap<String, f64>>,
    /// Stellar mass formed during every step, Msun.
    pub formed_history: Vec<f64>,
    /// Tracers currently resident in this zone.
    pub tracers: Vec<TracerParticle>,
    /// Report of the most recent step.
    pub last_step: StepReport,
}

impl ZoneState {
    /// Create a zone with its initial gas reservoir and no metals.
    pub fn new(name: impl Into<String>, dt: f64, params: ZoneParameters, elements: &[String]) -> Self {
        Self {
            name: name.into(),
            dt,
            timestep: 0,
            gas: params.initial_gas,
            stars: 0.0,
            elements: elements.iter().map(|e| (e.clone(), 0.0)).collect(),
            params,
            history: Vec::new(),
            metallicity_history: Vec::new(),
            formed_history: Vec::new(),
            tracers: Vec::new(),
            last_step: StepReport::default(),
        }
    }

    /// Gas-phase mass fraction of `element`; 0 without gas.
    pub fn metallicity(&self, element: &str) -> f64 {
        let mass = self.elements.get(element).copied().unwrap_or_default();
        if self.gas > 0.0 { mass / self.gas } else { 0.0 }
    }

    /// Gas-phase mass fractions of every tracked element.
    pub fn metallicities(&self) -> BTreeMap<String, f64> {
        self.elements
            .keys()
            .map(|e| (e.clone(), self.metallicity(e)))
            .collect()
    }

    /// Remember the current metallicity for the step about to run.
    pub fn record_metallicity(&mut self) {
        let z = self.metallicities();
        self.metallicity_history.push(z);
    }

    /// Metallicity at the start of step `timestep`.
    pub fn metallicity_at(&self, timestep: u64) -> Option<&BTreeMap<String, f64>> {
        usize::try_from(timestep)
            .ok()
            .and_then(|i| self.metallicity_history.get(i))
    }

    /// Bookkeeping after the integrator advanced this zone by one step.
    pub fn finish_step(&mut self, report: StepReport) {
        self.timestep = self.timestep.saturating_add(1);
        self.formed_history.push(report.formed);
        self.last_step = report;
    }

    /// Append a history row for `time`.
    pub fn capture(&mut self, time: f64) {
        let row = HistoryRow {
            time,
            gas: self.gas,
            stars: self.stars,
            sfr: self.last_step.sfr,
            elements: self.elements.clone(),
            metallicity: self.metallicities(),
            tracers: self.tracers.len(),
        };
        self.history.push(row);
    }

    /// Total mass of the resident tracers, Msun.
    pub fn tracer_mass(&self) -> f64 {
        self.tracers.iter().map(|t| t.mass).sum()
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_initial_gas() -> f64 {
    6.0e9
}

const fn default_tau_star() -> f64 {
    2.0
}

const fn default_eta() -> f64 {
    2.5
}

const fn default_recycling() -> f64 {
    0.4
}

const fn default_infall_rate() -> f64 {
    9.1
}

fn default_imf() -> String {
    "kroupa".to_owned()
}

const fn default_delay() -> f64 {
    0.15
}

fn default_ria() -> String {
    "plaw".to_owned()
}

const fn default_schmidt_index() -> f64 {
    0.5
}

const fn default_mg_schmidt() -> f64 {
    6.0e9
}

const fn default_m_upper() -> f64 {
    100.0
}

const fn default_m_lower() -> f64 {
    0.08
}

const fn default_z_solar() -> f64 {
    0.014
}

fn default_agb_model() -> String {
    "cristallo11".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use galaxia_types::ZoneIndex;

    use super::*;

    fn elements() -> Vec<String> {
        vec!["fe".to_owned(), "o".to_owned()]
    }

    #[test]
    fn new_zone_has_pristine_gas() {
        let zone = ZoneState::new("zone0", 0.01, ZoneParameters::default(), &elements());
        assert!((zone.gas - 6.0e9).abs() < 1.0);
        assert_eq!(zone.elements.len(), 2);
        assert!(zone.metallicity("fe").abs() < f64::EPSILON);
        assert!(zone.metallicity("mg").abs() < f64::EPSILON);
    }

    #[test]
    fn metallicity_is_mass_fraction() {
        let mut zone = ZoneState::new("zone0", 0.01, ZoneParameters::default(), &elements());
        zone.gas = 1.0e9;
        zone.elements.insert("o".to_owned(), 5.0e6);
        assert!((zone.metallicity("o") - 5.0e-3).abs() < 1e-15);
        zone.gas = 0.0;
        assert!(zone.metallicity("o").abs() < f64::EPSILON);
    }

    #[test]
    fn metallicity_history_is_indexed_by_step() {
        let mut zone = ZoneState::new("zone0", 0.01, ZoneParameters::default(), &elements());
        zone.record_metallicity();
        zone.finish_step(StepReport::default());
        zone.elements.insert("fe".to_owned(), 6.0e6);
        zone.record_metallicity();
        assert!(zone.metallicity_at(0).unwrap()["fe"].abs() < f64::EPSILON);
        assert!((zone.metallicity_at(1).unwrap()["fe"] - 1.0e-3).abs() < 1e-15);
        assert!(zone.metallicity_at(2).is_none());
        assert_eq!(zone.timestep, 1);
    }

    #[test]
    fn capture_counts_resident_tracers() {
        let mut zone = ZoneState::new("zone0", 0.01, ZoneParameters::default(), &elements());
        zone.tracers.push(TracerParticle::new(ZoneIndex(0), 0, 0.0, 2.0));
        zone.tracers.push(TracerParticle::new(ZoneIndex(0), 0, 0.0, 3.0));
        zone.capture(0.5);
        let row = zone.history.last().unwrap();
        assert_eq!(row.tracers, 2);
        assert!((row.time - 0.5).abs() < f64::EPSILON);
        assert!((zone.tracer_mass() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn plausibility_differences_lists_physics_only() {
        let a = ZoneParameters::default();
        let mut b = a.clone();
        b.tau_star = 5.0;
        b.eta = 0.1;
        assert!(a.plausibility_differences(&b).is_empty());
        b.imf = "salpeter".to_owned();
        b.z_solar = 0.02;
        assert_eq!(a.plausibility_differences(&b), vec!["imf", "z_solar"]);
    }

    #[test]
    fn schmidt_law_shortens_timescale_for_rich_zones() {
        let params = ZoneParameters {
            schmidt: true,
            ..ZoneParameters::default()
        };
        assert!((params.effective_tau_star(6.0e9) - 2.0).abs() < 1e-12);
        assert!((params.effective_tau_star(2.4e10) - 1.0).abs() < 1e-12);
    }
}
