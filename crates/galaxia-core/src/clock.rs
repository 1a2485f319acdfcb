//! Simulation clock and output schedule.
//!
//! The clock is the single source of truth for time in a run. Zones never
//! keep their own notion of the current time: it is always
//! `timestep * dt`, derived from the integer step counter so that long
//! runs do not accumulate floating-point drift.
//!
//! # Output rule
//!
//! An output is due at the current step when the current time has reached
//! the next scheduled output time, or when that output time falls in the
//! first half of the upcoming step (`2 * t_out < 2 * time + dt`). Every
//! scheduled time the rule covers is consumed at once, so two output times
//! closer than half a step produce a single capture.

use crate::error::SimulationError;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Step counter would overflow.
    #[error("timestep counter overflow: cannot advance beyond u64::MAX")]
    TimestepOverflow,

    /// Invalid timestep size or empty schedule.
    #[error("invalid time configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },

    /// An output time is negative or not finite.
    #[error("invalid output time: {time}")]
    InvalidOutputTime {
        /// The offending output time.
        time: f64,
    },
}

impl From<ClockError> for SimulationError {
    fn from(err: ClockError) -> Self {
        match err {
            ClockError::InvalidOutputTime { .. } => Self::Domain {
                reason: err.to_string(),
            },
            ClockError::TimestepOverflow | ClockError::InvalidConfig { .. } => {
                Self::Configuration {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Uniform-step clock with a sorted output schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationClock {
    /// Current step number, 0 at the start of the run.
    timestep: u64,

    /// Step size in Gyr.
    dt: f64,

    /// Output times sorted ascending without duplicates.
    output_times: Vec<f64>,

    /// Index of the next output time not yet captured.
    next_output: usize,
}

impl SimulationClock {
    /// Create a clock at time zero.
    ///
    /// Output times may be given in any order; duplicates are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `dt` is not a positive
    /// finite number or no output times are given, and
    /// [`ClockError::InvalidOutputTime`] if an output time is negative or
    /// not finite.
    pub fn new(dt: f64, output_times: &[f64]) -> Result<Self, ClockError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ClockError::InvalidConfig {
                reason: format!("timestep size must be positive, got {dt}"),
            });
        }
        if let Some(&time) = output_times.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(ClockError::InvalidOutputTime { time });
        }
        let mut output_times = output_times.to_vec();
        output_times.sort_by(f64::total_cmp);
        output_times.dedup();
        if output_times.is_empty() {
            return Err(ClockError::InvalidConfig {
                reason: "at least one output time is required".to_owned(),
            });
        }
        Ok(Self {
            timestep: 0,
            dt,
            output_times,
            next_output: 0,
        })
    }

    /// Current step number.
    pub const fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Step size in Gyr.
    pub const fn dt(&self) -> f64 {
        self.dt
    }

    /// Current time in Gyr.
    pub fn time(&self) -> f64 {
        self.timestep as f64 * self.dt
    }

    /// The sorted output schedule.
    pub fn output_times(&self) -> &[f64] {
        &self.output_times
    }

    /// Last scheduled output time.
    pub fn final_output(&self) -> f64 {
        self.output_times.last().copied().unwrap_or_default()
    }

    /// Whether a capture should happen at the current step.
    pub fn output_due(&self) -> bool {
        self.output_times
            .get(self.next_output)
            .is_some_and(|&t_out| self.covers(t_out))
    }

    /// Consume every output time covered by the current step. Returns how
    /// many were consumed.
    pub fn mark_output(&mut self) -> usize {
        let start = self.next_output;
        while self
            .output_times
            .get(self.next_output)
            .is_some_and(|&t_out| self.covers(t_out))
        {
            self.next_output = self.next_output.saturating_add(1);
        }
        self.next_output.saturating_sub(start)
    }

    /// Whether every scheduled output has been captured.
    pub fn finished(&self) -> bool {
        self.next_output >= self.output_times.len()
    }

    /// Number of steps needed to reach the final output time.
    #[allow(clippy::cast_sign_loss)]
    pub fn total_steps(&self) -> u64 {
        let steps = (self.final_output() / self.dt - 0.5).ceil().max(0.0);
        steps as u64
    }

    /// Advance by one step. Returns the new step number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TimestepOverflow`] if the counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.timestep = self
            .timestep
            .checked_add(1)
            .ok_or(ClockError::TimestepOverflow)?;
        Ok(self.timestep)
    }

    fn covers(&self, t_out: f64) -> bool {
        let time = self.time();
        time >= t_out || 2.0 * t_out < 2.0f64.mul_add(time, self.dt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_zero() {
        let clock = SimulationClock::new(0.01, &[1.0]).unwrap();
        assert_eq!(clock.timestep(), 0);
        assert!(clock.time().abs() < f64::EPSILON);
        assert!(!clock.finished());
    }

    #[test]
    fn schedule_is_sorted_and_deduplicated() {
        let clock = SimulationClock::new(0.1, &[0.5, 0.0, 0.5, 0.2]).unwrap();
        assert_eq!(clock.output_times(), &[0.0, 0.2, 0.5]);
        assert!((clock.final_output() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_bad_times() {
        assert!(matches!(
            SimulationClock::new(0.0, &[1.0]),
            Err(ClockError::InvalidConfig { .. })
        ));
        assert!(matches!(
            SimulationClock::new(0.1, &[]),
            Err(ClockError::InvalidConfig { .. })
        ));
        assert!(matches!(
            SimulationClock::new(0.1, &[1.0, -0.5]),
            Err(ClockError::InvalidOutputTime { .. })
        ));
        let err: SimulationError = SimulationClock::new(0.1, &[f64::NAN]).unwrap_err().into();
        assert!(matches!(err, SimulationError::Domain { .. }));
    }

    #[test]
    fn outputs_fire_on_schedule() {
        let mut clock = SimulationClock::new(0.1, &[0.0, 0.3, 0.5]).unwrap();
        let mut fired = Vec::new();
        while !clock.finished() {
            if clock.output_due() {
                clock.mark_output();
                fired.push(clock.timestep());
            }
            if clock.finished() {
                break;
            }
            clock.advance().unwrap();
        }
        assert_eq!(fired, vec![0, 3, 5]);
    }

    #[test]
    fn off_grid_output_fires_at_nearest_step() {
        // 0.34 falls in the first half of the step starting at 0.3
        let mut clock = SimulationClock::new(0.1, &[0.34]).unwrap();
        for _ in 0..3 {
            assert!(!clock.output_due());
            clock.advance().unwrap();
        }
        assert!(clock.output_due());
        assert_eq!(clock.mark_output(), 1);
        assert!(clock.finished());
    }

    #[test]
    fn close_outputs_are_consumed_together() {
        let mut clock = SimulationClock::new(0.1, &[0.0, 0.01, 0.02, 0.2]).unwrap();
        assert!(clock.output_due());
        assert_eq!(clock.mark_output(), 3);
        assert!(!clock.output_due());
    }

    #[test]
    fn total_steps_reaches_final_output() {
        let clock = SimulationClock::new(0.01, &[0.0, 1.0]).unwrap();
        assert_eq!(clock.total_steps(), 100);
    }
}
