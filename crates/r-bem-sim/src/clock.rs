//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation clock owning scenario time and step size."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use r_bem_common::config::ScenarioConfig;
use r_bem_common::time::TIME_EPSILON;
use serde::Serialize;

use crate::errors::ClockError;

/// Result of moving the clock forward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockAdvance {
    pub time: f64,
    pub elapsed: f64,
    pub reached_end: bool,
}

/// Point-in-time view of the clock.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct SimulationState {
    pub current_time: f64,
    pub step: f64,
    pub scenario_start: f64,
    pub warmup_end: f64,
    pub scenario_end: f64,
    pub initialized: bool,
}

#[derive(Debug, Clone)]
pub struct SimulationClock {
    current: f64,
    step: f64,
    start: f64,
    warmup_end: f64,
    end: f64,
    initialized: bool,
}

pub fn check_step(step: f64) -> Result<f64, ClockError> {
    if step.is_finite() && step > 0.0 {
        Ok(step)
    } else {
        Err(ClockError::InvalidStep(step))
    }
}

impl SimulationClock {
    /// Build an uninitialized clock from validated scenario bounds.
    pub fn new(scenario: &ScenarioConfig) -> Self {
        Self {
            current: scenario.start_time,
            step: scenario.step,
            start: scenario.start_time,
            warmup_end: scenario.warmup_end(),
            end: scenario.end_time,
            initialized: false,
        }
    }

    /// Rewind to the start of the scored window, optionally replacing the step size.
    pub fn reset(&mut self, step: Option<f64>) -> Result<SimulationState, ClockError> {
        if let Some(step) = step {
            self.step = check_step(step)?;
        }
        self.current = self.warmup_end;
        self.initialized = true;
        Ok(self.state())
    }

    pub fn set_step(&mut self, step: f64) -> Result<(), ClockError> {
        self.step = check_step(step)?;
        Ok(())
    }

    /// Drop back to the uninitialized state, keeping the configured step.
    pub fn invalidate(&mut self) {
        self.current = self.start;
        self.initialized = false;
    }

    /// Duration the next configured step will actually cover.
    pub fn plan_step(&self) -> f64 {
        self.step.min(self.end - self.current).max(0.0)
    }

    /// Outcome of advancing by `duration` without applying it.
    pub fn preview(&self, duration: f64) -> ClockAdvance {
        let target = self.current + duration;
        if target >= self.end - TIME_EPSILON {
            ClockAdvance {
                time: self.end,
                elapsed: self.end - self.current,
                reached_end: true,
            }
        } else {
            ClockAdvance {
                time: target,
                elapsed: duration,
                reached_end: false,
            }
        }
    }

    /// Move the clock forward, clipping at the scenario end.
    pub fn advance_by(&mut self, duration: f64) -> ClockAdvance {
        let advance = self.preview(duration);
        self.current = advance.time;
        advance
    }

    pub fn current_time(&self) -> f64 {
        self.current
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn state(&self) -> SimulationState {
        SimulationState {
            current_time: self.current,
            step: self.step,
            scenario_start: self.start,
            warmup_end: self.warmup_end,
            scenario_end: self.end,
            initialized: self.initialized,
        }
    }
}
