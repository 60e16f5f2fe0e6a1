//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bundled single-zone RC emulation unit used for baselines and tests."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Single thermal zone with one lumped air capacitance coupled to a sinusoidal outdoor
//! temperature through the envelope conductance. A proportional heater tracks the
//! setpoint unless its power is overwritten.
use std::f64::consts::PI;

use r_bem_common::config::ModelConfig;
use r_bem_common::time::SECONDS_PER_DAY;

use crate::errors::UnitError;
use crate::metadata::{ModelMetadata, OverwriteBlock, ReadBlock};
use crate::unit::{EmulationUnit, UnitValue};

const MAX_SUBSTEP: f64 = 60.0;
const MIN_PLAUSIBLE_K: f64 = 200.0;
const MAX_PLAUSIBLE_K: f64 = 400.0;
const SETPOINT_MIN_K: f64 = 283.15;
const SETPOINT_MAX_K: f64 = 313.15;

#[derive(Debug, Clone, Copy, Default)]
struct Overwrite {
    value: f64,
    active: bool,
}

#[derive(Debug, Clone)]
pub struct SimpleRcZone {
    params: ModelConfig,
    time: f64,
    temperature: f64,
    heating_power: f64,
    setpoint: Overwrite,
    power: Overwrite,
}

impl SimpleRcZone {
    pub fn new(params: ModelConfig) -> Self {
        Self {
            time: 0.0,
            temperature: params.initial_temperature_k,
            heating_power: 0.0,
            setpoint: Overwrite::default(),
            power: Overwrite::default(),
            params,
        }
    }

    /// Outdoor dry bulb: coldest at midnight, warmest at noon.
    fn outdoor_temperature(&self, time: f64) -> f64 {
        let phase = 2.0 * PI * time / SECONDS_PER_DAY;
        self.params.outdoor_mean_k - self.params.outdoor_amplitude_k * phase.cos()
    }

    fn commanded_power(&self) -> f64 {
        let demand = if self.power.active {
            self.power.value
        } else {
            let setpoint = if self.setpoint.active {
                self.setpoint.value
            } else {
                self.params.default_setpoint_k
            };
            self.params.controller_gain_w_per_k * (setpoint - self.temperature)
        };
        demand.clamp(0.0, self.params.max_heating_power_w)
    }

    fn integrate(&mut self, duration: f64) -> Result<(), UnitError> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(UnitError::Solver(format!("invalid step duration {duration}")));
        }
        if duration == 0.0 {
            return Ok(());
        }
        let substeps = (duration / MAX_SUBSTEP).ceil().max(1.0);
        let dt = duration / substeps;
        for _ in 0..substeps as usize {
            let power = self.commanded_power();
            let outdoor = self.outdoor_temperature(self.time);
            let flux = power + self.params.ua_w_per_k * (outdoor - self.temperature);
            self.temperature += flux / self.params.capacitance_j_per_k * dt;
            self.heating_power = power;
            self.time += dt;
            if !(MIN_PLAUSIBLE_K..=MAX_PLAUSIBLE_K).contains(&self.temperature) {
                return Err(UnitError::Solver(format!(
                    "zone temperature {:.2} K left the physical range at t={:.0}",
                    self.temperature, self.time
                )));
            }
        }
        Ok(())
    }
}

fn real(name: &str, value: UnitValue) -> f64 {
    match value {
        UnitValue::Real(value) => value,
        UnitValue::Boolean(flag) => {
            tracing::debug!(variable = name, "boolean written to real variable");
            if flag {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn flag(value: UnitValue) -> bool {
    match value {
        UnitValue::Boolean(flag) => flag,
        UnitValue::Real(value) => value != 0.0,
    }
}

impl EmulationUnit for SimpleRcZone {
    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            overwrite: vec![
                OverwriteBlock {
                    instance: "oveTSetHea".into(),
                    unit: "K".into(),
                    min: SETPOINT_MIN_K,
                    max: SETPOINT_MAX_K,
                    description: "Zone heating setpoint".into(),
                },
                OverwriteBlock {
                    instance: "oveHeaPow".into(),
                    unit: "W".into(),
                    min: 0.0,
                    max: self.params.max_heating_power_w,
                    description: "Heater thermal power".into(),
                },
            ],
            read: vec![
                ReadBlock {
                    instance: "TRooAir".into(),
                    unit: "K".into(),
                    description: "Zone air temperature".into(),
                    kpis: vec!["comfort".into()],
                },
                ReadBlock {
                    instance: "PHea".into(),
                    unit: "W".into(),
                    description: "Heater thermal power".into(),
                    kpis: vec!["power".into()],
                },
                ReadBlock {
                    instance: "weaTDryBul".into(),
                    unit: "K".into(),
                    description: "Outdoor dry bulb temperature".into(),
                    kpis: Vec::new(),
                },
            ],
        }
    }

    fn initialize(&mut self, start_time: f64, warmup_end: f64) -> Result<(), UnitError> {
        if !start_time.is_finite() || warmup_end < start_time {
            return Err(UnitError::Initialization(format!(
                "warmup end {warmup_end} precedes start {start_time}"
            )));
        }
        self.time = start_time;
        self.temperature = self.params.initial_temperature_k;
        self.heating_power = 0.0;
        self.setpoint = Overwrite::default();
        self.power = Overwrite::default();
        self.integrate(warmup_end - start_time)
            .map_err(|err| UnitError::Initialization(err.to_string()))
    }

    fn set(&mut self, name: &str, value: UnitValue) -> Result<(), UnitError> {
        match name {
            "oveTSetHea_u" => self.setpoint.value = real(name, value),
            "oveTSetHea_activate" => self.setpoint.active = flag(value),
            "oveHeaPow_u" => self.power.value = real(name, value),
            "oveHeaPow_activate" => self.power.active = flag(value),
            other => return Err(UnitError::UnknownVariable(other.to_owned())),
        }
        Ok(())
    }

    fn do_step(&mut self, duration: f64) -> Result<(), UnitError> {
        self.integrate(duration)
    }

    fn get(&self, name: &str) -> Result<f64, UnitError> {
        match name {
            "TRooAir_y" => Ok(self.temperature),
            "PHea_y" => Ok(self.heating_power),
            "weaTDryBul_y" => Ok(self.outdoor_temperature(self.time)),
            other => Err(UnitError::UnknownVariable(other.to_owned())),
        }
    }
}
