//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Model adapter shim around an opaque emulation unit."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::errors::{AdapterError, RegistryError};
use crate::registry::SignalRegistry;
use crate::unit::{EmulationUnit, UnitValue};

/// Signal name to value mapping with deterministic ordering.
pub type SignalMap = BTreeMap<String, f64>;

/// Outputs observed after a successful step plus the wall time it took.
#[derive(Debug, Clone)]
pub struct StepExchange {
    pub outputs: SignalMap,
    pub latency: Duration,
}

/// Narrow set/step/get shim over an emulation unit.
pub struct ModelAdapter {
    unit: Box<dyn EmulationUnit>,
    registry: Arc<SignalRegistry>,
}

impl ModelAdapter {
    /// Wrap a unit and build its registry from the unit's declared metadata.
    pub fn new(unit: Box<dyn EmulationUnit>) -> Result<Self, RegistryError> {
        let registry = Arc::new(SignalRegistry::from_metadata(&unit.metadata())?);
        Ok(Self { unit, registry })
    }

    pub fn registry(&self) -> Arc<SignalRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn initialize(&mut self, start_time: f64, warmup_end: f64) -> Result<(), AdapterError> {
        self.unit.initialize(start_time, warmup_end)?;
        Ok(())
    }

    /// Write supplied values and raise their activation flags. Channels absent from
    /// `inputs` get their activation cleared so the unit's own controller takes over.
    pub fn set_inputs(&mut self, inputs: &SignalMap) -> Result<(), AdapterError> {
        for signal in self.registry.list_inputs() {
            match inputs.get(&signal.name) {
                Some(value) => {
                    self.unit.set(&signal.name, UnitValue::Real(*value))?;
                    self.unit.set(&signal.activation, UnitValue::Boolean(true))?;
                }
                None => {
                    self.unit.set(&signal.activation, UnitValue::Boolean(false))?;
                }
            }
        }
        Ok(())
    }

    pub fn do_step(&mut self, duration: f64) -> Result<(), AdapterError> {
        self.unit.do_step(duration)?;
        Ok(())
    }

    pub fn get_outputs(&self) -> Result<SignalMap, AdapterError> {
        let mut outputs = SignalMap::new();
        for signal in self.registry.list_outputs() {
            let value = self.unit.get(&signal.name)?;
            if !value.is_finite() {
                return Err(AdapterError::NonFiniteOutput {
                    name: signal.name.clone(),
                    value,
                });
            }
            outputs.insert(signal.name.clone(), value);
        }
        Ok(outputs)
    }

    /// One full set, step, get round trip.
    pub fn exchange(
        &mut self,
        inputs: &SignalMap,
        duration: f64,
    ) -> Result<StepExchange, AdapterError> {
        let started = Instant::now();
        self.set_inputs(inputs)?;
        self.do_step(duration)?;
        let outputs = self.get_outputs()?;
        let latency = started.elapsed();
        trace!(duration, latency_us = latency.as_micros() as u64, "model step exchanged");
        Ok(StepExchange { outputs, latency })
    }
}

impl fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("inputs", &self.registry.input_names())
            .field("outputs", &self.registry.output_names())
            .finish_non_exhaustive()
    }
}
