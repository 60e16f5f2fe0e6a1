//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Capability interface implemented by emulation units."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use crate::errors::UnitError;
use crate::metadata::ModelMetadata;

/// Value written to a unit variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitValue {
    Real(f64),
    Boolean(bool),
}

/// Opaque stepping oracle wrapped by the model adapter.
///
/// Implementations own whatever solver state they need. The engine only ever calls
/// `set`, `do_step` and `get` between `initialize` calls and never inspects internals.
pub trait EmulationUnit: Send {
    /// Static signal exchange metadata, read once at load.
    fn metadata(&self) -> ModelMetadata;

    /// Restart at `start_time` and simulate internally until `warmup_end`.
    fn initialize(&mut self, start_time: f64, warmup_end: f64) -> Result<(), UnitError>;

    fn set(&mut self, name: &str, value: UnitValue) -> Result<(), UnitError>;

    /// Integrate the model over `duration` seconds from its current time.
    fn do_step(&mut self, duration: f64) -> Result<(), UnitError>;

    fn get(&self, name: &str) -> Result<f64, UnitError>;
}
