//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Advance engine for building emulation co-simulation.
//!
//! A [`SessionManager`] wraps one [`EmulationUnit`] behind a [`ModelAdapter`] and moves it
//! through the scenario one step at a time, keeping the [`SimulationClock`], the KPI
//! accumulators and the results log consistent with every committed step.

pub mod adapter;
pub mod clock;
pub mod errors;
pub mod kpi;
pub mod metadata;
pub mod reference;
pub mod registry;
pub mod results;
pub mod session;
pub mod unit;

pub use adapter::{ModelAdapter, SignalMap, StepExchange};
pub use clock::{ClockAdvance, SimulationClock, SimulationState};
pub use errors::{
    AdapterError, ClockError, KpiError, RegistryError, ResultsError, SessionError, UnitError,
    ValidationError,
};
pub use kpi::{KpiCalculator, KpiRecord, KpiSnapshot, StepSample};
pub use metadata::{ModelMetadata, OverwriteBlock, ReadBlock};
pub use reference::SimpleRcZone;
pub use registry::{InputSignal, OutputSignal, SignalRegistry};
pub use results::{ResultRow, ResultsStore, TimeRange, TimeSeries};
pub use session::{AdvanceReport, Lifecycle, ResetReport, SessionManager, SessionStatus};
pub use unit::{EmulationUnit, UnitValue};
