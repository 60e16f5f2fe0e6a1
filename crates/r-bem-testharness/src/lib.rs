//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test harness exports for trajectory checks and scenario fixtures."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Helpers shared by scenario tests: tolerant trajectory comparison and reference
//! series stored as CSV.

pub mod fixtures;
pub mod trajectory;

pub use fixtures::{read_reference, short_scenario, write_reference};
pub use trajectory::{check_results, check_trajectory, TrajectoryCheck, TOLERANCE};
