//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the R-BEM workspace.
//! This crate exposes configuration loading, logging bootstrap, and simulation
//! time helpers consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, ComfortBand, KpiKind, KpiSpec, LoggingConfig, MetricsConfig,
    ModelConfig, PricePeriod, PriceSchedule, ScenarioConfig,
};
pub use logging::{init_tracing, LogFormat};

/// Semantic version of the running build.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
