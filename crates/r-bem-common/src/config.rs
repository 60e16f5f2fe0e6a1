//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::time::{hour_of_day, month_of_year, SECONDS_PER_DAY, SECONDS_PER_HOUR};

fn default_scenario_name() -> String {
    "simple_rc".to_owned()
}

fn default_end_time() -> f64 {
    7.0 * SECONDS_PER_DAY
}

fn default_step() -> f64 {
    SECONDS_PER_HOUR
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_init_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_true() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_scale() -> f64 {
    1.0
}

fn default_end_hour() -> u32 {
    24
}

/// Primary configuration object for the R-BEM runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_kpis")]
    pub kpis: Vec<KpiSpec>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_BEM_CONFIG";

    /// Load configuration from disk, respecting the `R_BEM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a single TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Validate structural invariants. Signal references inside KPI definitions are
    /// checked later against the model's signal registry.
    pub fn validate(&self) -> Result<()> {
        self.scenario.validate()?;
        self.model.validate()?;
        let mut seen = HashSet::new();
        for kpi in &self.kpis {
            kpi.validate()?;
            if !seen.insert(kpi.name.as_str()) {
                return Err(anyhow!("kpi '{}' is declared more than once", kpi.name));
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scenario: ScenarioConfig::default(),
            model: ModelConfig::default(),
            kpis: default_kpis(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Scenario window and stepping policy. Times are seconds since the scenario epoch.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_scenario_name")]
    pub name: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default = "default_end_time")]
    pub end_time: f64,
    #[serde(default)]
    pub warmup_period: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_step_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub step_timeout: Duration,
    #[serde(default = "default_init_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub init_timeout: Duration,
}

impl ScenarioConfig {
    /// Instant at which the scored window begins.
    pub fn warmup_end(&self) -> f64 {
        self.start_time + self.warmup_period
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("scenario name must not be empty"));
        }
        for (label, value) in [
            ("start_time", self.start_time),
            ("end_time", self.end_time),
            ("warmup_period", self.warmup_period),
            ("step", self.step),
        ] {
            if !value.is_finite() {
                return Err(anyhow!("scenario {} must be finite", label));
            }
        }
        if self.warmup_period < 0.0 {
            return Err(anyhow!("scenario warmup_period must not be negative"));
        }
        if self.warmup_end() >= self.end_time {
            return Err(anyhow!(
                "scenario end_time ({}) must lie after the warmup end ({})",
                self.end_time,
                self.warmup_end()
            ));
        }
        if self.step <= 0.0 {
            return Err(anyhow!("scenario step must be positive, got {}", self.step));
        }
        if self.step_timeout.is_zero() || self.init_timeout.is_zero() {
            return Err(anyhow!("scenario timeouts must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: default_scenario_name(),
            start_time: 0.0,
            end_time: default_end_time(),
            warmup_period: 0.0,
            step: default_step(),
            step_timeout: default_step_timeout(),
            init_timeout: default_init_timeout(),
        }
    }
}

/// Parameters of the bundled single-zone reference unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub capacitance_j_per_k: f64,
    pub ua_w_per_k: f64,
    pub max_heating_power_w: f64,
    pub controller_gain_w_per_k: f64,
    pub initial_temperature_k: f64,
    pub default_setpoint_k: f64,
    pub outdoor_mean_k: f64,
    pub outdoor_amplitude_k: f64,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("capacitance_j_per_k", self.capacitance_j_per_k),
            ("ua_w_per_k", self.ua_w_per_k),
            ("max_heating_power_w", self.max_heating_power_w),
            ("initial_temperature_k", self.initial_temperature_k),
            ("default_setpoint_k", self.default_setpoint_k),
            ("outdoor_mean_k", self.outdoor_mean_k),
        ];
        for (label, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("model {} must be finite and positive", label));
            }
        }
        if !self.controller_gain_w_per_k.is_finite() || self.controller_gain_w_per_k < 0.0 {
            return Err(anyhow!("model controller_gain_w_per_k must not be negative"));
        }
        if !self.outdoor_amplitude_k.is_finite() || self.outdoor_amplitude_k < 0.0 {
            return Err(anyhow!("model outdoor_amplitude_k must not be negative"));
        }
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            capacitance_j_per_k: 5.0e6,
            ua_w_per_k: 150.0,
            max_heating_power_w: 10_000.0,
            controller_gain_w_per_k: 2_000.0,
            initial_temperature_k: 293.15,
            default_setpoint_k: 294.15,
            outdoor_mean_k: 278.15,
            outdoor_amplitude_k: 5.0,
        }
    }
}

/// Aggregation policy applied to a KPI.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum KpiKind {
    /// Time integral of the absolute signal rate.
    SumRate,
    /// Time integral of comfort band violations.
    Discomfort,
    /// Time integral of rate multiplied by a tariff or emission factor.
    Priced,
    /// Running maximum of the summed signal rate.
    Peak,
    /// Wall-clock adapter time divided by simulated time.
    ComputationalTimeRatio,
}

/// Declarative KPI definition. Signals are either listed explicitly or resolved from a
/// KPI tag declared on the model's read blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub kind: KpiKind,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub comfort: Option<ComfortBand>,
    #[serde(default)]
    pub schedule: Option<PriceSchedule>,
}

impl KpiSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("kpi name must not be empty"));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(anyhow!("kpi '{}' scale must be finite and positive", self.name));
        }
        match self.kind {
            KpiKind::Discomfort => {
                let band = self
                    .comfort
                    .as_ref()
                    .ok_or_else(|| anyhow!("kpi '{}' requires a comfort band", self.name))?;
                band.validate()
                    .with_context(|| format!("kpi '{}' comfort band", self.name))?;
            }
            KpiKind::Priced => {
                let schedule = self
                    .schedule
                    .as_ref()
                    .ok_or_else(|| anyhow!("kpi '{}' requires a price schedule", self.name))?;
                schedule
                    .validate()
                    .with_context(|| format!("kpi '{}' price schedule", self.name))?;
            }
            KpiKind::SumRate | KpiKind::Peak | KpiKind::ComputationalTimeRatio => {}
        }
        Ok(())
    }
}

/// Acceptable range for a measured temperature, in the signal's unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ComfortBand {
    pub lower: f64,
    pub upper: f64,
}

impl ComfortBand {
    pub fn validate(&self) -> Result<()> {
        if !self.lower.is_finite() || !self.upper.is_finite() || self.lower > self.upper {
            return Err(anyhow!(
                "invalid comfort band [{}, {}]",
                self.lower,
                self.upper
            ));
        }
        Ok(())
    }

    /// Magnitude of the band violation for a measurement, zero inside the band.
    pub fn violation(&self, measured: f64) -> f64 {
        (measured - self.upper).max(0.0) + (self.lower - measured).max(0.0)
    }
}

/// Time-of-day and seasonal price (or emission factor) schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSchedule {
    pub base: f64,
    #[serde(default)]
    pub periods: Vec<PricePeriod>,
}

/// Price override applied during `[start_hour, end_hour)` in the listed months.
/// An empty month list applies all year; `start_hour > end_hour` wraps past midnight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePeriod {
    #[serde(default)]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default)]
    pub months: Vec<u32>,
    pub price: f64,
}

impl PricePeriod {
    fn applies(&self, hour: u32, month: u32) -> bool {
        let in_month = self.months.is_empty() || self.months.contains(&month);
        let in_hours = if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        };
        in_month && in_hours
    }
}

impl PriceSchedule {
    /// Constant schedule without time-of-day structure.
    pub fn flat(price: f64) -> Self {
        Self {
            base: price,
            periods: Vec::new(),
        }
    }

    /// Price in effect at a simulation timestamp. The first matching period wins.
    pub fn price_at(&self, seconds: f64) -> f64 {
        let hour = hour_of_day(seconds);
        let month = month_of_year(seconds);
        self.periods
            .iter()
            .find(|period| period.applies(hour, month))
            .map(|period| period.price)
            .unwrap_or(self.base)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base.is_finite() {
            return Err(anyhow!("base price must be finite"));
        }
        for period in &self.periods {
            if !period.price.is_finite() {
                return Err(anyhow!("period price must be finite"));
            }
            if period.start_hour > 23 || period.end_hour > 24 {
                return Err(anyhow!(
                    "period hours {}..{} out of range",
                    period.start_hour,
                    period.end_hour
                ));
            }
            if let Some(month) = period.months.iter().find(|m| !(1..=12).contains(*m)) {
                return Err(anyhow!("period month {} out of range", month));
            }
        }
        Ok(())
    }
}

/// KPI set installed when the configuration omits `[[kpis]]`.
pub fn default_kpis() -> Vec<KpiSpec> {
    let power = Some("power".to_owned());
    let comfort = Some("comfort".to_owned());
    vec![
        KpiSpec {
            name: "ener_tot".to_owned(),
            unit: "kWh".to_owned(),
            kind: KpiKind::SumRate,
            signals: Vec::new(),
            tag: power.clone(),
            scale: 1.0 / 3.6e6,
            comfort: None,
            schedule: None,
        },
        KpiSpec {
            name: "tdis_tot".to_owned(),
            unit: "Kh".to_owned(),
            kind: KpiKind::Discomfort,
            signals: Vec::new(),
            tag: comfort,
            scale: 1.0 / SECONDS_PER_HOUR,
            comfort: Some(ComfortBand {
                lower: 294.15,
                upper: 297.15,
            }),
            schedule: None,
        },
        KpiSpec {
            name: "cost_tot".to_owned(),
            unit: "EUR".to_owned(),
            kind: KpiKind::Priced,
            signals: Vec::new(),
            tag: power.clone(),
            scale: 1.0 / 3.6e6,
            comfort: None,
            schedule: Some(PriceSchedule {
                base: 0.18,
                periods: vec![PricePeriod {
                    start_hour: 7,
                    end_hour: 22,
                    months: Vec::new(),
                    price: 0.27,
                }],
            }),
        },
        KpiSpec {
            name: "emis_tot".to_owned(),
            unit: "kgCO2".to_owned(),
            kind: KpiKind::Priced,
            signals: Vec::new(),
            tag: power.clone(),
            scale: 1.0 / 3.6e6,
            comfort: None,
            schedule: Some(PriceSchedule::flat(0.2)),
        },
        KpiSpec {
            name: "pele_peak".to_owned(),
            unit: "kW".to_owned(),
            kind: KpiKind::Peak,
            signals: Vec::new(),
            tag: power,
            scale: 1.0e-3,
            comfort: None,
            schedule: None,
        },
        KpiSpec {
            name: "time_rat".to_owned(),
            unit: "".to_owned(),
            kind: KpiKind::ComputationalTimeRatio,
            signals: Vec::new(),
            tag: None,
            scale: 1.0,
            comfort: None,
            schedule: None,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_true")]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_api_listen(),
        }
    }
}
