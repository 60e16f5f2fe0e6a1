//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Incremental KPI accumulation over committed steps."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use indexmap::IndexMap;
use r_bem_common::config::{ComfortBand, KpiKind, KpiSpec, PriceSchedule};
use serde::Serialize;

use crate::adapter::SignalMap;
use crate::errors::KpiError;
use crate::registry::SignalRegistry;

/// KPI name to current value, in registration order.
pub type KpiSnapshot = IndexMap<String, f64>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KpiRecord {
    pub name: String,
    pub unit: String,
    pub value: f64,
    /// The value can only grow between resets.
    pub cumulative: bool,
}

/// Everything the calculator needs to know about one committed step.
#[derive(Debug, Clone, Copy)]
pub struct StepSample<'a> {
    pub start_time: f64,
    pub elapsed: f64,
    pub outputs: &'a SignalMap,
    pub latency: Duration,
}

#[derive(Debug, Clone)]
enum Aggregation {
    SumRate,
    Discomfort(ComfortBand),
    Priced(PriceSchedule),
    Peak,
    TimeRatio,
}

impl Aggregation {
    fn from_spec(spec: &KpiSpec) -> Result<Self, KpiError> {
        let aggregation = match spec.kind {
            KpiKind::SumRate => Aggregation::SumRate,
            KpiKind::Discomfort => Aggregation::Discomfort(
                spec.comfort
                    .ok_or_else(|| KpiError::MissingParameter(spec.name.clone(), "comfort band"))?,
            ),
            KpiKind::Priced => Aggregation::Priced(
                spec.schedule
                    .clone()
                    .ok_or_else(|| KpiError::MissingParameter(spec.name.clone(), "schedule"))?,
            ),
            KpiKind::Peak => Aggregation::Peak,
            KpiKind::ComputationalTimeRatio => Aggregation::TimeRatio,
        };
        Ok(aggregation)
    }

    fn uses_signals(&self) -> bool {
        !matches!(self, Aggregation::TimeRatio)
    }
}

#[derive(Debug, Clone)]
struct KpiState {
    name: String,
    unit: String,
    aggregation: Aggregation,
    signals: Vec<String>,
    scale: f64,
    value: f64,
}

impl KpiState {
    fn rate_sum(&self, outputs: &SignalMap) -> f64 {
        self.signals
            .iter()
            .filter_map(|signal| outputs.get(signal))
            .map(|rate| rate.abs())
            .sum()
    }

    fn apply(&mut self, sample: &StepSample<'_>, wall_total: f64, sim_total: f64) {
        match &self.aggregation {
            Aggregation::SumRate => {
                self.value += self.rate_sum(sample.outputs) * sample.elapsed * self.scale;
            }
            Aggregation::Discomfort(band) => {
                let violation: f64 = self
                    .signals
                    .iter()
                    .filter_map(|signal| sample.outputs.get(signal))
                    .map(|measured| band.violation(*measured))
                    .sum();
                self.value += violation * sample.elapsed * self.scale;
            }
            Aggregation::Priced(schedule) => {
                let price = schedule.price_at(sample.start_time);
                self.value += self.rate_sum(sample.outputs) * price * sample.elapsed * self.scale;
            }
            Aggregation::Peak => {
                self.value = self.value.max(self.rate_sum(sample.outputs) * self.scale);
            }
            Aggregation::TimeRatio => {
                if sim_total > 0.0 {
                    self.value = wall_total / sim_total * self.scale;
                }
            }
        }
    }
}

/// Incremental KPI calculator. Aggregation policies are fixed at construction.
#[derive(Debug, Clone)]
pub struct KpiCalculator {
    kpis: Vec<KpiState>,
    wall_seconds: f64,
    sim_seconds: f64,
}

impl KpiCalculator {
    /// Resolve KPI definitions against the registry, failing fast on dangling signals.
    pub fn new(specs: &[KpiSpec], registry: &SignalRegistry) -> Result<Self, KpiError> {
        let mut kpis = Vec::with_capacity(specs.len());
        for spec in specs {
            let aggregation = Aggregation::from_spec(spec)?;
            let mut signals = Vec::new();
            if aggregation.uses_signals() {
                for signal in &spec.signals {
                    if !registry.has_output(signal) {
                        return Err(KpiError::UnknownSignal {
                            kpi: spec.name.clone(),
                            signal: signal.clone(),
                        });
                    }
                    if !signals.contains(signal) {
                        signals.push(signal.clone());
                    }
                }
                if let Some(tag) = &spec.tag {
                    let group = registry.kpi_group(tag).ok_or_else(|| KpiError::UnknownTag {
                        kpi: spec.name.clone(),
                        tag: tag.clone(),
                    })?;
                    for signal in group {
                        if !signals.contains(signal) {
                            signals.push(signal.clone());
                        }
                    }
                }
                if signals.is_empty() {
                    return Err(KpiError::NoSignals(spec.name.clone()));
                }
            }
            kpis.push(KpiState {
                name: spec.name.clone(),
                unit: spec.unit.clone(),
                aggregation,
                signals,
                scale: spec.scale,
                value: 0.0,
            });
        }
        Ok(Self {
            kpis,
            wall_seconds: 0.0,
            sim_seconds: 0.0,
        })
    }

    /// Fold one committed step into every KPI.
    pub fn on_step(&mut self, sample: &StepSample<'_>) {
        self.wall_seconds += sample.latency.as_secs_f64();
        self.sim_seconds += sample.elapsed;
        let (wall_total, sim_total) = (self.wall_seconds, self.sim_seconds);
        for kpi in &mut self.kpis {
            kpi.apply(sample, wall_total, sim_total);
        }
    }

    pub fn reset(&mut self) {
        self.wall_seconds = 0.0;
        self.sim_seconds = 0.0;
        for kpi in &mut self.kpis {
            kpi.value = 0.0;
        }
    }

    pub fn snapshot(&self) -> KpiSnapshot {
        self.kpis
            .iter()
            .map(|kpi| (kpi.name.clone(), kpi.value))
            .collect()
    }

    pub fn records(&self) -> Vec<KpiRecord> {
        self.kpis
            .iter()
            .map(|kpi| KpiRecord {
                name: kpi.name.clone(),
                unit: kpi.unit.clone(),
                value: kpi.value,
                cumulative: matches!(
                    kpi.aggregation,
                    Aggregation::SumRate | Aggregation::Discomfort(_) | Aggregation::Peak
                ),
            })
            .collect()
    }
}
