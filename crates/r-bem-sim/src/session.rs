//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Session manager serializing reset/advance and committing steps atomically."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! The session owns the model adapter, the clock, the KPI calculator and the results log.
//!
//! Mutating calls (`reset`, `advance`, `set_step`) queue on a FIFO async gate and never
//! interleave. Model calls run on the blocking pool under a timeout while committed
//! state stays readable; the commit itself happens under a short write lock so readers
//! observe either the state before an advance or the state after it.
//!
//! A call abandoned by its timeout before it reached the unit never touches it. One that
//! was already running leaves the unit ahead of the committed clock, so the session
//! refuses further advances until the next successful reset.
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use r_bem_common::config::{AppConfig, KpiSpec, ScenarioConfig};
use r_bem_common::time::format_sim_time;
use r_bem_metrics::{Outcome, SessionMetrics};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{ModelAdapter, SignalMap};
use crate::clock::{check_step, SimulationClock, SimulationState};
use crate::errors::{AdapterError, Result, SessionError};
use crate::kpi::{KpiCalculator, KpiRecord, KpiSnapshot, StepSample};
use crate::reference::SimpleRcZone;
use crate::registry::{InputSignal, OutputSignal, SignalRegistry};
use crate::results::{ResultRow, ResultsStore, TimeRange, TimeSeries};
use crate::unit::EmulationUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    ScenarioEnded,
    /// A timed-out step may have run on the unit; only a reset recovers.
    NeedsReset,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceReport {
    pub time: f64,
    pub outputs: SignalMap,
    pub kpis: KpiSnapshot,
    pub end_of_scenario: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub time: f64,
    pub outputs: SignalMap,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub name: String,
    pub lifecycle: Lifecycle,
    pub session_id: Option<Uuid>,
    pub clock: SimulationState,
    pub result_rows: usize,
}

#[derive(Debug)]
struct Committed {
    lifecycle: Lifecycle,
    clock: SimulationClock,
    kpis: KpiCalculator,
    results: ResultsStore,
    measurements: SignalMap,
    session_id: Option<Uuid>,
}

impl Committed {
    fn clear(&mut self) {
        self.kpis.reset();
        self.results.clear();
        self.measurements.clear();
    }
}

pub struct SessionManager {
    scenario: ScenarioConfig,
    registry: Arc<SignalRegistry>,
    adapter: Arc<Mutex<ModelAdapter>>,
    gate: AsyncMutex<()>,
    state: RwLock<Committed>,
    metrics: Option<SessionMetrics>,
}

impl SessionManager {
    /// Wrap `unit` and validate the KPI definitions against its signals.
    pub fn new(
        scenario: ScenarioConfig,
        kpis: &[KpiSpec],
        unit: Box<dyn EmulationUnit>,
    ) -> anyhow::Result<Self> {
        let adapter = ModelAdapter::new(unit).context("model metadata is invalid")?;
        let registry = adapter.registry();
        let kpis = KpiCalculator::new(kpis, &registry).context("kpi definitions are invalid")?;
        let clock = SimulationClock::new(&scenario);
        info!(
            scenario = %scenario.name,
            inputs = registry.input_names().len(),
            outputs = registry.output_names().len(),
            "simulation session created"
        );
        Ok(Self {
            scenario,
            registry,
            adapter: Arc::new(Mutex::new(adapter)),
            gate: AsyncMutex::new(()),
            state: RwLock::new(Committed {
                lifecycle: Lifecycle::Uninitialized,
                clock,
                kpis,
                results: ResultsStore::new(),
                measurements: SignalMap::new(),
                session_id: None,
            }),
            metrics: None,
        })
    }

    /// Session over the bundled reference zone parameterised by `config.model`.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let unit = SimpleRcZone::new(config.model.clone());
        Self::new(config.scenario.clone(), &config.kpis, Box::new(unit))
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.scenario.name
    }

    pub fn registry(&self) -> Arc<SignalRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn inputs(&self) -> Vec<InputSignal> {
        self.registry.list_inputs().cloned().collect()
    }

    pub fn outputs(&self) -> Vec<OutputSignal> {
        self.registry.list_outputs().cloned().collect()
    }

    pub fn get_step(&self) -> f64 {
        self.state.read().clock.step()
    }

    pub async fn set_step(&self, step: f64) -> Result<f64> {
        let _turn = self.gate.lock().await;
        self.state.write().clock.set_step(step)?;
        debug!(step, "step size updated");
        Ok(step)
    }

    /// Re-initialize the model through warmup and start a fresh scored window.
    pub async fn reset(&self, step: Option<f64>) -> Result<ResetReport> {
        let _turn = self.gate.lock().await;
        let result = self.reset_locked(step).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_reset(outcome_of(&result));
            let state = self.state.read();
            metrics.set_progress(state.clock.current_time(), state.results.len());
        }
        result
    }

    async fn reset_locked(&self, step: Option<f64>) -> Result<ResetReport> {
        if let Some(step) = step {
            check_step(step)?;
        }
        let start = self.scenario.start_time;
        let warmup_end = self.scenario.warmup_end();
        let initialized = self
            .run_model(self.scenario.init_timeout, move |adapter| {
                adapter.initialize(start, warmup_end)?;
                adapter.get_outputs()
            })
            .await
            .map_err(|failure| failure.error);

        let mut state = self.state.write();
        match initialized {
            Ok(outputs) => {
                let clock = state.clock.reset(step)?;
                let session_id = Uuid::new_v4();
                state.clear();
                state.measurements = outputs.clone();
                state.lifecycle = Lifecycle::Ready;
                state.session_id = Some(session_id);
                info!(
                    session = %session_id,
                    time = clock.current_time,
                    sim_time = %format_sim_time(clock.current_time),
                    step = clock.step,
                    "session reset"
                );
                Ok(ResetReport {
                    time: clock.current_time,
                    outputs,
                    session_id,
                })
            }
            Err(err) => {
                state.clear();
                state.clock.invalidate();
                state.lifecycle = Lifecycle::Uninitialized;
                state.session_id = None;
                warn!(error = %err, "session reset failed; session is uninitialized");
                Err(SessionError::Reset(err))
            }
        }
    }

    /// Apply `inputs` for one step and commit outputs, clock, KPIs and results together.
    pub async fn advance(&self, inputs: SignalMap) -> Result<AdvanceReport> {
        let _turn = self.gate.lock().await;
        let result = self.advance_locked(inputs).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_advance(outcome_of(&result));
            if result.is_ok() {
                let state = self.state.read();
                metrics.set_progress(state.clock.current_time(), state.results.len());
            }
        }
        result
    }

    async fn advance_locked(&self, inputs: SignalMap) -> Result<AdvanceReport> {
        let (start_time, duration, session_id) = {
            let state = self.state.read();
            match state.lifecycle {
                Lifecycle::Uninitialized | Lifecycle::NeedsReset => {
                    return Err(SessionError::NotReady)
                }
                Lifecycle::ScenarioEnded => return Err(SessionError::ScenarioEnded),
                Lifecycle::Ready => {}
            }
            (
                state.clock.current_time(),
                state.clock.plan_step(),
                state.session_id,
            )
        };

        for (name, value) in &inputs {
            self.registry
                .validate_input(name, *value)
                .map_err(|reason| SessionError::InvalidInput {
                    name: name.clone(),
                    reason,
                })?;
        }

        let applied = inputs.clone();
        let exchange = match self
            .run_model(self.scenario.step_timeout, move |adapter| {
                adapter.exchange(&applied, duration)
            })
            .await
        {
            Ok(exchange) => exchange,
            Err(failure) => {
                warn!(
                    session = ?session_id,
                    time = start_time,
                    sim_time = %format_sim_time(start_time),
                    step = duration,
                    error = %failure.error,
                    "model step failed; nothing committed"
                );
                if failure.unit_in_flight {
                    self.state.write().lifecycle = Lifecycle::NeedsReset;
                    warn!(
                        session = ?session_id,
                        "model step abandoned while running; reset required"
                    );
                }
                return Err(SessionError::ModelStep(failure.error));
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_step(exchange.latency.as_secs_f64());
        }

        let mut state = self.state.write();
        let planned = state.clock.preview(duration);
        state.results.check_next(planned.time)?;

        let advance = state.clock.advance_by(duration);
        state.kpis.on_step(&StepSample {
            start_time,
            elapsed: advance.elapsed,
            outputs: &exchange.outputs,
            latency: exchange.latency,
        });
        let mut values = inputs;
        values.extend(exchange.outputs.iter().map(|(k, v)| (k.clone(), *v)));
        state.results.append(ResultRow {
            time: advance.time,
            values,
        })?;
        state.measurements = exchange.outputs.clone();
        if advance.reached_end {
            state.lifecycle = Lifecycle::ScenarioEnded;
            info!(
                session = ?session_id,
                time = advance.time,
                sim_time = %format_sim_time(advance.time),
                "scenario end reached"
            );
        }
        Ok(AdvanceReport {
            time: advance.time,
            outputs: exchange.outputs,
            kpis: state.kpis.snapshot(),
            end_of_scenario: advance.reached_end,
        })
    }

    /// Advance without overrides until the scenario ends; returns the number of steps.
    pub async fn run_to_end(&self) -> Result<usize> {
        let mut steps = 0;
        loop {
            let report = self.advance(SignalMap::new()).await?;
            steps += 1;
            if report.end_of_scenario {
                return Ok(steps);
            }
        }
    }

    /// Run `call` against the adapter on the blocking pool, bounded by `limit`.
    ///
    /// A runaway call keeps the adapter locked until it returns. Calls queued behind it
    /// that time out are skipped once they get the lock.
    async fn run_model<T, F>(&self, limit: Duration, call: F) -> Result<T, ModelFailure>
    where
        T: Send + 'static,
        F: FnOnce(&mut ModelAdapter) -> Result<T, AdapterError> + Send + 'static,
    {
        let adapter = Arc::clone(&self.adapter);
        let phase = Arc::new(Mutex::new(CallPhase::Queued));
        let task_phase = Arc::clone(&phase);
        let task = tokio::task::spawn_blocking(move || {
            let mut adapter = adapter.lock();
            {
                let mut phase = task_phase.lock();
                if *phase == CallPhase::Abandoned {
                    debug!("abandoned model call skipped");
                    return Err(AdapterError::Timeout(limit));
                }
                *phase = CallPhase::Running;
            }
            call(&mut adapter)
        });
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result.map_err(ModelFailure::settled),
            Ok(Err(join)) => Err(ModelFailure {
                error: AdapterError::Worker(join.to_string()),
                unit_in_flight: *phase.lock() == CallPhase::Running,
            }),
            Err(_) => {
                let mut phase = phase.lock();
                let unit_in_flight = *phase == CallPhase::Running;
                *phase = CallPhase::Abandoned;
                Err(ModelFailure {
                    error: AdapterError::Timeout(limit),
                    unit_in_flight,
                })
            }
        }
    }

    pub fn results(&self, range: TimeRange) -> Vec<ResultRow> {
        self.state.read().results.range(range)
    }

    pub fn series(&self, signal: &str, range: TimeRange) -> Result<TimeSeries> {
        if self.registry.input(signal).is_none() && !self.registry.has_output(signal) {
            return Err(SessionError::UnknownSignal(signal.to_owned()));
        }
        Ok(self.state.read().results.series(signal, range))
    }

    /// Most recent outputs: the post-warmup snapshot or the last committed step.
    pub fn measurements(&self) -> SignalMap {
        self.state.read().measurements.clone()
    }

    pub fn kpis(&self) -> KpiSnapshot {
        self.state.read().kpis.snapshot()
    }

    pub fn kpi_records(&self) -> Vec<KpiRecord> {
        self.state.read().kpis.records()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.read().lifecycle
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.read();
        SessionStatus {
            name: self.scenario.name.clone(),
            lifecycle: state.lifecycle,
            session_id: state.session_id,
            clock: state.clock.state(),
            result_rows: state.results.len(),
        }
    }

    pub fn write_results_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        self.state.read().results.write_csv(writer)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("scenario", &self.scenario.name)
            .field("lifecycle", &self.state.read().lifecycle)
            .finish_non_exhaustive()
    }
}

/// Progress of one model call, shared between the caller and the blocking task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPhase {
    Queued,
    Running,
    Abandoned,
}

#[derive(Debug)]
struct ModelFailure {
    error: AdapterError,
    /// The unit was inside the call when the caller gave up on it.
    unit_in_flight: bool,
}

impl ModelFailure {
    fn settled(error: AdapterError) -> Self {
        Self {
            error,
            unit_in_flight: false,
        }
    }
}

fn outcome_of<T>(result: &Result<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Ok,
        Err(SessionError::NotReady | SessionError::ScenarioEnded) => Outcome::Rejected,
        Err(err) if err.is_validation() => Outcome::Rejected,
        Err(_) => Outcome::Failed,
    }
}
