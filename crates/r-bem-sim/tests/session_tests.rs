//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "tests"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "Session lifecycle, atomicity and scenario boundary tests."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use r_bem_common::config::{AppConfig, KpiKind, KpiSpec, ScenarioConfig};
use r_bem_sim::{
    AdapterError, EmulationUnit, Lifecycle, ModelMetadata, OverwriteBlock, ReadBlock,
    SessionError, SessionManager, SignalMap, TimeRange, UnitError, UnitValue, ValidationError,
};

#[derive(Clone, Default)]
struct Switches {
    fail_step: Arc<AtomicBool>,
    fail_init: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    inits: Arc<AtomicU64>,
    steps: Arc<AtomicU64>,
}

/// Integrates a commanded rate; defaults to 1 unit/s when not overridden.
struct Tank {
    switches: Switches,
    level: f64,
    rate: f64,
    pending: f64,
    active: bool,
}

impl Tank {
    fn boxed(switches: &Switches) -> Box<dyn EmulationUnit> {
        Box::new(Self {
            switches: switches.clone(),
            level: 0.0,
            rate: 0.0,
            pending: 0.0,
            active: false,
        })
    }
}

impl EmulationUnit for Tank {
    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            overwrite: vec![OverwriteBlock {
                instance: "valve".into(),
                unit: "1/s".into(),
                min: 0.0,
                max: 10.0,
                description: "Fill rate".into(),
            }],
            read: vec![
                ReadBlock {
                    instance: "flow".into(),
                    unit: "1/s".into(),
                    description: String::new(),
                    kpis: vec!["power".into()],
                },
                ReadBlock {
                    instance: "level".into(),
                    unit: "1".into(),
                    description: String::new(),
                    kpis: Vec::new(),
                },
            ],
        }
    }

    fn initialize(&mut self, start_time: f64, warmup_end: f64) -> Result<(), UnitError> {
        if self.switches.fail_init.load(Ordering::SeqCst) {
            return Err(UnitError::Initialization("licence unavailable".into()));
        }
        self.switches.inits.fetch_add(1, Ordering::SeqCst);
        self.rate = 1.0;
        self.level = warmup_end - start_time;
        self.active = false;
        Ok(())
    }

    fn set(&mut self, name: &str, value: UnitValue) -> Result<(), UnitError> {
        match (name, value) {
            ("valve_u", UnitValue::Real(v)) => self.pending = v,
            ("valve_activate", UnitValue::Boolean(b)) => self.active = b,
            (other, _) => return Err(UnitError::UnknownVariable(other.to_owned())),
        }
        Ok(())
    }

    fn do_step(&mut self, duration: f64) -> Result<(), UnitError> {
        self.switches.steps.fetch_add(1, Ordering::SeqCst);
        let delay = self.switches.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.switches.fail_step.load(Ordering::SeqCst) {
            return Err(UnitError::Solver("diverged".into()));
        }
        self.rate = if self.active { self.pending } else { 1.0 };
        self.level += self.rate * duration;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<f64, UnitError> {
        match name {
            "flow_y" => Ok(self.rate),
            "level_y" => Ok(self.level),
            other => Err(UnitError::UnknownVariable(other.to_owned())),
        }
    }
}

fn scenario(end: f64, step: f64) -> ScenarioConfig {
    ScenarioConfig {
        name: "tank".into(),
        start_time: 0.0,
        end_time: end,
        warmup_period: 0.0,
        step,
        step_timeout: Duration::from_secs(5),
        init_timeout: Duration::from_secs(5),
    }
}

fn volume_kpi() -> Vec<KpiSpec> {
    vec![KpiSpec {
        name: "volume".into(),
        unit: "1".into(),
        kind: KpiKind::SumRate,
        signals: Vec::new(),
        tag: Some("power".into()),
        scale: 1.0,
        comfort: None,
        schedule: None,
    }]
}

fn tank_session(end: f64, step: f64, switches: &Switches) -> SessionManager {
    SessionManager::new(scenario(end, step), &volume_kpi(), Tank::boxed(switches)).unwrap()
}

fn valve(value: f64) -> SignalMap {
    SignalMap::from([("valve_u".to_owned(), value)])
}

#[tokio::test]
async fn advance_requires_reset() {
    let session = tank_session(600.0, 300.0, &Switches::default());
    assert_eq!(session.lifecycle(), Lifecycle::Uninitialized);
    assert_eq!(
        session.advance(SignalMap::new()).await.unwrap_err(),
        SessionError::NotReady
    );
}

#[tokio::test]
async fn steps_land_exactly_on_scenario_end() {
    let session = tank_session(600.0, 300.0, &Switches::default());
    let reset = session.reset(None).await.unwrap();
    assert_eq!(reset.time, 0.0);

    let first = session.advance(SignalMap::new()).await.unwrap();
    assert_eq!(first.time, 300.0);
    assert!(!first.end_of_scenario);
    let second = session.advance(SignalMap::new()).await.unwrap();
    assert_eq!(second.time, 600.0);
    assert!(second.end_of_scenario);

    assert_eq!(session.lifecycle(), Lifecycle::ScenarioEnded);
    assert_eq!(
        session.advance(SignalMap::new()).await.unwrap_err(),
        SessionError::ScenarioEnded
    );
    assert_eq!(session.results(TimeRange::default()).len(), 2);
}

#[tokio::test]
async fn final_step_is_truncated() {
    let session = tank_session(700.0, 300.0, &Switches::default());
    session.reset(None).await.unwrap();
    session.advance(SignalMap::new()).await.unwrap();
    session.advance(SignalMap::new()).await.unwrap();
    let last = session.advance(valve(2.0)).await.unwrap();
    assert_eq!(last.time, 700.0);
    assert!(last.end_of_scenario);
    // 300 + 300 at the default rate, then 100 s at 2/s.
    assert_eq!(last.outputs["level_y"], 800.0);
    assert_eq!(last.kpis["volume"], 800.0);
}

#[tokio::test]
async fn validation_happens_before_any_mutation() {
    let session = tank_session(3_600.0, 60.0, &Switches::default());
    session.reset(None).await.unwrap();
    session.advance(valve(1.0)).await.unwrap();
    let before = session.status();
    let kpis_before = session.kpis();

    let err = session.advance(valve(11.0)).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidInput {
            name: "valve_u".into(),
            reason: ValidationError::OutOfRange {
                value: 11.0,
                min: 0.0,
                max: 10.0
            }
        }
    );
    assert!(err.is_validation());

    let mut mixed = valve(5.0);
    mixed.insert("valve_activate".into(), 1.0);
    assert!(matches!(
        session.advance(mixed).await,
        Err(SessionError::InvalidInput {
            reason: ValidationError::UnknownSignal,
            ..
        })
    ));
    assert!(session.advance(valve(f64::NAN)).await.is_err());

    let after = session.status();
    assert_eq!(after.clock, before.clock);
    assert_eq!(after.result_rows, before.result_rows);
    assert_eq!(session.kpis(), kpis_before);
}

#[tokio::test]
async fn failed_model_step_commits_nothing() {
    let switches = Switches::default();
    let session = tank_session(3_600.0, 60.0, &switches);
    session.reset(None).await.unwrap();
    session.advance(valve(3.0)).await.unwrap();
    let before = session.status();
    let kpis_before = session.kpis();
    let measured = session.measurements();

    switches.fail_step.store(true, Ordering::SeqCst);
    let err = session.advance(valve(4.0)).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::ModelStep(AdapterError::Unit(UnitError::Solver(_)))
    ));
    assert_eq!(session.lifecycle(), Lifecycle::Ready);
    assert_eq!(session.status().clock, before.clock);
    assert_eq!(session.status().result_rows, before.result_rows);
    assert_eq!(session.kpis(), kpis_before);
    assert_eq!(session.measurements(), measured);

    switches.fail_step.store(false, Ordering::SeqCst);
    let recovered = session.advance(valve(4.0)).await.unwrap();
    assert_eq!(recovered.time, 120.0);
}

#[tokio::test]
async fn slow_model_step_times_out() {
    let switches = Switches::default();
    let mut config = scenario(600.0, 60.0);
    config.step_timeout = Duration::from_millis(20);
    let session = SessionManager::new(config, &volume_kpi(), Tank::boxed(&switches)).unwrap();
    session.reset(None).await.unwrap();

    switches.delay_ms.store(200, Ordering::SeqCst);
    let err = session.advance(SignalMap::new()).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::ModelStep(AdapterError::Timeout(Duration::from_millis(20)))
    );
    assert_eq!(session.status().result_rows, 0);
    assert_eq!(session.status().clock.current_time, 0.0);
}

#[tokio::test]
async fn timed_out_step_is_never_replayed() {
    let switches = Switches::default();
    let mut config = scenario(3_600.0, 60.0);
    config.step_timeout = Duration::from_millis(100);
    config.init_timeout = Duration::from_millis(100);
    let session = SessionManager::new(config, &volume_kpi(), Tank::boxed(&switches)).unwrap();
    session.reset(None).await.unwrap();

    switches.delay_ms.store(600, Ordering::SeqCst);
    assert_eq!(
        session.advance(valve(5.0)).await.unwrap_err(),
        SessionError::ModelStep(AdapterError::Timeout(Duration::from_millis(100)))
    );
    // The runaway step may have moved the unit, so advancing needs a fresh reset.
    assert_eq!(session.lifecycle(), Lifecycle::NeedsReset);
    assert_eq!(
        session.advance(valve(7.0)).await.unwrap_err(),
        SessionError::NotReady
    );
    assert_eq!(session.status().result_rows, 0);
    assert_eq!(session.status().clock.current_time, 0.0);

    // Queued behind the runaway step, this reset gives up before reaching the unit.
    assert!(matches!(
        session.reset(None).await,
        Err(SessionError::Reset(AdapterError::Timeout(_)))
    ));
    assert_eq!(session.lifecycle(), Lifecycle::Uninitialized);

    tokio::time::sleep(Duration::from_millis(800)).await;
    switches.delay_ms.store(0, Ordering::SeqCst);
    session.reset(None).await.unwrap();
    assert_eq!(session.lifecycle(), Lifecycle::Ready);

    let report = session.advance(SignalMap::new()).await.unwrap();
    assert_eq!(report.time, 60.0);
    assert_eq!(report.outputs["level_y"], 60.0);
    assert_eq!(session.status().result_rows, 1);
    // One runaway step plus one committed step; the abandoned reset never ran.
    assert_eq!(switches.steps.load(Ordering::SeqCst), 2);
    assert_eq!(switches.inits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reset_recovers_after_failed_step() {
    let switches = Switches::default();
    let session = tank_session(3_600.0, 60.0, &switches);
    session.reset(None).await.unwrap();
    session.advance(valve(3.0)).await.unwrap();

    switches.fail_step.store(true, Ordering::SeqCst);
    assert!(session.advance(SignalMap::new()).await.is_err());
    assert_eq!(session.lifecycle(), Lifecycle::Ready);

    switches.fail_step.store(false, Ordering::SeqCst);
    session.reset(None).await.unwrap();
    assert!(session.results(TimeRange::default()).is_empty());
    let report = session.advance(SignalMap::new()).await.unwrap();
    assert_eq!(report.time, 60.0);
    assert_eq!(report.outputs["level_y"], 60.0);
    assert_eq!(report.kpis["volume"], 60.0);
}

#[tokio::test]
async fn readers_see_committed_state_while_a_step_runs() {
    let switches = Switches::default();
    let session = Arc::new(tank_session(3_600.0, 60.0, &switches));
    session.reset(None).await.unwrap();
    session.advance(valve(2.0)).await.unwrap();
    let status = session.status();
    let kpis = session.kpis();
    let rows = session.results(TimeRange::default());
    let measured = session.measurements();

    switches.delay_ms.store(300, Ordering::SeqCst);
    let pending = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.advance(valve(4.0)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());
    assert_eq!(session.status().clock, status.clock);
    assert_eq!(session.kpis(), kpis);
    assert_eq!(session.results(TimeRange::default()), rows);
    assert_eq!(session.measurements(), measured);
    assert_eq!(session.get_step(), 60.0);

    let report = pending.await.unwrap().unwrap();
    assert_eq!(report.time, 120.0);
    assert_eq!(session.results(TimeRange::default()).len(), 2);
    assert_eq!(session.kpis()["volume"], 360.0);
    assert_eq!(session.measurements()["level_y"], 360.0);
}

#[tokio::test]
async fn reset_clears_results_and_kpis() {
    let session = tank_session(3_600.0, 60.0, &Switches::default());
    let first = session.reset(None).await.unwrap();
    for _ in 0..3 {
        session.advance(valve(2.0)).await.unwrap();
    }
    assert_eq!(session.kpis()["volume"], 360.0);

    let second = session.reset(Some(120.0)).await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(second.time, 0.0);
    assert!(session.results(TimeRange::default()).is_empty());
    assert_eq!(session.kpis()["volume"], 0.0);
    assert_eq!(session.get_step(), 120.0);
    assert_eq!(session.advance(SignalMap::new()).await.unwrap().time, 120.0);
}

#[tokio::test]
async fn invalid_reset_step_changes_nothing() {
    let session = tank_session(3_600.0, 60.0, &Switches::default());
    session.reset(None).await.unwrap();
    session.advance(SignalMap::new()).await.unwrap();
    let err = session.reset(Some(0.0)).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidStep(_)));
    assert_eq!(session.lifecycle(), Lifecycle::Ready);
    assert_eq!(session.status().result_rows, 1);
    assert!(session.set_step(-1.0).await.is_err());
    assert_eq!(session.set_step(30.0).await.unwrap(), 30.0);
    assert_eq!(session.advance(SignalMap::new()).await.unwrap().time, 90.0);
}

#[tokio::test]
async fn failed_reset_leaves_session_uninitialized() {
    let switches = Switches::default();
    let session = tank_session(3_600.0, 60.0, &switches);
    session.reset(None).await.unwrap();
    session.advance(SignalMap::new()).await.unwrap();

    switches.fail_init.store(true, Ordering::SeqCst);
    assert!(matches!(
        session.reset(None).await,
        Err(SessionError::Reset(AdapterError::Unit(
            UnitError::Initialization(_)
        )))
    ));
    let status = session.status();
    assert_eq!(status.lifecycle, Lifecycle::Uninitialized);
    assert!(status.session_id.is_none());
    assert_eq!(status.result_rows, 0);
    assert_eq!(
        session.advance(SignalMap::new()).await.unwrap_err(),
        SessionError::NotReady
    );

    switches.fail_init.store(false, Ordering::SeqCst);
    session.reset(None).await.unwrap();
    assert_eq!(session.lifecycle(), Lifecycle::Ready);
}

#[tokio::test]
async fn concurrent_advances_are_serialized() {
    let session = Arc::new(tank_session(3_600.0, 60.0, &Switches::default()));
    session.reset(None).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.advance(valve(i as f64)).await })
        })
        .collect();
    let reports = futures::future::join_all(handles).await;
    assert!(reports.into_iter().all(|r| matches!(r, Ok(Ok(_)))));

    let rows = session.results(TimeRange::default());
    let times: Vec<f64> = rows.iter().map(|row| row.time).collect();
    assert_eq!(
        times,
        vec![60.0, 120.0, 180.0, 240.0, 300.0, 360.0, 420.0, 480.0]
    );
    let applied: f64 = rows.iter().map(|row| row.values["valve_u"]).sum();
    assert_eq!(applied, 28.0);
    assert_eq!(session.kpis()["volume"], 28.0 * 60.0);
}

#[tokio::test]
async fn results_record_inputs_and_outputs() {
    let session = tank_session(3_600.0, 60.0, &Switches::default());
    session.reset(None).await.unwrap();
    session.advance(valve(2.0)).await.unwrap();
    session.advance(SignalMap::new()).await.unwrap();

    let rows = session.results(TimeRange::default());
    assert_eq!(rows[0].values.get("valve_u"), Some(&2.0));
    assert_eq!(rows[1].values.get("valve_u"), None);
    assert_eq!(rows[1].values["flow_y"], 1.0);

    let series = session.series("level_y", TimeRange::default()).unwrap();
    assert_eq!(series.time, vec![60.0, 120.0]);
    assert_eq!(series.values, vec![120.0, 180.0]);
    assert_eq!(
        session
            .series("valve_u", TimeRange { start: Some(100.0), end: None })
            .unwrap()
            .values,
        Vec::<f64>::new()
    );
    assert_eq!(
        session.series("ghost", TimeRange::default()).unwrap_err(),
        SessionError::UnknownSignal("ghost".into())
    );
}

fn reference_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scenario.end_time = 86_400.0;
    config.scenario.warmup_period = 3_600.0;
    config.scenario.step = 900.0;
    config
}

async fn run_reference(session: &SessionManager) -> Vec<r_bem_sim::KpiSnapshot> {
    session.reset(None).await.unwrap();
    let mut snapshots = Vec::new();
    let mut step = 0;
    loop {
        let inputs = if step % 4 == 0 {
            SignalMap::from([("oveTSetHea_u".to_owned(), 296.15)])
        } else {
            SignalMap::new()
        };
        let report = session.advance(inputs).await.unwrap();
        snapshots.push(report.kpis);
        step += 1;
        if report.end_of_scenario {
            return snapshots;
        }
    }
}

#[tokio::test]
async fn reference_runs_are_deterministic() {
    let config = reference_config();
    let a = SessionManager::from_config(&config).unwrap();
    let b = SessionManager::from_config(&config).unwrap();
    run_reference(&a).await;
    run_reference(&b).await;

    assert_eq!(
        a.results(TimeRange::default()),
        b.results(TimeRange::default())
    );
    let (ka, kb) = (a.kpis(), b.kpis());
    for (name, value) in &ka {
        if name != "time_rat" {
            assert_eq!(Some(value), kb.get(name), "kpi {name} diverged");
        }
    }
}

#[tokio::test]
async fn cumulative_kpis_never_decrease() {
    let session = SessionManager::from_config(&reference_config()).unwrap();
    let snapshots = run_reference(&session).await;
    assert_eq!(snapshots.len(), 92);
    let mut monotone: Vec<String> = session
        .kpi_records()
        .into_iter()
        .filter(|record| record.cumulative)
        .map(|record| record.name)
        .collect();
    assert_eq!(monotone, vec!["ener_tot", "tdis_tot", "pele_peak"]);
    // The shipped price schedules are non-negative.
    monotone.extend(["cost_tot".to_owned(), "emis_tot".to_owned()]);
    for name in &monotone {
        for pair in snapshots.windows(2) {
            assert!(pair[1][name.as_str()] >= pair[0][name.as_str()], "kpi {name} decreased");
        }
    }
    assert!(snapshots.last().unwrap()["ener_tot"] > 0.0);
}
