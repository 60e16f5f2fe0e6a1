//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tolerant comparison of simulated trajectories against references."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use r_bem_sim::ResultRow;
use serde::Serialize;
use tracing::warn;

/// Combined absolute plus relative error allowed at any sample.
pub const TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryCheck {
    pub passed: bool,
    pub error_max: Option<f64>,
    pub index_max: Option<usize>,
    pub message: Option<String>,
}

impl TrajectoryCheck {
    fn pass() -> Self {
        Self {
            passed: true,
            error_max: None,
            index_max: None,
            message: None,
        }
    }
}

/// Compare `test` against `reference` sample by sample.
///
/// The error at a sample is the absolute error plus, when the reference magnitude
/// exceeds ten times the tolerance, the relative error. The check fails if the lengths
/// differ or the largest error exceeds [`TOLERANCE`].
pub fn check_trajectory(test: &[f64], reference: &[f64]) -> TrajectoryCheck {
    if test.len() != reference.len() {
        return TrajectoryCheck {
            passed: false,
            error_max: None,
            index_max: None,
            message: Some(format!(
                "test and reference trajectory differ in length ({} vs {})",
                test.len(),
                reference.len()
            )),
        };
    }

    let mut worst: Option<(usize, f64)> = None;
    for (index, (actual, expected)) in test.iter().zip(reference).enumerate() {
        let absolute = (actual - expected).abs();
        let relative = if expected.abs() > 10.0 * TOLERANCE {
            absolute / expected.abs()
        } else {
            0.0
        };
        // NaN never compares greater, so treat it as the worst error outright.
        let error = if (absolute + relative).is_nan() {
            f64::INFINITY
        } else {
            absolute + relative
        };
        if worst.map_or(true, |(_, max)| error > max) {
            worst = Some((index, error));
        }
    }

    match worst {
        Some((index, error)) if error > TOLERANCE => TrajectoryCheck {
            passed: false,
            error_max: Some(error),
            index_max: Some(index),
            message: Some(format!(
                "max error ({error}) in trajectory greater than tolerance ({TOLERANCE}) at index {index}"
            )),
        },
        _ => TrajectoryCheck::pass(),
    }
}

/// Check every named signal of two result logs; returns the failing signals.
pub fn check_results(
    test: &[ResultRow],
    reference: &[ResultRow],
    signals: &[&str],
) -> Vec<(String, TrajectoryCheck)> {
    let mut failures = Vec::new();
    let times = check_trajectory(&column_time(test), &column_time(reference));
    if !times.passed {
        failures.push(("time".to_owned(), times));
    }
    for signal in signals {
        let check = check_trajectory(&column(test, signal), &column(reference, signal));
        if !check.passed {
            warn!(signal, message = ?check.message, "trajectory check failed");
            failures.push(((*signal).to_owned(), check));
        }
    }
    failures
}

fn column_time(rows: &[ResultRow]) -> Vec<f64> {
    rows.iter().map(|row| row.time).collect()
}

fn column(rows: &[ResultRow], signal: &str) -> Vec<f64> {
    rows.iter()
        .map(|row| row.values.get(signal).copied().unwrap_or(f64::NAN))
        .collect()
}
