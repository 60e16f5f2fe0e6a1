//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Scenario and reference-series fixtures for integration tests."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use r_bem_common::AppConfig;
use r_bem_sim::TimeSeries;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct ReferenceRecord {
    time: f64,
    value: f64,
}

/// Default configuration narrowed to `[0, end]` with the given step and no warmup.
pub fn short_scenario(end: f64, step: f64) -> AppConfig {
    let mut config = AppConfig::default();
    config.scenario.start_time = 0.0;
    config.scenario.warmup_period = 0.0;
    config.scenario.end_time = end;
    config.scenario.step = step;
    config
}

/// Store a reference trajectory as `time,value` CSV.
pub fn write_reference(path: impl AsRef<Path>, series: &TimeSeries) -> Result<()> {
    let path = path.as_ref();
    if series.time.len() != series.values.len() {
        return Err(anyhow!(
            "reference series has {} timestamps but {} values",
            series.time.len(),
            series.values.len()
        ));
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create reference file {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    for (time, value) in series.time.iter().zip(&series.values) {
        writer
            .serialize(ReferenceRecord {
                time: *time,
                value: *value,
            })
            .with_context(|| format!("failed to write reference row to {}", path.display()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_reference(path: impl AsRef<Path>) -> Result<TimeSeries> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to open reference file {}", path.display()))?;
    let mut series = TimeSeries::default();
    for record in reader.deserialize::<ReferenceRecord>() {
        let record =
            record.with_context(|| format!("malformed reference row in {}", path.display()))?;
        series.time.push(record.time);
        series.values.push(record.value);
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_series_survive_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TRooAir_y.csv");
        let series = TimeSeries {
            time: vec![3_600.0, 7_200.0],
            values: vec![293.15, 293.4],
        };
        write_reference(&path, &series).unwrap();
        assert_eq!(read_reference(&path).unwrap(), series);
    }

    #[test]
    fn rejects_ragged_series_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let ragged = TimeSeries {
            time: vec![1.0],
            values: Vec::new(),
        };
        assert!(write_reference(dir.path().join("x.csv"), &ragged).is_err());
        assert!(read_reference(dir.path().join("absent.csv")).is_err());
    }

    #[test]
    fn short_scenario_is_valid() {
        let config = short_scenario(7_200.0, 900.0);
        config.validate().unwrap();
        assert_eq!(config.scenario.warmup_end(), 0.0);
    }
}
