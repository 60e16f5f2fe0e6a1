//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Append-only time-series log of applied inputs and observed outputs."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::io::Write;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};

use crate::adapter::SignalMap;
use crate::errors::ResultsError;

/// One committed step: the step's end timestamp and every applied input and observed
/// output keyed by signal name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRow {
    pub time: f64,
    pub values: SignalMap,
}

/// Single signal trajectory, as returned for per-signal queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    pub time: Vec<f64>,
    pub values: Vec<f64>,
}

/// Inclusive time window; open bounds select everything on that side.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeRange {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

impl TimeRange {
    pub fn contains(&self, time: f64) -> bool {
        self.start.map_or(true, |start| time >= start) && self.end.map_or(true, |end| time <= end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultsStore {
    rows: Vec<ResultRow>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that a row stamped `time` may be appended next.
    pub fn check_next(&self, time: f64) -> Result<(), ResultsError> {
        match self.rows.last() {
            Some(last) if time <= last.time => Err(ResultsError::NonMonotonic {
                last: last.time,
                next: time,
            }),
            _ => Ok(()),
        }
    }

    pub fn append(&mut self, row: ResultRow) -> Result<(), ResultsError> {
        self.check_next(row.time)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn range(&self, range: TimeRange) -> Vec<ResultRow> {
        self.rows
            .iter()
            .filter(|row| range.contains(row.time))
            .cloned()
            .collect()
    }

    /// Trajectory of one signal; steps that did not record it are skipped.
    pub fn series(&self, signal: &str, range: TimeRange) -> TimeSeries {
        let mut series = TimeSeries::default();
        for row in self.rows.iter().filter(|row| range.contains(row.time)) {
            if let Some(value) = row.values.get(signal) {
                series.time.push(row.time);
                series.values.push(*value);
            }
        }
        series
    }

    /// Write every row as CSV with a `time` column followed by signals in name order.
    /// Signals missing from a row are left empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let columns: BTreeSet<&str> = self
            .rows
            .iter()
            .flat_map(|row| row.values.keys().map(String::as_str))
            .collect();
        let mut csv = WriterBuilder::new().from_writer(writer);
        let mut header = vec!["time"];
        header.extend(columns.iter().copied());
        csv.write_record(&header)
            .context("failed to write results header")?;
        for row in &self.rows {
            let mut record = Vec::with_capacity(header.len());
            record.push(row.time.to_string());
            for column in &columns {
                record.push(
                    row.values
                        .get(*column)
                        .map(|value| value.to_string())
                        .unwrap_or_default(),
                );
            }
            csv.write_record(&record)
                .with_context(|| format!("failed to write results row at {}", row.time))?;
        }
        csv.flush().context("failed to flush results csv")?;
        Ok(())
    }
}
