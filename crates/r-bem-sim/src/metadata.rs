//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Signal exchange metadata declared by emulation units."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Signal exchange metadata. A model exposes *overwrite* blocks, each turning into a
//! value input plus a boolean activation flag, and *read* blocks, each turning into an
//! observable output. Variable names are derived from the block instance path.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Static description of a model's signal exchange blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    #[serde(default)]
    pub overwrite: Vec<OverwriteBlock>,
    #[serde(default)]
    pub read: Vec<ReadBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverwriteBlock {
    pub instance: String,
    #[serde(default)]
    pub unit: String,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadBlock {
    pub instance: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    /// KPI tags this measurement contributes to, e.g. `power` or `comfort`.
    #[serde(default)]
    pub kpis: Vec<String>,
}

/// Role of a variable derived from a block instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableStyle {
    InputSignal,
    InputActivate,
    Output,
}

/// Derive the exchanged variable name for a block instance path.
pub fn variable_name(instance: &str, style: VariableStyle) -> String {
    let base = instance.replace('.', "_");
    match style {
        VariableStyle::InputSignal => format!("{base}_u"),
        VariableStyle::InputActivate => format!("{base}_activate"),
        VariableStyle::Output => format!("{base}_y"),
    }
}

impl ModelMetadata {
    /// Load metadata from a JSON or YAML document.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("unable to read model metadata {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("invalid model metadata {}", path.display()))
    }

    /// Parse a metadata document; JSON is detected by a leading brace.
    pub fn parse(data: &str) -> Result<Self> {
        let metadata = if data.trim_start().starts_with('{') {
            serde_json::from_str(data)?
        } else {
            serde_yaml::from_str(data)?
        };
        Ok(metadata)
    }
}
