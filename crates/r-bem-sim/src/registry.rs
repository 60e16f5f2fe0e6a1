//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Static registry of controllable inputs and observable outputs."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::errors::{RegistryError, ValidationError};
use crate::metadata::{variable_name, ModelMetadata, VariableStyle};

/// Controllable input channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InputSignal {
    pub name: String,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub activation: String,
    pub description: String,
}

/// Observable measurement channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutputSignal {
    pub name: String,
    pub unit: String,
    pub description: String,
    pub kpis: Vec<String>,
}

/// Read-only catalogue of a model's signals, built once per model load.
#[derive(Debug, Clone)]
pub struct SignalRegistry {
    inputs: IndexMap<String, InputSignal>,
    outputs: IndexMap<String, OutputSignal>,
    kpi_groups: IndexMap<String, Vec<String>>,
}

impl SignalRegistry {
    pub fn from_metadata(metadata: &ModelMetadata) -> Result<Self, RegistryError> {
        let mut names = HashSet::new();
        let mut claim = |name: &str| {
            if names.insert(name.to_owned()) {
                Ok(())
            } else {
                Err(RegistryError::DuplicateSignal(name.to_owned()))
            }
        };

        let mut inputs = IndexMap::new();
        for (index, block) in metadata.overwrite.iter().enumerate() {
            if block.instance.trim().is_empty() {
                return Err(RegistryError::EmptyInstance(index));
            }
            let name = variable_name(&block.instance, VariableStyle::InputSignal);
            let activation = variable_name(&block.instance, VariableStyle::InputActivate);
            if !block.min.is_finite() || !block.max.is_finite() || block.min > block.max {
                return Err(RegistryError::InvalidBounds {
                    name,
                    min: block.min,
                    max: block.max,
                });
            }
            claim(&name)?;
            claim(&activation)?;
            inputs.insert(
                name.clone(),
                InputSignal {
                    name,
                    unit: block.unit.clone(),
                    min: block.min,
                    max: block.max,
                    activation,
                    description: block.description.clone(),
                },
            );
        }

        let mut outputs = IndexMap::new();
        let mut kpi_groups: IndexMap<String, Vec<String>> = IndexMap::new();
        for (index, block) in metadata.read.iter().enumerate() {
            if block.instance.trim().is_empty() {
                return Err(RegistryError::EmptyInstance(metadata.overwrite.len() + index));
            }
            let name = variable_name(&block.instance, VariableStyle::Output);
            claim(&name)?;
            for tag in block.kpis.iter().filter(|tag| !tag.trim().is_empty()) {
                kpi_groups
                    .entry(tag.trim().to_owned())
                    .or_default()
                    .push(name.clone());
            }
            outputs.insert(
                name.clone(),
                OutputSignal {
                    name,
                    unit: block.unit.clone(),
                    description: block.description.clone(),
                    kpis: block.kpis.clone(),
                },
            );
        }
        if outputs.is_empty() {
            return Err(RegistryError::NoOutputs);
        }

        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            kpi_groups = kpi_groups.len(),
            "signal registry loaded"
        );
        Ok(Self {
            inputs,
            outputs,
            kpi_groups,
        })
    }

    pub fn list_inputs(&self) -> impl Iterator<Item = &InputSignal> {
        self.inputs.values()
    }

    pub fn list_outputs(&self) -> impl Iterator<Item = &OutputSignal> {
        self.outputs.values()
    }

    pub fn input(&self, name: &str) -> Option<&InputSignal> {
        self.inputs.get(name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.keys().cloned().collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.keys().cloned().collect()
    }

    /// Outputs tagged with a KPI label, in declaration order.
    pub fn kpi_group(&self, tag: &str) -> Option<&[String]> {
        self.kpi_groups.get(tag).map(Vec::as_slice)
    }

    pub fn kpi_groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.kpi_groups
            .iter()
            .map(|(tag, members)| (tag.as_str(), members.as_slice()))
    }

    pub fn validate_input(&self, name: &str, value: f64) -> Result<(), ValidationError> {
        let signal = self.inputs.get(name).ok_or(ValidationError::UnknownSignal)?;
        if !value.is_finite() {
            return Err(ValidationError::NonFinite);
        }
        if value < signal.min || value > signal.max {
            return Err(ValidationError::OutOfRange {
                value,
                min: signal.min,
                max: signal.max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{OverwriteBlock, ReadBlock};

    fn metadata() -> ModelMetadata {
        ModelMetadata {
            overwrite: vec![OverwriteBlock {
                instance: "hvac.oveHeaPow".into(),
                unit: "W".into(),
                min: 0.0,
                max: 5_000.0,
                description: "heating power".into(),
            }],
            read: vec![
                ReadBlock {
                    instance: "TRooAir".into(),
                    unit: "K".into(),
                    description: String::new(),
                    kpis: vec!["comfort".into()],
                },
                ReadBlock {
                    instance: "PHea".into(),
                    unit: "W".into(),
                    description: String::new(),
                    kpis: vec!["power".into()],
                },
            ],
        }
    }

    #[test]
    fn builds_ordered_catalogue() {
        let registry = SignalRegistry::from_metadata(&metadata()).unwrap();
        let input = registry.input("hvac_oveHeaPow_u").unwrap();
        assert_eq!(input.activation, "hvac_oveHeaPow_activate");
        assert_eq!(registry.output_names(), vec!["TRooAir_y", "PHea_y"]);
        assert_eq!(registry.kpi_group("power").unwrap(), ["PHea_y".to_owned()]);
        assert!(registry.kpi_group("cost").is_none());
    }

    #[test]
    fn validates_bounds_and_names() {
        let registry = SignalRegistry::from_metadata(&metadata()).unwrap();
        assert!(registry.validate_input("hvac_oveHeaPow_u", 2_500.0).is_ok());
        assert!(registry.validate_input("hvac_oveHeaPow_u", 5_000.0).is_ok());
        assert_eq!(
            registry.validate_input("hvac_oveHeaPow_u", 5_001.0),
            Err(ValidationError::OutOfRange {
                value: 5_001.0,
                min: 0.0,
                max: 5_000.0
            })
        );
        assert_eq!(
            registry.validate_input("hvac_oveHeaPow_u", f64::NAN),
            Err(ValidationError::NonFinite)
        );
        assert_eq!(
            registry.validate_input("hvac_oveHeaPow_activate", 1.0),
            Err(ValidationError::UnknownSignal)
        );
        assert_eq!(
            registry.validate_input("TRooAir_y", 290.0),
            Err(ValidationError::UnknownSignal)
        );
    }

    #[test]
    fn rejects_duplicates_and_bad_bounds() {
        let mut duplicated = metadata();
        duplicated.read.push(duplicated.read[0].clone());
        assert_eq!(
            SignalRegistry::from_metadata(&duplicated).unwrap_err(),
            RegistryError::DuplicateSignal("TRooAir_y".into())
        );

        let mut inverted = metadata();
        inverted.overwrite[0].min = 10.0;
        inverted.overwrite[0].max = 1.0;
        assert!(matches!(
            SignalRegistry::from_metadata(&inverted),
            Err(RegistryError::InvalidBounds { .. })
        ));

        let mut unnamed = metadata();
        unnamed.read[1].instance = "  ".into();
        assert_eq!(
            SignalRegistry::from_metadata(&unnamed).unwrap_err(),
            RegistryError::EmptyInstance(2)
        );

        let no_outputs = ModelMetadata {
            overwrite: Vec::new(),
            read: Vec::new(),
        };
        assert_eq!(
            SignalRegistry::from_metadata(&no_outputs).unwrap_err(),
            RegistryError::NoOutputs
        );
    }
}
