//! Configuration-file parsing: the ambient `KEY = value` front-end.
//!
//! Spec.md section 6 lists the outer driver's configuration keys
//! (`DIMENSION`, `NUMBER_OF_CONSTRAINTS`, `CONSTRAINT_FUNCTION_NAMES`,
//! `OBJECTIVE_FUNCTION_NAME`, `NUMBER_OF_PARTITIONS`, plus per-function
//! executable/training-data/model-type/low-fi keys) without pinning a file
//! grammar; `original_source/src/drivers.hpp`'s `RoDeODriver` is the grounding
//! for the field set (`dimension`, `numberOfConstraints`, `objectiveFunctionName`,
//! `constraintNames`/`constraintTypes`, `executableNames`/`executablePaths`,
//! `boxConstraintsLowerBounds`/`UpperBounds`) and for the flat `KEY = value`
//! text format itself.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use nalgebra::DVector;

use crate::adapters::{ConstraintFunction, ObjectiveFunction};
use crate::bounds::Bounds;
use crate::design::{ConstraintDefinition, EvaluationMode, LowFidelity, ModelType, ObjectiveDefinition};
use crate::error::{config_ensure, Error, Result};
use crate::optimizer::{Optimizer, OptimizerConfig};

/// A parsed, validated `KEY = value` configuration file, ready to assemble
/// into an [`Optimizer`].
#[derive(Clone, Debug)]
pub struct Config {
    dimension: usize,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
    objective_name: String,
    constraint_names: Vec<String>,
    number_of_partitions: usize,
    max_number_of_iterations: usize,
    how_often_train_models: usize,
    raw: HashMap<String, String>,
}

fn parse_model_type(value: &str) -> Result<ModelType> {
    match value.trim() {
        "LINEAR_REGRESSION" => Ok(ModelType::LinearRegression),
        "ORDINARY_KRIGING" => Ok(ModelType::OrdinaryKriging),
        "UNIVERSAL_KRIGING" => Ok(ModelType::UniversalKriging),
        "AGGREGATION" => Ok(ModelType::Aggregation),
        "TANGENT" => Ok(ModelType::Tangent),
        "MULTI_LEVEL" => Ok(ModelType::MultiLevel),
        other => Err(Error::Config(format!("unknown MODEL value '{other}'"))),
    }
}

fn parse_evaluation_mode(value: &str) -> Result<EvaluationMode> {
    match value.trim() {
        "PRIMAL" => Ok(EvaluationMode::Primal),
        "TANGENT" => Ok(EvaluationMode::Tangent),
        "ADJOINT" => Ok(EvaluationMode::Adjoint),
        other => Err(Error::Config(format!("unknown EVALUATION_MODE value '{other}'"))),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn parse_csv_floats(key: &str, value: &str) -> Result<Vec<f64>> {
    split_csv(value)
        .iter()
        .map(|s| s.parse::<f64>().map_err(|e| Error::Config(format!("invalid numeric entry '{s}' in {key}: {e}"))))
        .collect()
}

impl Config {
    /// Parses `text` as newline-separated `KEY = value` pairs. Blank lines
    /// and lines starting with `#` are ignored, mirroring
    /// `original_source`'s driver config files.
    pub fn from_str(text: &str) -> Result<Self> {
        let mut raw = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (key, value) = trimmed
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("line {}: expected 'KEY = value', got '{trimmed}'", lineno + 1)))?;
            raw.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self::from_map(raw)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| Error::Io(format!("cannot read {}: {e}", path.as_ref().display())))?;
        Self::from_str(&text)
    }

    fn require<'a>(raw: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
        raw.get(key).map(String::as_str).ok_or_else(|| Error::Config(format!("missing required key '{key}'")))
    }

    fn optional_usize(raw: &HashMap<String, String>, key: &str, default: usize) -> Result<usize> {
        match raw.get(key) {
            None => Ok(default),
            Some(v) => v.parse::<usize>().map_err(|e| Error::Config(format!("invalid integer for '{key}': {e}"))),
        }
    }

    fn from_map(raw: HashMap<String, String>) -> Result<Self> {
        let dimension: usize = Self::require(&raw, "DIMENSION")?
            .parse()
            .map_err(|e| Error::Config(format!("invalid DIMENSION: {e}")))?;
        let lower_bounds = parse_csv_floats("LOWER_BOUNDS", Self::require(&raw, "LOWER_BOUNDS")?)?;
        let upper_bounds = parse_csv_floats("UPPER_BOUNDS", Self::require(&raw, "UPPER_BOUNDS")?)?;
        config_ensure!(
            lower_bounds.len() == dimension && upper_bounds.len() == dimension,
            "LOWER_BOUNDS/UPPER_BOUNDS must each have {dimension} entries, got {} and {}",
            lower_bounds.len(),
            upper_bounds.len()
        );

        let objective_name = Self::require(&raw, "OBJECTIVE_FUNCTION_NAME")?.to_string();

        let number_of_constraints: usize = Self::optional_usize(&raw, "NUMBER_OF_CONSTRAINTS", 0)?;
        let constraint_names = if number_of_constraints == 0 {
            Vec::new()
        } else {
            let names = split_csv(Self::require(&raw, "CONSTRAINT_FUNCTION_NAMES")?);
            config_ensure!(
                names.len() == number_of_constraints,
                "NUMBER_OF_CONSTRAINTS={number_of_constraints} but CONSTRAINT_FUNCTION_NAMES lists {}",
                names.len()
            );
            names
        };

        let number_of_partitions = Self::optional_usize(&raw, "NUMBER_OF_PARTITIONS", 4)?;
        let max_number_of_iterations = Self::optional_usize(&raw, "MAX_NUMBER_OF_ITERATIONS", 50)?;
        let how_often_train_models = Self::optional_usize(&raw, "HOW_OFTEN_TRAIN_MODELS", 5)?;

        Ok(Config {
            dimension,
            lower_bounds,
            upper_bounds,
            objective_name,
            constraint_names,
            number_of_partitions,
            max_number_of_iterations,
            how_often_train_models,
            raw,
        })
    }

    fn key(&self, function_name: &str, suffix: &str) -> String {
        format!("{function_name}_{suffix}")
    }

    fn require_function_key(&self, function_name: &str, suffix: &str) -> Result<String> {
        let key = self.key(function_name, suffix);
        self.raw.get(&key).cloned().ok_or_else(|| Error::Config(format!("missing required key '{key}'")))
    }

    fn optional_function_key(&self, function_name: &str, suffix: &str) -> Option<String> {
        self.raw.get(&self.key(function_name, suffix)).cloned()
    }

    fn low_fidelity(&self, function_name: &str) -> Result<Option<LowFidelity>> {
        let Some(executable_path) = self.optional_function_key(function_name, "EXECUTABLE_LOW_FI") else {
            return Ok(None);
        };
        Ok(Some(LowFidelity {
            executable_path,
            design_vector_filename: self.require_function_key(function_name, "DESIGN_VECTOR_FILE_LOW_FI")?,
            output_filename: self.require_function_key(function_name, "OUTPUT_FILE_LOW_FI")?,
            training_data_filename: self.require_function_key(function_name, "TRAINING_DATA_LOW_FI")?,
        }))
    }

    fn evaluation_mode(&self, function_name: &str) -> Result<EvaluationMode> {
        match self.optional_function_key(function_name, "EVALUATION_MODE") {
            Some(v) => parse_evaluation_mode(&v),
            None => Ok(EvaluationMode::Primal),
        }
    }

    fn objective_definition(&self) -> Result<ObjectiveDefinition> {
        let name = self.objective_name.clone();
        Ok(ObjectiveDefinition {
            executable_path: self.require_function_key(&name, "EXECUTABLE")?,
            design_vector_filename: self.require_function_key(&name, "DESIGN_VECTOR_FILE")?,
            output_filename: self.require_function_key(&name, "OUTPUT_FILE")?,
            training_data_filename: self.require_function_key(&name, "TRAINING_DATA")?,
            model_type: parse_model_type(&self.require_function_key(&name, "MODEL")?)?,
            evaluation_mode: self.evaluation_mode(&name)?,
            low_fidelity: self.low_fidelity(&name)?,
            name,
        })
    }

    fn constraint_definition(&self, id: usize, name: &str) -> Result<ConstraintDefinition> {
        let definition_string = self.require_function_key(name, "DEFINITION")?;
        let (parsed_name, inequality, threshold) = ConstraintDefinition::parse_inequality(&definition_string)?;
        Ok(ConstraintDefinition {
            name: parsed_name,
            id,
            inequality,
            threshold,
            executable_path: self.require_function_key(name, "EXECUTABLE")?,
            design_vector_filename: self.require_function_key(name, "DESIGN_VECTOR_FILE")?,
            output_filename: self.require_function_key(name, "OUTPUT_FILE")?,
            training_data_filename: self.require_function_key(name, "TRAINING_DATA")?,
            model_type: parse_model_type(&self.require_function_key(name, "MODEL")?)?,
            evaluation_mode: self.evaluation_mode(name)?,
            low_fidelity: self.low_fidelity(name)?,
        })
    }

    fn bounds(&self) -> Result<Bounds> {
        Bounds::new(DVector::from_vec(self.lower_bounds.clone()), DVector::from_vec(self.upper_bounds.clone()))
    }

    /// Assembles the fully-wired [`Optimizer`], ready for
    /// [`Optimizer::initialize_with_doe`] followed by [`Optimizer::run`].
    pub fn build_optimizer(&self) -> Result<Optimizer> {
        let bounds = self.bounds()?;
        let objective = ObjectiveFunction::new(self.objective_definition()?, self.dimension, bounds.clone());
        let mut constraints = Vec::with_capacity(self.constraint_names.len());
        for (id, name) in self.constraint_names.iter().enumerate() {
            let definition = self.constraint_definition(id, name)?;
            constraints.push(ConstraintFunction::new(definition, self.dimension, bounds.clone()));
        }

        let mut optimizer_config = OptimizerConfig::default();
        optimizer_config.max_number_of_iterations = self.max_number_of_iterations;
        optimizer_config.how_often_train_models = self.how_often_train_models;

        Ok(Optimizer::new(bounds, objective, constraints, optimizer_config))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn number_of_partitions(&self) -> usize {
        self.number_of_partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config_text() -> &'static str {
        "\
DIMENSION = 2
LOWER_BOUNDS = -6, -6
UPPER_BOUNDS = 6, 6
OBJECTIVE_FUNCTION_NAME = himmelblau
NUMBER_OF_CONSTRAINTS = 1
CONSTRAINT_FUNCTION_NAMES = g1
NUMBER_OF_PARTITIONS = 4

himmelblau_EXECUTABLE = ./himmelblau.exe
himmelblau_DESIGN_VECTOR_FILE = dv.dat
himmelblau_OUTPUT_FILE = out.dat
himmelblau_TRAINING_DATA = himmelblau_data.csv
himmelblau_MODEL = ORDINARY_KRIGING

g1_DEFINITION = g1 < 10
g1_EXECUTABLE = ./g1.exe
g1_DESIGN_VECTOR_FILE = dv_g1.dat
g1_OUTPUT_FILE = out_g1.dat
g1_TRAINING_DATA = g1_data.csv
g1_MODEL = ORDINARY_KRIGING
"
    }

    #[test]
    fn parses_a_full_configuration() {
        let config = Config::from_str(sample_config_text()).unwrap();
        assert_eq!(config.dimension(), 2);
        assert_eq!(config.number_of_partitions(), 4);
        assert_eq!(config.constraint_names, vec!["g1".to_string()]);
    }

    #[test]
    fn builds_an_optimizer_from_configuration() {
        let config = Config::from_str(sample_config_text()).unwrap();
        let optimizer = config.build_optimizer().unwrap();
        assert_eq!(optimizer.iteration(), 0);
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let text = "DIMENSION = 2\n";
        assert!(Config::from_str(text).is_err());
    }

    #[test]
    fn mismatched_bounds_length_is_rejected() {
        let text = "\
DIMENSION = 2
LOWER_BOUNDS = -6
UPPER_BOUNDS = 6, 6
OBJECTIVE_FUNCTION_NAME = obj
obj_EXECUTABLE = ./obj
obj_DESIGN_VECTOR_FILE = dv.dat
obj_OUTPUT_FILE = out.dat
obj_TRAINING_DATA = data.csv
obj_MODEL = ORDINARY_KRIGING
";
        assert!(Config::from_str(text).is_err());
    }
}
