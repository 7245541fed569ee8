//! The `Design` record and the objective/constraint definitions that
//! describe how to produce one.
//!
//! Grounded on `original_source/src/constraint_functions.cpp`
//! (`ConstraintDefinition::setDefinition`, `ConstraintFunction::setParametersByDefinition`)
//! for the exact field set, and spec.md section 3 for the `Design` layout.

use nalgebra::DVector;

use crate::error::{Error, Result};

/// `<` or `>`, replacing the original's string-based inequality direction
/// (spec.md section 9, "Design Notes").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "rodeo_serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InequalityDirection {
    LessThan,
    GreaterThan,
}

impl InequalityDirection {
    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol.trim() {
            "<" => Ok(InequalityDirection::LessThan),
            ">" => Ok(InequalityDirection::GreaterThan),
            other => Err(Error::Config(format!("unknown inequality direction '{other}', expected '<' or '>'"))),
        }
    }

    /// `true` if `value` satisfies this inequality against `threshold`.
    pub fn is_satisfied(self, value: f64, threshold: f64) -> bool {
        match self {
            InequalityDirection::LessThan => value < threshold,
            InequalityDirection::GreaterThan => value > threshold,
        }
    }
}

/// The evaluation mode a `Design` is produced under, mirroring spec.md
/// section 4.7's three `readOutput` variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationMode {
    /// one number: the value.
    Primal,
    /// two numbers: value and one directional derivative.
    Tangent,
    /// `1+d` numbers: value and the full gradient.
    Adjoint,
}

/// The low-fidelity counterpart of an objective/constraint definition, used
/// by the multi-level model (spec.md section 4.6). Always optional, never a
/// separate definition variant — confirmed by
/// `ConstraintFunction::setParametersByDefinition` in original_source, which
/// copies `executableNameLowFi`/`modelLowFi`/`pathLowFi`/
/// `nameLowFidelityTrainingData`/`outputFilenameLowFi` unconditionally.
#[derive(Clone, Debug)]
pub struct LowFidelity {
    pub executable_path: String,
    pub design_vector_filename: String,
    pub output_filename: String,
    pub training_data_filename: String,
}

/// Which surrogate family backs a function's model, per spec.md's `modelType` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelType {
    LinearRegression,
    OrdinaryKriging,
    UniversalKriging,
    Aggregation,
    Tangent,
    MultiLevel,
}

/// Everything needed to build and drive an objective function's adapter.
#[derive(Clone, Debug)]
pub struct ObjectiveDefinition {
    pub name: String,
    pub executable_path: String,
    pub design_vector_filename: String,
    pub output_filename: String,
    pub training_data_filename: String,
    pub model_type: ModelType,
    pub evaluation_mode: EvaluationMode,
    pub low_fidelity: Option<LowFidelity>,
}

/// Everything needed to build and drive one constraint's adapter.
#[derive(Clone, Debug)]
pub struct ConstraintDefinition {
    pub name: String,
    pub id: usize,
    pub inequality: InequalityDirection,
    pub threshold: f64,
    pub executable_path: String,
    pub design_vector_filename: String,
    pub output_filename: String,
    pub training_data_filename: String,
    pub model_type: ModelType,
    pub evaluation_mode: EvaluationMode,
    pub low_fidelity: Option<LowFidelity>,
}

impl ConstraintDefinition {
    /// Parses a definition string like `"g1 < 10"` into `(name, direction,
    /// threshold)`, the remaining fields left to the caller — mirrors
    /// `ConstraintDefinition::setDefinition` in original_source, which scans
    /// for whichever of `<`/`>` appears first.
    pub fn parse_inequality(definition: &str) -> Result<(String, InequalityDirection, f64)> {
        let lt = definition.find('<');
        let gt = definition.find('>');
        let place = match (lt, gt) {
            (Some(l), Some(g)) => l.min(g),
            (Some(l), None) => l,
            (None, Some(g)) => g,
            (None, None) => {
                return Err(Error::Config(format!("constraint definition '{definition}' has no '<' or '>'")));
            }
        };
        let name = definition[..place].trim().to_string();
        let symbol = &definition[place..place + 1];
        let value_str = definition[place + 1..].trim();
        let direction = InequalityDirection::parse(symbol)?;
        let value = value_str
            .parse::<f64>()
            .map_err(|e| Error::Config(format!("invalid threshold '{value_str}' in '{definition}': {e}")))?;
        Ok((name, direction, value))
    }
}

/// One input/output record produced by a simulator call. Immutable once the
/// evaluator and training-data append have both run.
#[derive(Clone, Debug)]
pub struct Design {
    /// Decision variable, natural (denormalized) scale.
    pub design_parameters: DVector<f64>,

    /// Objective value (primal).
    pub true_value: Option<f64>,
    /// Direction used for a directional-derivative evaluation.
    pub tangent_direction: Option<DVector<f64>>,
    /// The directional derivative of the objective along `tangent_direction`.
    pub tangent_value: Option<f64>,
    /// Adjoint-mode gradient of the objective.
    pub gradient: Option<DVector<f64>>,
    /// The objective's low-fidelity counterpart value at this design, present
    /// only when the objective's definition carries a `LowFidelity`
    /// (spec.md section 4.6, multi-level model).
    pub low_fidelity_value: Option<f64>,

    /// One value per constraint.
    pub constraint_true_values: Vec<f64>,
    /// One gradient per constraint (adjoint mode).
    pub constraint_gradients: Vec<DVector<f64>>,
    /// One directional derivative per constraint (tangent mode).
    pub constraint_tangent: Vec<f64>,
    /// One differentiation direction per constraint (rows), tangent mode.
    pub constraint_differentiation_directions: Option<DVector<f64>>,
    /// One low-fidelity value per constraint, `None` where that constraint
    /// has no `LowFidelity` counterpart (spec.md section 4.6).
    pub constraint_low_fidelity_values: Vec<Option<f64>>,

    /// `max(0, incumbent_before_this_design - true_value)`; see
    /// DESIGN.md for the resolution of spec.md's "improvementValue" open question.
    pub improvement_value: f64,
    /// Derived from constraint values and each constraint's inequality direction.
    pub is_feasible: bool,
}

impl Design {
    /// A bare design holding only the (denormalized) decision variable;
    /// everything else is filled in by the evaluator.
    pub fn new(design_parameters: DVector<f64>) -> Self {
        Design {
            design_parameters,
            true_value: None,
            tangent_direction: None,
            tangent_value: None,
            gradient: None,
            low_fidelity_value: None,
            constraint_true_values: Vec::new(),
            constraint_gradients: Vec::new(),
            constraint_tangent: Vec::new(),
            constraint_differentiation_directions: None,
            constraint_low_fidelity_values: Vec::new(),
            improvement_value: 0.0,
            is_feasible: true,
        }
    }

    /// Derives `is_feasible` from `constraint_true_values` against `definitions`.
    pub fn update_feasibility(&mut self, definitions: &[ConstraintDefinition]) {
        self.is_feasible = self
            .constraint_true_values
            .iter()
            .zip(definitions.iter())
            .all(|(&v, def)| def.inequality.is_satisfied(v, def.threshold));
    }
}
