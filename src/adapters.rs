//! Objective/Constraint adapters.
//!
//! Spec.md section 4.7: each adapter owns one surrogate model selected by its
//! definition's model type, plus the evaluator/IO contract
//! (`writeDesignVector`, `invokeEvaluator`, `readOutput`, composed as
//! `evaluateDesign`). `SurrogateHandle` is the "tagged variant of concrete
//! models" spec.md section 9's Design Notes calls for, replacing the
//! original's deep inheritance — `add_sample` and the `Surrogate` capability
//! set are dispatched through one `match` per handle rather than through a
//! shared base class.

use nalgebra::DVector;

use crate::acquisition::{finite_difference_gradient, GradientSurrogate};
use crate::aggregation::AggregationModel;
use crate::bounds::Bounds;
use crate::design::{ConstraintDefinition, Design, EvaluationMode, LowFidelity, ModelType, ObjectiveDefinition};
use crate::error::{Error, Result};
use crate::evaluator::{apply_evaluation, random_unit_direction, Evaluator, ProcessEvaluator};
use crate::kriging::KrigingModel;
use crate::linear_model::LinearSurrogate;
use crate::multi_level::MultiLevelModel;
use crate::surrogate::Surrogate;
use crate::tangent::TangentModel;

/// Finite-difference half-step used for surrogates without a closed-form gradient.
const GRADIENT_STEP: f64 = 1e-5;

/// The tagged variant of concrete surrogate models an adapter binds to,
/// selected by `ModelType`.
pub enum SurrogateHandle {
    Linear(LinearSurrogate),
    Kriging(KrigingModel),
    Aggregation(AggregationModel),
    Tangent(TangentModel),
    MultiLevel(MultiLevelModel),
}

impl SurrogateHandle {
    /// Constructs the handle matching `model_type` (spec.md section 4.7,
    /// `bindSurrogateModel`).
    pub fn new(model_type: ModelType, dimension: usize, bounds: Bounds) -> Self {
        match model_type {
            ModelType::LinearRegression => SurrogateHandle::Linear(LinearSurrogate::new(dimension, bounds)),
            ModelType::OrdinaryKriging => SurrogateHandle::Kriging(KrigingModel::new(dimension, bounds, false)),
            ModelType::UniversalKriging => SurrogateHandle::Kriging(KrigingModel::new(dimension, bounds, true)),
            ModelType::Aggregation => SurrogateHandle::Aggregation(AggregationModel::new(dimension, bounds)),
            ModelType::Tangent => SurrogateHandle::Tangent(TangentModel::new(dimension, bounds)),
            ModelType::MultiLevel => SurrogateHandle::MultiLevel(MultiLevelModel::new(dimension, bounds)),
        }
    }

    fn as_surrogate(&self) -> &dyn Surrogate {
        match self {
            SurrogateHandle::Linear(m) => m,
            SurrogateHandle::Kriging(m) => m,
            SurrogateHandle::Aggregation(m) => m,
            SurrogateHandle::Tangent(m) => m,
            SurrogateHandle::MultiLevel(m) => m,
        }
    }

    fn as_surrogate_mut(&mut self) -> &mut dyn Surrogate {
        match self {
            SurrogateHandle::Linear(m) => m,
            SurrogateHandle::Kriging(m) => m,
            SurrogateHandle::Aggregation(m) => m,
            SurrogateHandle::Tangent(m) => m,
            SurrogateHandle::MultiLevel(m) => m,
        }
    }

    pub fn train(&mut self) -> Result<()> {
        self.as_surrogate_mut().train()
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.as_surrogate_mut().refresh()
    }

    /// Gradient of the predicted mean and of the predicted *variance*
    /// w.r.t. the design vector, analytic for `Kriging` (spec.md section
    /// 4.9 step 4) and central finite differences for every other handle.
    pub fn mean_and_variance_gradient(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DVector<f64>)> {
        match self {
            SurrogateHandle::Kriging(m) => Ok((GradientSurrogate::mean_gradient(m, x)?, GradientSurrogate::variance_gradient(m, x)?)),
            other => {
                let surrogate = other.as_surrogate();
                let mean_grad = finite_difference_gradient(|xx| surrogate.predict(xx), x, GRADIENT_STEP)?;
                let variance_grad = finite_difference_gradient(|xx| Ok(surrogate.predict_with_variance(xx)?.1), x, GRADIENT_STEP)?;
                Ok((mean_grad, variance_grad))
            }
        }
    }

    pub fn interpolate(&self, x: &DVector<f64>) -> Result<f64> {
        self.as_surrogate().predict(x)
    }

    pub fn interpolate_with_variance(&self, x: &DVector<f64>) -> Result<(f64, f64)> {
        self.as_surrogate().predict_with_variance(x)
    }

    pub fn is_initialized(&self) -> bool {
        self.as_surrogate().is_initialized()
    }

    pub fn num_samples(&self) -> usize {
        self.as_surrogate().num_samples()
    }

    pub fn y_min(&self) -> Option<f64> {
        self.as_surrogate().y_min()
    }

    /// Appends a Design's outputs to the bound surrogate's training set,
    /// dispatching on which fields the model's schema needs (spec.md section
    /// 4.7, `addDesignToData`). `low_fidelity_value`, when present, is this
    /// design's low-fidelity counterpart reading (spec.md section 4.6).
    fn add_design(&mut self, x: DVector<f64>, design: &Design, output_index: Option<usize>, low_fidelity_value: Option<f64>) -> Result<()> {
        let value = match output_index {
            None => design.true_value.ok_or_else(|| Error::ModelBind("design has no objective value to ingest".into()))?,
            Some(i) => *design
                .constraint_true_values
                .get(i)
                .ok_or_else(|| Error::ModelBind(format!("design has no value for constraint {i}")))?,
        };
        match self {
            SurrogateHandle::Linear(m) => {
                m.add_sample(x, value)?;
            }
            SurrogateHandle::Kriging(m) => {
                m.add_sample(x, value)?;
            }
            SurrogateHandle::Aggregation(m) => {
                let gradient = match output_index {
                    None => design.gradient.clone(),
                    Some(i) => design.constraint_gradients.get(i).cloned(),
                };
                let gradient = gradient.ok_or_else(|| Error::ModelBind("aggregation model requires an adjoint gradient".into()))?;
                m.add_sample(x, value, gradient)?;
            }
            SurrogateHandle::Tangent(m) => {
                let direction = design.tangent_direction.clone().ok_or_else(|| Error::ModelBind("tangent model requires a direction".into()))?;
                let derivative = match output_index {
                    None => design.tangent_value,
                    Some(i) => design.constraint_tangent.get(i).copied(),
                };
                let derivative = derivative.ok_or_else(|| Error::ModelBind("tangent model requires a directional derivative".into()))?;
                m.add_sample(x, value, direction, derivative)?;
            }
            SurrogateHandle::MultiLevel(m) => {
                if let Some(lf_value) = low_fidelity_value {
                    m.add_low_fidelity_sample(x.clone(), lf_value)?;
                }
                m.add_high_fidelity_sample(x, value)?;
            }
        }
        Ok(())
    }
}

/// Builds an evaluator from the executable/file fields a definition carries,
/// shared between the objective's hi-fi/lo-fi evaluator and every
/// constraint's.
fn process_evaluator(executable_path: &str, design_vector_filename: &str, output_filename: &str) -> ProcessEvaluator {
    ProcessEvaluator::new(executable_path, design_vector_filename, output_filename)
}

pub struct ObjectiveFunction {
    pub definition: ObjectiveDefinition,
    surrogate: SurrogateHandle,
    evaluator: Box<dyn Evaluator + Send + Sync>,
    /// Invoked alongside `evaluator` whenever the definition carries a
    /// `LowFidelity` counterpart; its reading feeds `surrogate`'s low-fi
    /// sub-model directly rather than a second, separately-trained surrogate
    /// (spec.md section 4.6).
    low_fidelity_evaluator: Option<Box<dyn Evaluator + Send + Sync>>,
}

impl ObjectiveFunction {
    pub fn new(definition: ObjectiveDefinition, dimension: usize, bounds: Bounds) -> Self {
        let evaluator = process_evaluator(&definition.executable_path, &definition.design_vector_filename, &definition.output_filename);
        let low_fidelity_evaluator = definition
            .low_fidelity
            .as_ref()
            .map(|lf| process_evaluator(&lf.executable_path, &lf.design_vector_filename, &lf.output_filename));
        let surrogate = SurrogateHandle::new(definition.model_type, dimension, bounds);
        ObjectiveFunction {
            definition,
            surrogate,
            evaluator: Box::new(evaluator),
            low_fidelity_evaluator: low_fidelity_evaluator.map(|e| Box::new(e) as Box<dyn Evaluator + Send + Sync>),
        }
    }

    pub fn bind_surrogate_model(&mut self, dimension: usize, bounds: Bounds) {
        self.surrogate = SurrogateHandle::new(self.definition.model_type, dimension, bounds);
    }

    /// Substitutes the evaluator collaborator — spec.md section 9's "Design
    /// Notes" call out this injection point explicitly so tests can drive a
    /// pure function instead of spawning a process.
    pub fn set_evaluator(&mut self, evaluator: Box<dyn Evaluator + Send + Sync>) {
        self.evaluator = evaluator;
    }

    /// Substitutes the low-fidelity evaluator collaborator, mirroring
    /// [`ObjectiveFunction::set_evaluator`] (spec.md section 4.6).
    pub fn set_low_fidelity_evaluator(&mut self, evaluator: Box<dyn Evaluator + Send + Sync>) {
        self.low_fidelity_evaluator = Some(evaluator);
    }

    pub fn initialize_surrogate(&mut self) -> Result<()> {
        self.surrogate.train()
    }

    pub fn train(&mut self) -> Result<()> {
        self.surrogate.train()
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.surrogate.refresh()
    }

    pub fn mean_and_variance_gradient(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DVector<f64>)> {
        self.surrogate.mean_and_variance_gradient(x)
    }

    pub fn interpolate(&self, x: &DVector<f64>) -> Result<f64> {
        self.surrogate.interpolate(x)
    }

    pub fn interpolate_with_variance(&self, x: &DVector<f64>) -> Result<(f64, f64)> {
        self.surrogate.interpolate_with_variance(x)
    }

    pub fn y_min(&self) -> Option<f64> {
        self.surrogate.y_min()
    }

    pub fn is_initialized(&self) -> bool {
        self.surrogate.is_initialized()
    }

    /// Composes `writeDesignVector` + `invokeEvaluator` + `readOutput`
    /// (spec.md section 4.7, `evaluateDesign`). The low-fidelity evaluator,
    /// when configured, always runs in primal mode — spec.md section 4.6
    /// only ever asks for a low-fidelity *value*, never its derivative.
    pub fn evaluate_design(&self, mut design: Design) -> Result<Design> {
        if self.definition.evaluation_mode == EvaluationMode::Tangent && design.tangent_direction.is_none() {
            design.tangent_direction = Some(random_unit_direction(design.design_parameters.nrows()));
        }
        let output = self.evaluator.evaluate(&design.design_parameters, self.definition.evaluation_mode)?;
        apply_evaluation(&mut design, self.definition.evaluation_mode, &output)?;
        if let Some(lf_eval) = &self.low_fidelity_evaluator {
            let lf_output = lf_eval.evaluate(&design.design_parameters, EvaluationMode::Primal)?;
            design.low_fidelity_value = Some(lf_output[0]);
        }
        Ok(design)
    }

    /// Appends the design's objective outputs to the bound surrogate, routing
    /// `design.low_fidelity_value` into the low-fi sub-model when `surrogate`
    /// is a [`SurrogateHandle::MultiLevel`] (spec.md section 4.6).
    pub fn add_design_to_data(&mut self, x: DVector<f64>, design: &Design) -> Result<()> {
        self.surrogate.add_design(x, design, None, design.low_fidelity_value)
    }
}

pub struct ConstraintFunction {
    pub definition: ConstraintDefinition,
    surrogate: SurrogateHandle,
    evaluator: Box<dyn Evaluator + Send + Sync>,
    /// Mirrors [`ObjectiveFunction::low_fidelity_evaluator`] (spec.md section 4.6).
    low_fidelity_evaluator: Option<Box<dyn Evaluator + Send + Sync>>,
}

impl ConstraintFunction {
    pub fn new(definition: ConstraintDefinition, dimension: usize, bounds: Bounds) -> Self {
        let evaluator = process_evaluator(&definition.executable_path, &definition.design_vector_filename, &definition.output_filename);
        let low_fidelity_evaluator = definition
            .low_fidelity
            .as_ref()
            .map(|lf| Box::new(process_evaluator(&lf.executable_path, &lf.design_vector_filename, &lf.output_filename)) as Box<dyn Evaluator + Send + Sync>);
        let surrogate = SurrogateHandle::new(definition.model_type, dimension, bounds);
        ConstraintFunction { definition, surrogate, evaluator: Box::new(evaluator), low_fidelity_evaluator }
    }

    pub fn bind_surrogate_model(&mut self, dimension: usize, bounds: Bounds) {
        self.surrogate = SurrogateHandle::new(self.definition.model_type, dimension, bounds);
    }

    /// Substitutes the evaluator collaborator, mirroring
    /// [`ObjectiveFunction::set_evaluator`].
    pub fn set_evaluator(&mut self, evaluator: Box<dyn Evaluator + Send + Sync>) {
        self.evaluator = evaluator;
    }

    /// Substitutes the low-fidelity evaluator collaborator, mirroring
    /// [`ObjectiveFunction::set_low_fidelity_evaluator`].
    pub fn set_low_fidelity_evaluator(&mut self, evaluator: Box<dyn Evaluator + Send + Sync>) {
        self.low_fidelity_evaluator = Some(evaluator);
    }

    pub fn initialize_surrogate(&mut self) -> Result<()> {
        self.surrogate.train()
    }

    pub fn train(&mut self) -> Result<()> {
        self.surrogate.train()
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.surrogate.refresh()
    }

    pub fn mean_and_variance_gradient(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DVector<f64>)> {
        self.surrogate.mean_and_variance_gradient(x)
    }

    pub fn interpolate(&self, x: &DVector<f64>) -> Result<f64> {
        self.surrogate.interpolate(x)
    }

    pub fn interpolate_with_variance(&self, x: &DVector<f64>) -> Result<(f64, f64)> {
        self.surrogate.interpolate_with_variance(x)
    }

    pub fn is_initialized(&self) -> bool {
        self.surrogate.is_initialized()
    }

    /// `checkFeasibility(v) = (dir=='<' ? v<thr : v>thr)` (spec.md section 4.7).
    pub fn check_feasibility(&self, value: f64) -> bool {
        self.definition.inequality.is_satisfied(value, self.definition.threshold)
    }

    pub fn evaluate_design(&self, mut design: Design) -> Result<Design> {
        if self.definition.evaluation_mode == EvaluationMode::Tangent && design.tangent_direction.is_none() {
            design.tangent_direction = Some(random_unit_direction(design.design_parameters.nrows()));
        }
        let output = self.evaluator.evaluate(&design.design_parameters, self.definition.evaluation_mode)?;
        let mut single = Design::new(design.design_parameters.clone());
        apply_evaluation(&mut single, self.definition.evaluation_mode, &output)?;
        design.constraint_true_values.push(single.true_value.expect("apply_evaluation always sets true_value"));
        if let Some(g) = single.gradient {
            design.constraint_gradients.push(g);
        }
        if let Some(t) = single.tangent_value {
            design.constraint_tangent.push(t);
        }
        let low_fidelity_value = match &self.low_fidelity_evaluator {
            Some(lf_eval) => Some(lf_eval.evaluate(&design.design_parameters, EvaluationMode::Primal)?[0]),
            None => None,
        };
        design.constraint_low_fidelity_values.push(low_fidelity_value);
        Ok(design)
    }

    /// Appends this constraint's value to the bound surrogate, routing this
    /// design's low-fidelity reading (looked up by `self.definition.id`) into
    /// the low-fi sub-model when `surrogate` is a
    /// [`SurrogateHandle::MultiLevel`] (spec.md section 4.6).
    pub fn add_design_to_data(&mut self, x: DVector<f64>, design: &Design) -> Result<()> {
        let low_fidelity_value = design.constraint_low_fidelity_values.get(self.definition.id).copied().flatten();
        self.surrogate.add_design(x, design, Some(self.definition.id), low_fidelity_value)
    }

    /// Reference to this constraint's low-fidelity counterpart, if it has
    /// one, exposed so the optimizer can tell an unconstrained from a
    /// low-fi-backed constraint (spec.md section 3, `ConstraintDefinition`).
    pub fn low_fidelity(&self) -> Option<&LowFidelity> {
        self.definition.low_fidelity.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::InequalityDirection;

    fn objective_definition() -> ObjectiveDefinition {
        ObjectiveDefinition {
            name: "obj".into(),
            executable_path: "unused".into(),
            design_vector_filename: "unused_dv.txt".into(),
            output_filename: "unused_out.txt".into(),
            training_data_filename: "unused_data.csv".into(),
            model_type: ModelType::OrdinaryKriging,
            evaluation_mode: EvaluationMode::Primal,
            low_fidelity: None,
        }
    }

    #[test]
    fn add_design_to_data_routes_objective_value_into_kriging() {
        let bounds = Bounds::uniform(2, -1.0, 1.0).unwrap();
        let mut objective = ObjectiveFunction::new(objective_definition(), 2, bounds);
        let x = DVector::from_vec(vec![0.1, 0.2]);
        let mut design = Design::new(x.clone());
        design.true_value = Some(5.0);
        objective.add_design_to_data(x, &design).unwrap();
        assert_eq!(objective.surrogate.num_samples(), 1);
    }

    #[test]
    fn multi_level_objective_trains_from_hi_and_lo_fi_evaluators() {
        use crate::evaluator::PureFnEvaluator;

        let bounds = Bounds::uniform(1, 0.0, 6.0).unwrap();
        let mut definition = objective_definition();
        definition.model_type = ModelType::MultiLevel;
        definition.low_fidelity = Some(LowFidelity {
            executable_path: "unused".into(),
            design_vector_filename: "unused_dv_lo.txt".into(),
            output_filename: "unused_out_lo.txt".into(),
            training_data_filename: "unused_data_lo.csv".into(),
        });
        let mut objective = ObjectiveFunction::new(definition, 1, bounds);
        objective.set_evaluator(Box::new(PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![x[0].sin() + 0.1 * x[0]])));
        objective.set_low_fidelity_evaluator(Box::new(PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![x[0].sin()])));

        for i in 0..8 {
            let x = DVector::from_vec(vec![i as f64 * 6.0 / 8.0]);
            let design = objective.evaluate_design(Design::new(x.clone())).unwrap();
            assert!(design.low_fidelity_value.is_some());
            objective.add_design_to_data(x, &design).unwrap();
        }
        assert_eq!(objective.surrogate.num_samples(), 16);
    }

    #[test]
    fn tangent_objective_trains_through_evaluate_and_ingest() {
        use crate::evaluator::PureFnEvaluator;

        let bounds = Bounds::uniform(2, -3.0, 3.0).unwrap();
        let mut definition = objective_definition();
        definition.model_type = ModelType::Tangent;
        definition.evaluation_mode = EvaluationMode::Tangent;
        let mut objective = ObjectiveFunction::new(definition, 2, bounds);
        objective.set_evaluator(Box::new(PureFnEvaluator::new(|x: &DVector<f64>, _mode| {
            // Reports a fixed directional derivative regardless of direction;
            // only the wiring through `evaluate_design` is under test here.
            vec![x[0] * x[0] + x[1] * x[1], 2.0 * x[0]]
        })));

        for i in 0..6 {
            let x = DVector::from_vec(vec![i as f64 * 0.3, -i as f64 * 0.2]);
            let design = objective.evaluate_design(Design::new(x.clone())).unwrap();
            assert!(design.tangent_direction.is_some());
            assert!(design.tangent_value.is_some());
            objective.add_design_to_data(x, &design).unwrap();
        }
        assert_eq!(objective.surrogate.num_samples(), 6);
    }

    #[test]
    fn constraint_feasibility_matches_direction() {
        let bounds = Bounds::uniform(1, -1.0, 1.0).unwrap();
        let definition = ConstraintDefinition {
            name: "c1".into(),
            id: 0,
            inequality: InequalityDirection::GreaterThan,
            threshold: 10.0,
            executable_path: "unused".into(),
            design_vector_filename: "unused_dv.txt".into(),
            output_filename: "unused_out.txt".into(),
            training_data_filename: "unused_data.csv".into(),
            model_type: ModelType::OrdinaryKriging,
            evaluation_mode: EvaluationMode::Primal,
            low_fidelity: None,
        };
        let constraint = ConstraintFunction::new(definition, 1, bounds);
        assert!(constraint.check_feasibility(10.4));
        assert!(!constraint.check_feasibility(9.9));
    }
}
