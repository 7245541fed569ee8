//! End-to-end EGO convergence, spec.md section 8 scenarios 1 and 2: Himmelblau
//! with 50 Latin-hypercube initial samples and 50 acquisition-driven
//! iterations, run entirely in-process via `PureFnEvaluator` (no executable
//! or files involved, per spec.md section 9's injectable-evaluator note).

use nalgebra::DVector;

use rodeo_bo::adapters::{ConstraintFunction, ObjectiveFunction};
use rodeo_bo::bounds::Bounds;
use rodeo_bo::design::{ConstraintDefinition, EvaluationMode, InequalityDirection, ModelType, ObjectiveDefinition};
use rodeo_bo::evaluator::PureFnEvaluator;
use rodeo_bo::lhs::DoeMethod;
use rodeo_bo::optimizer::{Optimizer, OptimizerConfig};

fn himmelblau(x: &DVector<f64>) -> f64 {
    let a = x[0] * x[0] + x[1] - 11.0;
    let b = x[0] + x[1] * x[1] - 7.0;
    a * a + b * b
}

fn himmelblau_objective(bounds: Bounds) -> ObjectiveFunction {
    let definition = ObjectiveDefinition {
        name: "himmelblau".into(),
        executable_path: String::new(),
        design_vector_filename: String::new(),
        output_filename: String::new(),
        training_data_filename: String::new(),
        model_type: ModelType::OrdinaryKriging,
        evaluation_mode: EvaluationMode::Primal,
        low_fidelity: None,
    };
    let mut objective = ObjectiveFunction::new(definition, bounds.dimension(), bounds);
    objective.set_evaluator(Box::new(PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![himmelblau(x)])));
    objective
}

/// Economical but real acquisition budget: full-size `ei_candidates_per_dimension`
/// (spec.md section 4.9's `N_EI ~= 10^6/d`) would make this test far slower than
/// its value justifies; the scaled-down budget here still drives genuine
/// EI-guided search rather than the 2-3 iteration smoke tests in
/// `optimizer::tests`.
fn ego_config() -> OptimizerConfig {
    let mut config = OptimizerConfig::default();
    config.ei_candidates_per_dimension = 20_000;
    config.top_k_seeds = 5;
    config.gradient_ascent_max_iterations = 20;
    config.max_number_of_iterations = 50;
    config
}

#[test]
fn himmelblau_unconstrained_ego_converges() {
    let bounds = Bounds::uniform(2, -6.0, 6.0).unwrap();
    let objective = himmelblau_objective(bounds.clone());
    let mut optimizer = Optimizer::new(bounds, objective, Vec::new(), ego_config());

    optimizer.initialize_with_doe(50, DoeMethod::LatinHypercube).unwrap();
    optimizer.run().unwrap();

    assert_eq!(optimizer.history().len(), 100);
    let best = optimizer.incumbent().expect("50 evaluated designs always produce an incumbent");
    assert!(best <= 1e-2, "expected best objective <= 1e-2, got {best}");
}

#[test]
fn himmelblau_constrained_ego_stays_mostly_feasible() {
    let bounds = Bounds::uniform(2, -6.0, 6.0).unwrap();
    let objective = himmelblau_objective(bounds.clone());

    // spec.md section 8 scenario 2: c1 < 10, c2 > 3.
    let c1_definition = ConstraintDefinition {
        name: "c1".into(),
        id: 0,
        inequality: InequalityDirection::LessThan,
        threshold: 10.0,
        executable_path: String::new(),
        design_vector_filename: String::new(),
        output_filename: String::new(),
        training_data_filename: String::new(),
        model_type: ModelType::OrdinaryKriging,
        evaluation_mode: EvaluationMode::Primal,
        low_fidelity: None,
    };
    let mut c1 = ConstraintFunction::new(c1_definition, bounds.dimension(), bounds.clone());
    c1.set_evaluator(Box::new(PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![x[0] + x[1]])));

    let c2_definition = ConstraintDefinition {
        name: "c2".into(),
        id: 1,
        inequality: InequalityDirection::GreaterThan,
        threshold: 3.0,
        executable_path: String::new(),
        design_vector_filename: String::new(),
        output_filename: String::new(),
        training_data_filename: String::new(),
        model_type: ModelType::OrdinaryKriging,
        evaluation_mode: EvaluationMode::Primal,
        low_fidelity: None,
    };
    let mut c2 = ConstraintFunction::new(c2_definition, bounds.dimension(), bounds.clone());
    c2.set_evaluator(Box::new(PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![x[0] - x[1]])));

    let mut optimizer = Optimizer::new(bounds, objective, vec![c1, c2], ego_config());
    optimizer.initialize_with_doe(50, DoeMethod::LatinHypercube).unwrap();
    optimizer.run().unwrap();

    assert_eq!(optimizer.history().len(), 100);
    let feasibility_fraction = optimizer.history().recent_feasibility_fraction(10);
    assert!(feasibility_fraction >= 0.7, "expected feasibility fraction >= 0.7 in the last 10 iterations, got {feasibility_fraction}");
}
