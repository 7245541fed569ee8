//! The EGO (Efficient Global Optimization) control loop.
//!
//! Spec.md section 4.9's nine-step state machine
//! (`Init`/`TrainIfDue`/`PickCandidates`/`RefineByGradient`/`Select`/
//! `Evaluate`/`Ingest`/`RecordHistory`, repeated to `maxNumberOfIterations`),
//! grounded on `original_source/src/optimization.hpp`'s `COptimizer` for the
//! field set (`howOftenTrainModels`, `iterGradientEILoop`, `iterMaxEILoop`)
//! and loop shape.

pub mod history;

use nalgebra::DVector;
use rand::SeedableRng;

use crate::acquisition::{
    expected_improvement, expected_improvement_gradient, probability_of_feasibility, probability_of_feasibility_gradient, sigma_gradient_from_variance_gradient,
    weighted_acquisition, weighted_acquisition_gradient,
};
use crate::adapters::{ConstraintFunction, ObjectiveFunction};
use crate::bounds::Bounds;
use crate::design::{ConstraintDefinition, Design};
use crate::error::{Error, Result};
use crate::lhs::{self, DoeMethod};
use history::OptimizationHistory;

/// Tunables mirroring `COptimizer`'s constructor-time fields in
/// `original_source/src/optimization.hpp`.
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    /// Full hyperparameter retraining happens every this-many iterations;
    /// every other iteration only refreshes auxiliary state (spec.md section
    /// 4.9 step 2).
    pub how_often_train_models: usize,
    /// Target candidate count is `ei_candidates_per_dimension / dimension`
    /// (spec.md section 4.9 step 3, "N_EI ~= 10^6/d").
    pub ei_candidates_per_dimension: usize,
    /// How many top-by-acquisition candidates seed gradient refinement.
    pub top_k_seeds: usize,
    /// Bound on `RefineByGradient`'s projected-gradient-ascent iterations.
    pub gradient_ascent_max_iterations: usize,
    /// Bound on the backtracking line search per ascent iteration.
    pub backtracking_max_steps: usize,
    pub gradient_step_init: f64,
    pub max_number_of_iterations: usize,
    /// If set, zoom the active search box around the incumbent every this
    /// many iterations (spec.md section 4.9, "Zoom-in (optional)").
    pub zoom_trigger_every: Option<usize>,
    pub zoom_factor: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            how_often_train_models: 5,
            ei_candidates_per_dimension: 1_000_000,
            top_k_seeds: 10,
            gradient_ascent_max_iterations: 50,
            backtracking_max_steps: 20,
            gradient_step_init: 0.1,
            max_number_of_iterations: 50,
            zoom_trigger_every: None,
            zoom_factor: 0.5,
        }
    }
}

pub struct Optimizer {
    dimension: usize,
    /// The box the user configured; never shrunk.
    bounds: Bounds,
    /// The box candidates are currently drawn from; shrunk by zoom-in.
    active_bounds: Bounds,
    objective: ObjectiveFunction,
    constraints: Vec<ConstraintFunction>,
    history: OptimizationHistory,
    config: OptimizerConfig,
    rng: rand::rngs::StdRng,
    iteration: usize,
    /// `f*`: smallest feasible objective seen, or smallest overall if none
    /// has ever been feasible (spec.md section 9's resolved Open Question).
    incumbent: Option<f64>,
    incumbent_design_parameters: Option<DVector<f64>>,
    any_feasible_seen: bool,
}

impl Optimizer {
    pub fn new(bounds: Bounds, objective: ObjectiveFunction, constraints: Vec<ConstraintFunction>, config: OptimizerConfig) -> Self {
        let dimension = bounds.dimension();
        let num_constraints = constraints.len();
        Optimizer {
            dimension,
            active_bounds: bounds.clone(),
            bounds,
            objective,
            constraints,
            history: OptimizationHistory::new(num_constraints),
            config,
            rng: rand::rngs::StdRng::seed_from_u64(0x5EED),
            iteration: 0,
            incumbent: None,
            incumbent_design_parameters: None,
            any_feasible_seen: false,
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn history(&self) -> &OptimizationHistory {
        &self.history
    }

    pub fn incumbent(&self) -> Option<f64> {
        self.incumbent
    }

    /// Draws `n` initial samples via `method`, evaluates each design, and
    /// ingests it, then trains every surrogate for the first time (spec.md
    /// section 4.9 step 1, `Init`).
    pub fn initialize_with_doe(&mut self, n: usize, method: DoeMethod) -> Result<()> {
        let points = lhs::sample(method, n, &self.bounds, &mut self.rng);
        for row in points.row_iter() {
            let x = DVector::from_iterator(self.dimension, row.iter().copied());
            self.evaluate_and_ingest(x)?;
        }
        self.objective.train()?;
        for constraint in &mut self.constraints {
            constraint.train()?;
        }
        Ok(())
    }

    fn constraint_definitions(&self) -> Vec<ConstraintDefinition> {
        self.constraints.iter().map(|c| c.definition.clone()).collect()
    }

    /// Updates `design.improvement_value` from the incumbent *before* this
    /// design, then updates the incumbent itself — spec.md section 9's
    /// resolved Open Question, `DESIGN.md` records the rationale.
    fn update_incumbent(&mut self, design: &mut Design) {
        let true_value = design.true_value.expect("design must be evaluated before incumbent update");
        design.improvement_value = self.incumbent.map_or(0.0, |f_star| (f_star - true_value).max(0.0));

        let should_replace = if self.any_feasible_seen {
            design.is_feasible && self.incumbent.map_or(true, |f_star| true_value < f_star)
        } else {
            design.is_feasible || self.incumbent.map_or(true, |f_star| true_value < f_star)
        };
        if should_replace {
            self.incumbent = Some(true_value);
            self.incumbent_design_parameters = Some(design.design_parameters.clone());
        }
        if design.is_feasible {
            self.any_feasible_seen = true;
        }
    }

    fn evaluate_and_ingest(&mut self, x: DVector<f64>) -> Result<()> {
        let mut design = Design::new(x.clone());
        design = self.objective.evaluate_design(design)?;
        for constraint in &self.constraints {
            design = constraint.evaluate_design(design)?;
        }
        design.update_feasibility(&self.constraint_definitions());
        self.update_incumbent(&mut design);

        self.objective.add_design_to_data(x.clone(), &design)?;
        for constraint in &mut self.constraints {
            constraint.add_design_to_data(x.clone(), &design)?;
        }
        self.history.record(&design)?;
        Ok(())
    }

    /// Spec.md section 4.9 step 2: full retrain every `how_often_train_models`
    /// iterations, otherwise a cheaper auxiliary-only refresh.
    fn train_if_due(&mut self) -> Result<()> {
        let due = self.config.how_often_train_models == 0 || self.iteration % self.config.how_often_train_models == 0;
        if due {
            self.objective.train()?;
            for constraint in &mut self.constraints {
                constraint.train()?;
            }
        } else {
            self.objective.refresh()?;
            for constraint in &mut self.constraints {
                constraint.refresh()?;
            }
        }
        Ok(())
    }

    fn acquisition_at(&self, x: &DVector<f64>) -> Result<f64> {
        let f_star = self.incumbent.unwrap_or(f64::INFINITY);
        let (mu, s2) = self.objective.interpolate_with_variance(x)?;
        let ei = expected_improvement(mu, s2.max(0.0).sqrt(), f_star);
        let mut probabilities = Vec::with_capacity(self.constraints.len());
        for constraint in &self.constraints {
            let (mu_c, s2_c) = constraint.interpolate_with_variance(x)?;
            probabilities.push(probability_of_feasibility(mu_c, s2_c.max(0.0).sqrt(), constraint.definition.threshold, constraint.definition.inequality));
        }
        Ok(weighted_acquisition(ei, &probabilities))
    }

    fn acquisition_and_gradient_at(&self, x: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let f_star = self.incumbent.unwrap_or(f64::INFINITY);
        let (mu, s2) = self.objective.interpolate_with_variance(x)?;
        let sigma = s2.max(0.0).sqrt();
        let (mu_grad, s2_grad) = self.objective.mean_and_variance_gradient(x)?;
        let sigma_grad = sigma_gradient_from_variance_gradient(sigma, &s2_grad);
        let ei = expected_improvement(mu, sigma, f_star);
        let ei_grad = expected_improvement_gradient(mu, sigma, f_star, &mu_grad, &sigma_grad);

        let mut probabilities = Vec::with_capacity(self.constraints.len());
        let mut probability_gradients = Vec::with_capacity(self.constraints.len());
        for constraint in &self.constraints {
            let (mu_c, s2_c) = constraint.interpolate_with_variance(x)?;
            let sigma_c = s2_c.max(0.0).sqrt();
            let (mu_c_grad, s2_c_grad) = constraint.mean_and_variance_gradient(x)?;
            let sigma_c_grad = sigma_gradient_from_variance_gradient(sigma_c, &s2_c_grad);
            probabilities.push(probability_of_feasibility(mu_c, sigma_c, constraint.definition.threshold, constraint.definition.inequality));
            probability_gradients.push(probability_of_feasibility_gradient(
                mu_c,
                sigma_c,
                constraint.definition.threshold,
                constraint.definition.inequality,
                &mu_c_grad,
                &sigma_c_grad,
            ));
        }
        let a = weighted_acquisition(ei, &probabilities);
        let a_grad = weighted_acquisition_gradient(ei, &ei_grad, &probabilities, &probability_gradients);
        Ok((a, a_grad))
    }

    /// Spec.md section 4.9 step 3: `N_EI` uniform-random candidates scored in
    /// bulk; the top `top_k_seeds` survive.
    fn pick_candidate_seeds(&mut self) -> Result<Vec<DVector<f64>>> {
        let target = (self.config.ei_candidates_per_dimension / self.dimension.max(1)).max(self.config.top_k_seeds);
        let mut scored: Vec<(f64, DVector<f64>)> = Vec::with_capacity(target);
        for _ in 0..target {
            let x = self.active_bounds.sample_uniform(&mut self.rng);
            let a = self.acquisition_at(&x)?;
            scored.push((a, x));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.top_k_seeds);
        Ok(scored.into_iter().map(|(_, x)| x).collect())
    }

    fn project_into_active_bounds(&self, x: &mut DVector<f64>) {
        for i in 0..self.dimension {
            x[i] = x[i].clamp(self.active_bounds.lb()[i], self.active_bounds.ub()[i]);
        }
    }

    /// Spec.md section 4.9 step 4: projected gradient ascent on `A` with
    /// backtracking step-size control, stopping early once the step norm
    /// drops below `10^-8`.
    fn refine_by_gradient(&mut self, seed: DVector<f64>) -> Result<(DVector<f64>, f64)> {
        let mut x = seed;
        let mut value = self.acquisition_at(&x)?;
        for _ in 0..self.config.gradient_ascent_max_iterations {
            let (current_value, grad) = self.acquisition_and_gradient_at(&x)?;
            value = current_value;
            let grad_norm = grad.norm();
            if grad_norm < 1e-12 {
                break;
            }
            let direction = grad / grad_norm;
            let mut step = self.config.gradient_step_init;
            let mut accepted = false;
            for _ in 0..self.config.backtracking_max_steps {
                let mut candidate = &x + &direction * step;
                self.project_into_active_bounds(&mut candidate);
                let candidate_value = self.acquisition_at(&candidate)?;
                if candidate_value > value {
                    let step_norm = (&candidate - &x).norm();
                    x = candidate;
                    value = candidate_value;
                    accepted = true;
                    if step_norm < 1e-8 {
                        return Ok((x, value));
                    }
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                break;
            }
        }
        Ok((x, value))
    }

    /// Shrinks `active_bounds` around the incumbent (spec.md section 4.9,
    /// "Zoom-in"). Candidate generation and gradient refinement subsequently
    /// stay inside the reduced box; surrogate training data and its
    /// normalization baseline are left untouched, since spec.md's invariant
    /// ("training data is never reshaped") is about the data tables, not the
    /// candidate-search box.
    fn maybe_zoom(&mut self) -> Result<()> {
        let Some(every) = self.config.zoom_trigger_every else { return Ok(()) };
        if every == 0 || self.iteration % every != 0 {
            return Ok(());
        }
        let Some(center) = self.incumbent_design_parameters.clone() else { return Ok(()) };
        self.active_bounds = self.bounds.zoom(&center, self.config.zoom_factor)?;
        Ok(())
    }

    /// Runs one full iteration of spec.md section 4.9 steps 2-8.
    pub fn step(&mut self) -> Result<()> {
        self.iteration += 1;
        self.train_if_due()?;

        let seeds = self.pick_candidate_seeds()?;
        if seeds.is_empty() {
            return Err(Error::Numerical("no candidate seeds survived scoring".into()));
        }
        let mut best: Option<(DVector<f64>, f64)> = None;
        for seed in seeds {
            let refined = self.refine_by_gradient(seed)?;
            if best.as_ref().map_or(true, |(_, v)| refined.1 > *v) {
                best = Some(refined);
            }
        }
        let (winner, _) = best.expect("seeds is non-empty, so at least one refinement ran");

        self.evaluate_and_ingest(winner)?;
        self.maybe_zoom()?;
        Ok(())
    }

    /// Runs [`Optimizer::step`] until `max_number_of_iterations` is reached.
    pub fn run(&mut self) -> Result<()> {
        while self.iteration < self.config.max_number_of_iterations {
            self.step()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{EvaluationMode, ModelType, ObjectiveDefinition};

    fn himmelblau(x: &DVector<f64>) -> f64 {
        let a = x[0] * x[0] + x[1] - 11.0;
        let b = x[0] + x[1] * x[1] - 7.0;
        a * a + b * b
    }

    fn build_unconstrained_optimizer() -> Optimizer {
        let bounds = Bounds::uniform(2, -6.0, 6.0).unwrap();
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
        let mut objective = ObjectiveFunction::new(definition, 2, bounds.clone());
        objective.set_evaluator(Box::new(crate::evaluator::PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![himmelblau(x)])));

        let mut config = OptimizerConfig::default();
        config.ei_candidates_per_dimension = 400;
        config.top_k_seeds = 3;
        config.gradient_ascent_max_iterations = 5;
        config.max_number_of_iterations = 3;
        config.how_often_train_models = 1;

        Optimizer::new(bounds, objective, Vec::new(), config)
    }

    #[test]
    fn improvement_value_uses_incumbent_before_this_design() {
        let mut optimizer = build_unconstrained_optimizer();
        let mut d1 = Design::new(DVector::from_vec(vec![0.0, 0.0]));
        d1.true_value = Some(10.0);
        d1.is_feasible = true;
        optimizer.update_incumbent(&mut d1);
        assert_eq!(d1.improvement_value, 0.0);
        assert_eq!(optimizer.incumbent(), Some(10.0));

        let mut d2 = Design::new(DVector::from_vec(vec![1.0, 1.0]));
        d2.true_value = Some(4.0);
        d2.is_feasible = true;
        optimizer.update_incumbent(&mut d2);
        assert_eq!(d2.improvement_value, 6.0);
        assert_eq!(optimizer.incumbent(), Some(4.0));
    }

    #[test]
    fn incumbent_never_increases_across_iterations() {
        let mut optimizer = build_unconstrained_optimizer();
        optimizer.initialize_with_doe(12, DoeMethod::LatinHypercube).unwrap();
        let mut last = optimizer.incumbent();
        for _ in 0..2 {
            optimizer.step().unwrap();
            let current = optimizer.incumbent();
            if let (Some(prev), Some(now)) = (last, current) {
                assert!(now <= prev + 1e-9);
            }
            last = current;
        }
        assert_eq!(optimizer.history().len(), 12 + 2);
    }

    #[test]
    fn constrained_ego_records_a_feasibility_flag_per_iteration() {
        use crate::design::{ConstraintDefinition, InequalityDirection};

        let bounds = Bounds::uniform(2, -6.0, 6.0).unwrap();
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
        let mut objective = ObjectiveFunction::new(definition, 2, bounds.clone());
        objective.set_evaluator(Box::new(crate::evaluator::PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![himmelblau(x)])));

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
        let mut c1 = ConstraintFunction::new(c1_definition, 2, bounds.clone());
        c1.set_evaluator(Box::new(crate::evaluator::PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![x[0] + x[1]])));

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
        let mut c2 = ConstraintFunction::new(c2_definition, 2, bounds.clone());
        c2.set_evaluator(Box::new(crate::evaluator::PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![x[0] - x[1]])));

        let mut config = OptimizerConfig::default();
        config.ei_candidates_per_dimension = 400;
        config.top_k_seeds = 3;
        config.gradient_ascent_max_iterations = 5;
        config.max_number_of_iterations = 3;
        config.how_often_train_models = 1;

        let mut optimizer = Optimizer::new(bounds, objective, vec![c1, c2], config);
        optimizer.initialize_with_doe(12, DoeMethod::LatinHypercube).unwrap();
        for _ in 0..2 {
            optimizer.step().unwrap();
        }
        assert_eq!(optimizer.history().len(), 12 + 2);
        // every recorded row carries a feasibility flag in {0,1}.
        for i in 0..optimizer.history().len() {
            let flag = *optimizer.history().row(i).last().unwrap();
            assert!(flag == 0.0 || flag == 1.0);
        }
        assert!(optimizer.history().recent_feasibility_fraction(5) >= 0.0);
    }
}
