//! The external-evaluator collaborator.
//!
//! Spec.md section 9's "Design Notes" calls for treating the simulator
//! invocation as "an injectable collaborator exposing `evaluate(Design) ->
//! Design` so tests can substitute a pure function" instead of the original's
//! hardwired `system()`/file-IO calls (`objective_function.cpp`,
//! `constraint_functions.cpp`). `Evaluator` is that collaborator;
//! `ProcessEvaluator` is the real implementation (spec.md section 6's file
//! contract) and `PureFnEvaluator` is the test substitute.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use nalgebra::DVector;
use rand_distr::{Distribution, Normal};

use crate::design::{Design, EvaluationMode};
use crate::error::{Error, Result};

/// Spawns/consults whatever produces a `(value [, derivative info])` tuple
/// for a design vector, per spec.md section 4.7/6.
pub trait Evaluator {
    /// Runs the evaluator at `design_parameters` under `mode` and returns the
    /// raw outputs in the order spec.md section 6 specifies: one number for
    /// `Primal`, two for `Tangent` (value, directional derivative), `1+d` for
    /// `Adjoint` (value, gradient).
    fn evaluate(&self, design_parameters: &DVector<f64>, mode: EvaluationMode) -> Result<Vec<f64>>;
}

/// Spawns a configured executable, writing the design vector to
/// `design_vector_filename` and reading `outputFilename` after it exits,
/// exactly as spec.md section 6's simulator contract describes. This is a
/// thin `std::process::Command` wrapper, not a subprocess-management
/// library, per SPEC_FULL.md section 6.
#[derive(Clone, Debug)]
pub struct ProcessEvaluator {
    pub executable_path: String,
    pub design_vector_filename: PathBuf,
    pub output_filename: PathBuf,
}

impl ProcessEvaluator {
    pub fn new(executable_path: impl Into<String>, design_vector_filename: impl AsRef<Path>, output_filename: impl AsRef<Path>) -> Self {
        ProcessEvaluator {
            executable_path: executable_path.into(),
            design_vector_filename: design_vector_filename.as_ref().to_path_buf(),
            output_filename: output_filename.as_ref().to_path_buf(),
        }
    }

    fn write_design_vector(&self, x: &DVector<f64>) -> Result<()> {
        let mut file = std::fs::File::create(&self.design_vector_filename)
            .map_err(|e| Error::Io(format!("cannot write {}: {e}", self.design_vector_filename.display())))?;
        let line = x.iter().map(|v| format!("{v:.15e}")).collect::<Vec<_>>().join(" ");
        writeln!(file, "{line}").map_err(|e| Error::Io(e.to_string()))
    }

    fn invoke(&self) -> Result<()> {
        let status = Command::new(&self.executable_path)
            .status()
            .map_err(|e| Error::Simulator(format!("failed to spawn '{}': {e}", self.executable_path)))?;
        if !status.success() {
            return Err(Error::Simulator(format!("'{}' exited with {status}", self.executable_path)));
        }
        Ok(())
    }

    fn read_output(&self, expected_len: usize) -> Result<Vec<f64>> {
        let content = std::fs::read_to_string(&self.output_filename)
            .map_err(|e| Error::Simulator(format!("cannot read {}: {e}", self.output_filename.display())))?;
        let values: Vec<f64> = content
            .split_whitespace()
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Simulator(format!("unparsable output in {}: {e}", self.output_filename.display())))?;
        if values.len() != expected_len {
            return Err(Error::Simulator(format!(
                "{} expected {} values, got {}",
                self.output_filename.display(),
                expected_len,
                values.len()
            )));
        }
        Ok(values)
    }
}

impl Evaluator for ProcessEvaluator {
    fn evaluate(&self, design_parameters: &DVector<f64>, mode: EvaluationMode) -> Result<Vec<f64>> {
        self.write_design_vector(design_parameters)?;
        self.invoke()?;
        let expected_len = match mode {
            EvaluationMode::Primal => 1,
            EvaluationMode::Tangent => 2,
            EvaluationMode::Adjoint => 1 + design_parameters.nrows(),
        };
        self.read_output(expected_len)
    }
}

/// Wraps a closure as an `Evaluator`, for tests — spec.md section 9's "Design
/// Notes" names this substitution explicitly.
pub struct PureFnEvaluator<F>
where
    F: Fn(&DVector<f64>, EvaluationMode) -> Vec<f64>,
{
    function: F,
}

impl<F> PureFnEvaluator<F>
where
    F: Fn(&DVector<f64>, EvaluationMode) -> Vec<f64>,
{
    pub fn new(function: F) -> Self {
        PureFnEvaluator { function }
    }
}

impl<F> Evaluator for PureFnEvaluator<F>
where
    F: Fn(&DVector<f64>, EvaluationMode) -> Vec<f64>,
{
    fn evaluate(&self, design_parameters: &DVector<f64>, mode: EvaluationMode) -> Result<Vec<f64>> {
        Ok((self.function)(design_parameters, mode))
    }
}

/// Draws a uniformly random unit direction in `dimension` dimensions: `dimension`
/// independent standard normals, renormalized to unit length (same
/// sample-then-normalize idiom `kriging/ga.rs` uses for its mutation step).
///
/// Tangent-mode evaluation needs a differentiation direction per design.
/// `original_source`'s `ConstraintFunctionTest.evaluateDesignTangent` shows the
/// caller setting `Design::tangentDirection` directly before `evaluateDesign`
/// runs; this is the adapter-side default used whenever nothing upstream has
/// already chosen one for the design.
pub fn random_unit_direction(dimension: usize) -> DVector<f64> {
    let normal = Normal::new(0.0, 1.0).expect("unit normal is always a valid distribution");
    let mut rng = rand::thread_rng();
    let raw = DVector::from_fn(dimension, |_, _| normal.sample(&mut rng));
    let norm = raw.norm();
    if norm > 0.0 {
        raw / norm
    } else {
        DVector::from_element(dimension, 1.0 / (dimension as f64).sqrt())
    }
}

/// Fills in `true_value`/`tangent_value`/`gradient` on a freshly created
/// [`Design`] from the evaluator's raw output vector, per spec.md section
/// 4.7's `readOutput`. Shared by objective and constraint adapters.
pub fn apply_evaluation(design: &mut Design, mode: EvaluationMode, output: &[f64]) -> Result<()> {
    match mode {
        EvaluationMode::Primal => {
            design.true_value = Some(output[0]);
        }
        EvaluationMode::Tangent => {
            design.tangent_value = Some(output[1]);
            design.true_value = Some(output[0]);
        }
        EvaluationMode::Adjoint => {
            design.true_value = Some(output[0]);
            design.gradient = Some(DVector::from_row_slice(&output[1..]));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_fn_evaluator_reports_primal_value() {
        let evaluator = PureFnEvaluator::new(|x: &DVector<f64>, _mode| vec![x[0] * x[0] + x[1] * x[1]]);
        let x = DVector::from_vec(vec![3.0, 4.0]);
        let output = evaluator.evaluate(&x, EvaluationMode::Primal).unwrap();
        assert_eq!(output, vec![25.0]);
    }

    #[test]
    fn apply_evaluation_fills_adjoint_fields() {
        let mut design = Design::new(DVector::from_vec(vec![1.0, 2.0]));
        apply_evaluation(&mut design, EvaluationMode::Adjoint, &[5.0, 2.0, 4.0]).unwrap();
        assert_eq!(design.true_value, Some(5.0));
        assert_eq!(design.gradient.unwrap(), DVector::from_vec(vec![2.0, 4.0]));
    }
}
