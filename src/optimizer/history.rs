//! The optimizer's append-only history table.
//!
//! Spec.md section 3: "`OptimizationHistory`: append-only matrix; each row
//! `[x | y_obj | c_1 … c_m | improvement | feasibility_flag]`." Rows are
//! never edited, matching `Design`'s own "immutable thereafter" lifecycle.

use nalgebra::DVector;

use crate::design::Design;
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct OptimizationHistory {
    num_constraints: usize,
    rows: Vec<Vec<f64>>,
}

impl OptimizationHistory {
    pub fn new(num_constraints: usize) -> Self {
        OptimizationHistory { num_constraints, rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends one `Design`'s summary row: `x | y_obj | c_1..c_m |
    /// improvement | feasibility_flag`.
    pub fn record(&mut self, design: &Design) -> Result<()> {
        if design.constraint_true_values.len() != self.num_constraints {
            return Err(Error::ModelBind(format!(
                "design has {} constraint values, history expects {}",
                design.constraint_true_values.len(),
                self.num_constraints
            )));
        }
        let true_value = design.true_value.ok_or_else(|| Error::ModelBind("design has no objective value to record".into()))?;
        let mut row: Vec<f64> = design.design_parameters.iter().copied().collect();
        row.push(true_value);
        row.extend(design.constraint_true_values.iter().copied());
        row.push(design.improvement_value);
        row.push(if design.is_feasible { 1.0 } else { 0.0 });
        self.rows.push(row);
        Ok(())
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    /// Objective values recorded so far, in insertion order.
    ///
    /// Row layout is `[x(d) | y | c(m) | improvement | feasibility]`, so `y`
    /// sits right after the `d` design-parameter columns: `dimension = len -
    /// num_constraints - 3` (the trailing `-3` accounts for `y`, improvement
    /// and feasibility).
    pub fn objective_values(&self) -> DVector<f64> {
        let dimension = self.rows.first().map_or(0, |r| r.len() - self.num_constraints - 3);
        DVector::from_fn(self.rows.len(), |r, _| self.rows[r][dimension])
    }

    /// Fraction of the last `window` rows (or all rows, if fewer) that are feasible.
    pub fn recent_feasibility_fraction(&self, window: usize) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let start = self.rows.len().saturating_sub(window);
        let recent = &self.rows[start..];
        let feasible = recent.iter().filter(|row| *row.last().expect("row always has a feasibility flag") > 0.5).count();
        feasible as f64 / recent.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design_with(x: f64, y: f64, feasible: bool, improvement: f64) -> Design {
        let mut d = Design::new(DVector::from_vec(vec![x]));
        d.true_value = Some(y);
        d.is_feasible = feasible;
        d.improvement_value = improvement;
        d
    }

    #[test]
    fn records_rows_and_tracks_row_count() {
        let mut history = OptimizationHistory::new(0);
        history.record(&design_with(1.0, 2.0, true, 0.0)).unwrap();
        history.record(&design_with(1.5, 1.0, true, 1.0)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.row(1), &[1.5, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn recent_feasibility_fraction_over_window() {
        let mut history = OptimizationHistory::new(0);
        for feasible in [true, true, false, false] {
            history.record(&design_with(0.0, 0.0, feasible, 0.0)).unwrap();
        }
        assert_eq!(history.recent_feasibility_fraction(2), 0.0);
        assert_eq!(history.recent_feasibility_fraction(4), 0.5);
    }

    #[test]
    fn objective_values_skip_constraint_columns() {
        let mut history = OptimizationHistory::new(2);
        let mut d1 = design_with(1.0, 2.0, true, 0.0);
        d1.constraint_true_values = vec![10.0, 20.0];
        let mut d2 = design_with(1.5, 1.0, true, 1.0);
        d2.constraint_true_values = vec![11.0, 21.0];
        history.record(&d1).unwrap();
        history.record(&d2).unwrap();
        assert_eq!(history.objective_values(), DVector::from_vec(vec![2.0, 1.0]));
    }

    #[test]
    fn rejects_mismatched_constraint_count() {
        let mut history = OptimizationHistory::new(2);
        assert!(history.record(&design_with(0.0, 0.0, true, 0.0)).is_err());
    }
}
