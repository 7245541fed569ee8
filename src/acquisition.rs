//! Expected-improvement acquisition with constraint feasibility weighting.
//!
//! Spec.md section 4.8. Normal CDF/PDF come from `statrs`, grounded on
//! `examples/SPRAGE-quantlib-rs`'s use of the same crate for exactly this
//! purpose (closed-form probabilities over a fitted distribution).

use nalgebra::DVector;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::design::InequalityDirection;
use crate::error::Result;
use crate::kriging::KrigingModel;
use crate::surrogate::Surrogate;

/// Below this predicted standard deviation, `EI` is defined to be exactly
/// zero (spec.md section 4.8) rather than dividing by a near-zero `sigma`.
const SIGMA_FLOOR: f64 = 1e-12;

fn standard_normal() -> Normal {
    Normal::new(0.0, 1.0).expect("N(0,1) is always a valid normal distribution")
}

/// `EI(x) = (f* - mu)*Phi(z) + sigma*phi(z)`, `z = (f* - mu)/sigma`; `0` if
/// `sigma` is below [`SIGMA_FLOOR`].
pub fn expected_improvement(mu: f64, sigma: f64, f_star: f64) -> f64 {
    if sigma < SIGMA_FLOOR {
        return 0.0;
    }
    let n = standard_normal();
    let z = (f_star - mu) / sigma;
    (f_star - mu) * n.cdf(z) + sigma * n.pdf(z)
}

/// Closed-form gradient of `EI` w.r.t. the design vector, given `dmu/dx` and
/// `dsigma/dx`: `dEI/dmu = -Phi(z)`, `dEI/dsigma = phi(z)` (standard EGO
/// result), chained through `mu(x)`/`sigma(x)`.
pub fn expected_improvement_gradient(mu: f64, sigma: f64, f_star: f64, mu_gradient: &DVector<f64>, sigma_gradient: &DVector<f64>) -> DVector<f64> {
    if sigma < SIGMA_FLOOR {
        return DVector::zeros(mu_gradient.nrows());
    }
    let n = standard_normal();
    let z = (f_star - mu) / sigma;
    -mu_gradient * n.cdf(z) + sigma_gradient * n.pdf(z)
}

/// Probability that a constraint surrogate crosses its threshold in the
/// required direction: `Phi((thr-mu)/sigma)` for `<`, `1-Phi(...)` for `>`.
/// `sigma == 0` resolves to `{0,1}` from the sign of `thr - mu` against the
/// direction (spec.md section 4.8).
pub fn probability_of_feasibility(mu: f64, sigma: f64, threshold: f64, direction: InequalityDirection) -> f64 {
    if sigma <= 0.0 {
        return if direction.is_satisfied(mu, threshold) { 1.0 } else { 0.0 };
    }
    let n = standard_normal();
    let z = (threshold - mu) / sigma;
    match direction {
        InequalityDirection::LessThan => n.cdf(z),
        InequalityDirection::GreaterThan => 1.0 - n.cdf(z),
    }
}

/// Gradient of [`probability_of_feasibility`] w.r.t. the design vector.
pub fn probability_of_feasibility_gradient(
    mu: f64,
    sigma: f64,
    threshold: f64,
    direction: InequalityDirection,
    mu_gradient: &DVector<f64>,
    sigma_gradient: &DVector<f64>,
) -> DVector<f64> {
    if sigma <= SIGMA_FLOOR {
        return DVector::zeros(mu_gradient.nrows());
    }
    let n = standard_normal();
    let z = (threshold - mu) / sigma;
    let density = n.pdf(z);
    // d/dmu [Phi(z)] = -phi(z)/sigma ; d/dsigma [Phi(z)] = -phi(z)*z/sigma
    let dz_dmu_term = -density / sigma;
    let dz_dsigma_term = -density * z / sigma;
    let raw = mu_gradient * dz_dmu_term + sigma_gradient * dz_dsigma_term;
    match direction {
        InequalityDirection::LessThan => raw,
        InequalityDirection::GreaterThan => -raw,
    }
}

/// `A(x) = EI(x) * Prod_j P_j(x)` (spec.md section 4.8).
pub fn weighted_acquisition(ei: f64, feasibility_probabilities: &[f64]) -> f64 {
    ei * feasibility_probabilities.iter().product::<f64>()
}

/// Gradient of the weighted acquisition via the product rule: each
/// `P_j`'s contribution is `EI * dP_j/dx * Prod_{k != j} P_k`. Terms for a
/// zero-probability constraint contribute nothing (the product is already
/// zero there and `RefineByGradient`'s backtracking line search will not
/// improve on a zero-acquisition point anyway).
pub fn weighted_acquisition_gradient(
    ei: f64,
    ei_gradient: &DVector<f64>,
    feasibility_probabilities: &[f64],
    feasibility_gradients: &[DVector<f64>],
) -> DVector<f64> {
    let product: f64 = feasibility_probabilities.iter().product();
    let dimension = ei_gradient.nrows();
    let mut grad = ei_gradient * product;
    for (j, p_j) in feasibility_probabilities.iter().enumerate() {
        if *p_j <= 0.0 {
            continue;
        }
        let others: f64 = product / p_j;
        grad += &feasibility_gradients[j] * (ei * others);
    }
    debug_assert_eq!(grad.nrows(), dimension);
    grad
}

/// Extra capability only `KrigingModel` (and its relatives that forward to
/// one) exposes: closed-form `dmu/dx`/`dsigma^2/dx`, used by
/// `RefineByGradient` when available; every other surrogate falls back to
/// finite differences (spec.md section 4.9 step 4) via [`finite_difference_gradient`].
pub trait GradientSurrogate: Surrogate {
    fn mean_gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>>;
    /// Gradient of the *variance* (not standard deviation) prediction.
    fn variance_gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>>;
}

impl GradientSurrogate for KrigingModel {
    fn mean_gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        self.predict_gradient(x)
    }

    fn variance_gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        KrigingModel::variance_gradient(self, x)
    }
}

/// Central finite-difference gradient of a scalar function of the design
/// vector, used for any surrogate without a closed-form gradient (spec.md
/// section 4.9 step 4, "otherwise finite differences").
pub fn finite_difference_gradient(f: impl Fn(&DVector<f64>) -> Result<f64>, x: &DVector<f64>, step: f64) -> Result<DVector<f64>> {
    let mut grad = DVector::zeros(x.nrows());
    for k in 0..x.nrows() {
        let mut x_plus = x.clone();
        let mut x_minus = x.clone();
        x_plus[k] += step;
        x_minus[k] -= step;
        grad[k] = (f(&x_plus)? - f(&x_minus)?) / (2.0 * step);
    }
    Ok(grad)
}

/// Turns a variance gradient into a standard-deviation gradient:
/// `d(sqrt(s2))/dx = ds2/dx / (2*sqrt(s2))`.
pub fn sigma_gradient_from_variance_gradient(sigma: f64, variance_gradient: &DVector<f64>) -> DVector<f64> {
    if sigma < SIGMA_FLOOR {
        return DVector::zeros(variance_gradient.nrows());
    }
    variance_gradient / (2.0 * sigma)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ei_matches_known_point() {
        // spec.md section 8 scenario 4: f*=0, mu=1, sigma=1 -> EI ~= 0.0833
        let ei = expected_improvement(1.0, 1.0, 0.0);
        assert!((ei - 0.0833).abs() < 1e-3);
    }

    #[test]
    fn ei_is_zero_below_sigma_floor() {
        assert_eq!(expected_improvement(1.0, 1e-13, 0.0), 0.0);
    }

    #[test]
    fn feasibility_probability_bounded() {
        for direction in [InequalityDirection::LessThan, InequalityDirection::GreaterThan] {
            for mu in [-5.0, 0.0, 5.0, 12.0] {
                for sigma in [0.1, 1.0, 10.0] {
                    let p = probability_of_feasibility(mu, sigma, 10.0, direction);
                    assert!((0.0..=1.0).contains(&p), "p={p} out of bounds for mu={mu} sigma={sigma}");
                }
            }
        }
    }

    #[test]
    fn feasibility_check_scenario_3() {
        assert_eq!(probability_of_feasibility(10.4, 0.0, 10.0, InequalityDirection::GreaterThan), 1.0);
        assert_eq!(probability_of_feasibility(9.9, 0.0, 10.0, InequalityDirection::GreaterThan), 0.0);
    }

    #[test]
    fn ei_gradient_matches_finite_difference() {
        let f_star = 0.3;
        let mu = |x: &DVector<f64>| -> f64 { x[0] * x[0] + x[1] };
        let sigma = |x: &DVector<f64>| -> f64 { 0.5 + 0.1 * x[0] };
        let ei_at = |x: &DVector<f64>| -> Result<f64> { Ok(expected_improvement(mu(x), sigma(x), f_star)) };

        let x0 = DVector::from_vec(vec![0.4, -0.1]);
        let mu_grad = DVector::from_vec(vec![2.0 * x0[0], 1.0]);
        let sigma_grad = DVector::from_vec(vec![0.1, 0.0]);
        let analytic = expected_improvement_gradient(mu(&x0), sigma(&x0), f_star, &mu_grad, &sigma_grad);
        let numeric = finite_difference_gradient(ei_at, &x0, 1e-6).unwrap();
        for k in 0..2 {
            assert!((analytic[k] - numeric[k]).abs() < 1e-4, "component {k}: analytic={} numeric={}", analytic[k], numeric[k]);
        }
    }

    #[test]
    fn weighted_acquisition_is_product() {
        let a = weighted_acquisition(0.5, &[0.8, 0.9]);
        assert!((a - 0.5 * 0.8 * 0.9).abs() < 1e-12);
    }
}
