//! Correlation kernel and its derivatives.
//!
//! `K(x_i,x_j) = exp( - sum_k theta_k * |x_i,k - x_j,k|^gamma_k )`, per
//! spec.md section 4.3. This module also carries the kernel's analytic
//! derivatives needed by: the Kriging mean/variance gradient (for EI
//! gradient ascent, spec.md section 4.9 step 4), the marginal-likelihood
//! gradient w.r.t. `(theta,gamma)` (spec.md section 8's finite-difference
//! check; not used by the evolutionary hyperparameter search itself, which
//! is gradient-free), and the directional-derivative block used by TGEK
//! (spec.md section 4.5).

use nalgebra::{DMatrix, DVector, RowDVector};

/// `t.abs().powf(gamma)`, guarding the degenerate `t == 0` case (`0^0 = 1` in
/// `f64::powf`, which would wrongly contribute `theta` instead of `0` to `S`
/// when `gamma > 0`).
fn abs_pow(t: f64, gamma: f64) -> f64 {
    if t == 0.0 {
        0.0
    } else {
        t.abs().powf(gamma)
    }
}

/// `d/dt |t|^gamma = gamma * |t|^(gamma-1) * sign(t)`, with `sign(0) := 0`.
fn d_abs_pow(t: f64, gamma: f64) -> f64 {
    if t == 0.0 || gamma <= 0.0 {
        0.0
    } else {
        gamma * t.abs().powf(gamma - 1.0) * t.signum()
    }
}

/// `d^2/dt^2 |t|^gamma = gamma*(gamma-1) * |t|^(gamma-2)`.
///
/// `|t|` is floored at a small epsilon to avoid a singularity at `t=0` when
/// `gamma < 2`; in practice TGEK training data is deduplicated (section
/// 4.3's `tau` threshold) so exact coincidences in a single coordinate are
/// the only way to hit this floor.
fn d2_abs_pow(t: f64, gamma: f64) -> f64 {
    if gamma <= 1.0 {
        0.0
    } else {
        let abs_t = t.abs().max(1e-8);
        gamma * (gamma - 1.0) * abs_t.powf(gamma - 2.0)
    }
}

/// The exponent `S(x_i,x_j) = sum_k theta_k |x_i,k-x_j,k|^gamma_k`.
fn exponent(xi: &RowDVector<f64>, xj: &RowDVector<f64>, theta: &DVector<f64>, gamma: &DVector<f64>) -> f64 {
    (0..xi.ncols()).map(|k| theta[k] * abs_pow(xi[k] - xj[k], gamma[k])).sum()
}

/// `K(x_i,x_j)`.
pub fn kernel(xi: &RowDVector<f64>, xj: &RowDVector<f64>, theta: &DVector<f64>, gamma: &DVector<f64>) -> f64 {
    (-exponent(xi, xj, theta, gamma)).exp()
}

/// The dense correlation matrix `K(X,X)` (no jitter added).
pub fn correlation_matrix(x: &DMatrix<f64>, theta: &DVector<f64>, gamma: &DVector<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let mut r = DMatrix::zeros(n, n);
    for i in 0..n {
        r[(i, i)] = 1.0;
        for j in (i + 1)..n {
            let k = kernel(&x.row(i).into_owned(), &x.row(j).into_owned(), theta, gamma);
            r[(i, j)] = k;
            r[(j, i)] = k;
        }
    }
    r
}

/// The correlation vector `r(x)_i = K(x, X_i)`.
pub fn correlation_vector(x: &RowDVector<f64>, train: &DMatrix<f64>, theta: &DVector<f64>, gamma: &DVector<f64>) -> DVector<f64> {
    DVector::from_fn(train.nrows(), |i, _| kernel(x, &train.row(i).into_owned(), theta, gamma))
}

/// `dK(x_i,x_j)/dtheta_k` and `dK(x_i,x_j)/dgamma_k` stacked as one gradient
/// matrix per hyperparameter, in the order `[theta_0..theta_{d-1},
/// gamma_0..gamma_{d-1}]` — mirrors the teacher's
/// `make_gradient_covariance_matrices` (`gaussian_process/optimizer.rs`),
/// generalized from one lengthscale per kernel to the theta/gamma pair.
pub fn gradient_covariance_matrices(x: &DMatrix<f64>, theta: &DVector<f64>, gamma: &DVector<f64>) -> Vec<DMatrix<f64>> {
    let n = x.nrows();
    let d = theta.nrows();
    let mut grads = Vec::with_capacity(2 * d);
    for k in 0..d {
        let mut g = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let xi = x.row(i).into_owned();
                let xj = x.row(j).into_owned();
                let t = xi[k] - xj[k];
                let kij = kernel(&xi, &xj, theta, gamma);
                g[(i, j)] = -kij * abs_pow(t, gamma[k]);
            }
        }
        grads.push(g);
    }
    for k in 0..d {
        let mut g = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let xi = x.row(i).into_owned();
                let xj = x.row(j).into_owned();
                let t = xi[k] - xj[k];
                let kij = kernel(&xi, &xj, theta, gamma);
                // d/dgamma |t|^gamma = |t|^gamma * ln|t|, with the t=0 limit taken as 0.
                let dpow = if t == 0.0 { 0.0 } else { abs_pow(t, gamma[k]) * t.abs().ln() };
                g[(i, j)] = -kij * theta[k] * dpow;
            }
        }
        grads.push(g);
    }
    grads
}

/// `dK(x,x_i)/dx_k` for every training row `x_i`, i.e. the gradient of the
/// correlation vector `r(x)` w.r.t. the `k`-th coordinate of `x`. Needed by
/// the Kriging mean/variance gradient used during EI gradient ascent.
pub fn correlation_vector_gradient(x: &RowDVector<f64>, train: &DMatrix<f64>, theta: &DVector<f64>, gamma: &DVector<f64>, k: usize) -> DVector<f64> {
    DVector::from_fn(train.nrows(), |i, _| {
        let xi = train.row(i).into_owned();
        let t = x[k] - xi[k];
        let kxi = kernel(x, &xi, theta, gamma);
        -kxi * theta[k] * d_abs_pow(t, gamma[k])
    })
}

/// The per-dimension first derivative `s_k'(t) = theta_k*gamma_k*|t|^(gamma_k-1)*sign(t)`
/// at `t = x_i,k - x_j,k`, and the second derivative `s_k''(t)`, both needed
/// by [`mixed_directional_derivative`] and by TGEK's block assembly.
pub fn per_dimension_derivatives(xi: &RowDVector<f64>, xj: &RowDVector<f64>, theta: &DVector<f64>, gamma: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
    let d = theta.nrows();
    let g = DVector::from_fn(d, |k, _| theta[k] * d_abs_pow(xi[k] - xj[k], gamma[k]));
    let h = DVector::from_fn(d, |k, _| theta[k] * d2_abs_pow(xi[k] - xj[k], gamma[k]));
    (g, h)
}

/// `D_v K(x_i,x_j)` where the directional derivative is taken w.r.t. the
/// *first* argument along the unit vector `v` (i.e. `v . grad_{x_i} K`).
pub fn directional_derivative_first_arg(xi: &RowDVector<f64>, xj: &RowDVector<f64>, v: &RowDVector<f64>, theta: &DVector<f64>, gamma: &DVector<f64>) -> f64 {
    let (g, _h) = per_dimension_derivatives(xi, xj, theta, gamma);
    let k = kernel(xi, xj, theta, gamma);
    -k * (0..g.nrows()).map(|a| v[a] * g[a]).sum::<f64>()
}

/// `D_{v_i}^{(1)} D_{v_j}^{(2)} K(x_i,x_j)`: the mixed directional second
/// derivative used for the (derivative,derivative) block of TGEK's
/// augmented correlation matrix.
pub fn mixed_directional_derivative(
    xi: &RowDVector<f64>,
    xj: &RowDVector<f64>,
    vi: &RowDVector<f64>,
    vj: &RowDVector<f64>,
    theta: &DVector<f64>,
    gamma: &DVector<f64>,
) -> f64 {
    let (g, h) = per_dimension_derivatives(xi, xj, theta, gamma);
    let k = kernel(xi, xj, theta, gamma);
    let cross: f64 = (0..g.nrows()).map(|a| vi[a] * g[a]).sum::<f64>() * (0..g.nrows()).map(|b| vj[b] * g[b]).sum::<f64>();
    let diag: f64 = (0..g.nrows()).map(|a| vi[a] * vj[a] * h[a]).sum();
    k * (diag - cross)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn correlation_matrix_diagonal_is_one() {
        let theta = DVector::from_vec(vec![1.0, 2.0]);
        let gamma = DVector::from_vec(vec![2.0, 2.0]);
        let x = DMatrix::from_row_slice(3, 2, &[0.1, 0.2, 0.4, 0.5, 0.9, 0.1]);
        let r = correlation_matrix(&x, &theta, &gamma);
        for i in 0..3 {
            assert_eq!(r[(i, i)], 1.0);
        }
        assert!(r.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn correlation_vector_gradient_matches_finite_difference() {
        let theta = DVector::from_vec(vec![1.3, 0.7]);
        let gamma = DVector::from_vec(vec![2.0, 2.0]);
        let train = DMatrix::from_row_slice(2, 2, &[0.2, 0.3, 0.6, 0.1]);
        let x = RowDVector::from_vec(vec![0.45, 0.55]);
        let h = 1e-6;
        for k in 0..2 {
            let analytic = correlation_vector_gradient(&x, &train, &theta, &gamma, k);
            let mut x_plus = x.clone();
            x_plus[k] += h;
            let mut x_minus = x.clone();
            x_minus[k] -= h;
            let fd = (correlation_vector(&x_plus, &train, &theta, &gamma) - correlation_vector(&x_minus, &train, &theta, &gamma)) / (2.0 * h);
            for i in 0..2 {
                assert_abs_diff_eq!(analytic[i], fd[i], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn mixed_directional_derivative_matches_finite_difference() {
        let theta = DVector::from_vec(vec![1.1, 0.9]);
        let gamma = DVector::from_vec(vec![2.0, 2.0]);
        let xi = RowDVector::from_vec(vec![0.3, 0.65]);
        let xj = RowDVector::from_vec(vec![0.5, 0.2]);
        let vi = RowDVector::from_vec(vec![0.6, 0.8]); // unit-ish
        let vj = RowDVector::from_vec(vec![1.0, 0.0]);
        let h = 1e-6;

        let analytic = mixed_directional_derivative(&xi, &xj, &vi, &vj, &theta, &gamma);

        // finite difference over xj along vj, of the first-arg directional derivative along vi
        let mut xj_plus = xj.clone();
        for c in 0..2 {
            xj_plus[c] += h * vj[c];
        }
        let mut xj_minus = xj.clone();
        for c in 0..2 {
            xj_minus[c] -= h * vj[c];
        }
        let fd = (directional_derivative_first_arg(&xi, &xj_plus, &vi, &theta, &gamma) - directional_derivative_first_arg(&xi, &xj_minus, &vi, &theta, &gamma)) / (2.0 * h);
        assert_abs_diff_eq!(analytic, fd, epsilon = 1e-4);
    }
}
