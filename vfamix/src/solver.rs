use crate::{Error, Result};
use faer::{Mat, linalg::solvers::Solve, unzip, zip};
use faer_ext::{IntoFaer, IntoNalgebra};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// Interface for functions whose values are minimized by providing value,
/// gradient and hessian methods.
pub trait NlpFunctionTarget {
    /// Returns the value of its function at x.
    fn val(&self, x: &Mat<f64>) -> f64;
    /// Returns the value and gradient of its function at x.
    fn val_grad(&self, x: &Mat<f64>) -> (f64, Mat<f64>);
    /// Returns the value, gradient and hessian of its function at x.
    fn val_grad_hes(&self, x: &Mat<f64>) -> (f64, Mat<f64>, Mat<f64>);
}

/// Configuration of [NlpSolver].
pub struct NlpSolverOptions {
    /// Barrier precision, terminates the outer loop.
    pub barrier_prec: f64,
    /// Newton step norm precision, terminates the inner loop.
    pub newton_prec: f64,
    /// Maximal outer (barrier) iterations before reporting failure.
    pub barrier_max_iter: u64,
    /// Maximal Newton iterations per barrier stage.
    pub newton_max_iter: u64,
    /// Maximal backtracking line search iterations per Newton step.
    pub backline_max_iter: u64,
    /// Barrier growth factor.
    pub barrier_mu: f64,
    /// Initial barrier weight.
    pub barrier_t0: f64,
    /// Initial line search step length.
    pub backline_a: f64,
    /// Line search shrink factor.
    pub backline_b: f64,
}

impl Default for NlpSolverOptions {
    fn default() -> Self {
        Self {
            barrier_prec: 1e-8,
            newton_prec: 1e-6,
            barrier_max_iter: 1_000,
            newton_max_iter: 1_000,
            backline_max_iter: 40,
            barrier_mu: 5.,
            barrier_t0: 100.,
            backline_a: 0.2,
            backline_b: 0.5,
        }
    }
}

impl NlpSolverOptions {
    /// Creates a new solver configuration with its default values.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Componentwise box bound on x.
pub struct BoxBound {
    /// Lower bound per component.
    pub lower: Mat<f64>,
    /// Upper bound per component.
    pub upper: Mat<f64>,
}

impl BoxBound {
    /// Creates the bound from nalgebra vectors.
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Self {
        let lower = lower.view_range(.., ..).into_faer().to_owned();
        let upper = upper.view_range(.., ..).into_faer().to_owned();
        Self { lower, upper }
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Linear equality constraint $M x = M x_0$ of [NlpSolver], defined by the
/// matrix M of shape k x m, where m is the size of x and k the number of
/// linearly independent constraint rows. The right-hand side is pinned at
/// the start point, so a feasible start stays feasible.
pub struct LinearEqualityConstraint {
    /// Linear equality constraint matrix.
    pub mat: DMatrix<f64>,
}

/// All constraint types for [NlpSolver].
pub struct NlpSolverConstraints {
    /// Box constraint for x.
    pub bound: Option<BoxBound>,
    /// Linear equality constraint.
    pub lin_equal: Option<LinearEqualityConstraint>,
}

/// Successful minimization outcome with its convergence diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Argmin of the target within the constraints.
    pub x: DVector<f64>,
    /// Outer (barrier) iterations used.
    pub barrier_iterations: u64,
    /// Total Newton iterations across all barrier stages.
    pub newton_iterations: u64,
    /// Residual norm of the linear equality constraint at x.
    pub constraint_residual: f64,
}

struct PreComputation {
    lin_equal_newton_mat: Option<Mat<f64>>,
}

/// Log-barrier solver that minimizes an [NlpFunctionTarget] within box and
/// linear equality constraints. Failure to converge is reported explicitly
/// instead of returning the last iterate.
pub struct NlpSolver {
    options: NlpSolverOptions,
    constraints: NlpSolverConstraints,
    func: Arc<dyn NlpFunctionTarget + Send + Sync>,
    pre_computation: PreComputation,
}

impl NlpSolver {
    /// Initialize the solver.
    pub fn new(
        options: NlpSolverOptions,
        constraints: NlpSolverConstraints,
        func: Arc<dyn NlpFunctionTarget + Send + Sync>,
    ) -> Self {
        let pre_computation = NlpSolver::pre_computation(&constraints);
        Self {
            options,
            constraints,
            func,
            pre_computation,
        }
    }

    fn pre_computation(constraints: &NlpSolverConstraints) -> PreComputation {
        let mut lin_equal_newton_mat: Option<Mat<f64>> = None;
        if let Some(lin_equal) = &constraints.lin_equal {
            let (constr_size, x_size) = lin_equal.mat.shape();
            let mat_size = constr_size + x_size;
            let mut m = DMatrix::zeros(mat_size, mat_size);
            m.view_range_mut(x_size..mat_size, 0..x_size)
                .copy_from(&lin_equal.mat);
            m.view_range_mut(0..x_size, x_size..mat_size)
                .copy_from(&lin_equal.mat.transpose());
            lin_equal_newton_mat = Some(m.view_range(.., ..).into_faer().to_owned());
        }
        PreComputation {
            lin_equal_newton_mat,
        }
    }

    /// Returns x that minimizes the target within the constraints, starting
    /// from a strictly feasible x0.
    pub fn minimize(&self, x0: DVector<f64>) -> Result<Solution> {
        let x0_f = x0.view_range(.., ..).into_faer().to_owned();
        if !self.feasibility_check(&x0_f) {
            return Err(Error::OptimizationFailure {
                reason: "start point violates the box bound".to_string(),
            });
        }
        self.barrier_method(x0_f)
    }

    fn barrier_method(&self, x0: Mat<f64>) -> Result<Solution> {
        let mut x = x0.clone();
        let x_size = x.nrows() as f64;
        let t0 = 200_f64.max((self.options.barrier_t0 * x_size.sqrt()).min(5e3));
        let mut t = t0;
        let mut i = 0;
        let mut newton_total = 0;
        while i < self.options.barrier_max_iter && x_size / t >= self.options.barrier_prec {
            i += 1;
            x = self.newton_method(x, t, t0, &mut newton_total)?;
            t *= self.options.barrier_mu;
        }
        if x_size / t >= self.options.barrier_prec {
            return Err(Error::OptimizationFailure {
                reason: format!(
                    "barrier method did not reach precision {} within {} iterations",
                    self.options.barrier_prec, self.options.barrier_max_iter
                ),
            });
        }
        let solution: DVector<f64> = x.as_ref().into_nalgebra().column(0).into();
        let constraint_residual = match &self.constraints.lin_equal {
            Some(lin_equal) => {
                let x0_n: DVector<f64> = x0.as_ref().into_nalgebra().column(0).into();
                (&lin_equal.mat * &solution - &lin_equal.mat * x0_n).norm()
            }
            None => 0.,
        };
        Ok(Solution {
            x: solution,
            barrier_iterations: i,
            newton_iterations: newton_total,
            constraint_residual,
        })
    }

    fn newton_method(
        &self,
        mut x: Mat<f64>,
        t: f64,
        t0: f64,
        newton_total: &mut u64,
    ) -> Result<Mat<f64>> {
        let x_size = x.nrows();
        let iter_barrier = (t / t0 / self.options.barrier_mu) as i32;

        let mut a = match &self.pre_computation.lin_equal_newton_mat {
            Some(lin_equal_newton_mat) => lin_equal_newton_mat.clone(),
            None => Mat::<f64>::zeros(x_size, x_size),
        };
        let dim = a.nrows();
        let mut b = Mat::<f64>::zeros(dim, 1);

        let mut i = 0;
        let mut crit = 0.;
        let mut backline_exceeded: bool = false;

        while i < self.options.newton_max_iter
            && (i == 0
                || crit >= self.options.newton_prec * 1_f64.max(1e4 * 2_f64.powi(-iter_barrier)))
            && !backline_exceeded
        {
            i += 1;
            let (func_val, mut func_grad, mut func_hes) = self.func.val_grad_hes(&x);
            if !func_val.is_finite() {
                return Err(Error::OptimizationFailure {
                    reason: "objective became non-finite during Newton iteration".to_string(),
                });
            }
            func_grad *= -t;
            func_hes *= t;

            if let Some(bound) = &self.constraints.bound {
                let (bound_grad, bound_hes) = self.log_barrier_bound_grad_hes(&x, bound);
                func_grad -= bound_grad;
                func_hes += bound_hes;
            }

            a.as_mut()
                .submatrix_mut(0, 0, x_size, x_size)
                .copy_from(func_hes);
            b.as_mut()
                .submatrix_mut(0, 0, x_size, 1)
                .copy_from(func_grad);
            let dx_total = a.partial_piv_lu().solve(&b);
            let dx = dx_total.submatrix(0, 0, x_size, 1).to_owned();
            crit = dx.norm_l2();

            self.backline_search(&mut x, dx, &mut backline_exceeded, func_val);
        }
        *newton_total += i;
        Ok(x)
    }

    // Backtracking line search; an exhausted search marks the stage as
    // stalled, which terminates the Newton loop at the current iterate.
    fn backline_search(
        &self,
        x: &mut Mat<f64>,
        mut dx: Mat<f64>,
        backline_exceeded: &mut bool,
        old_func_val: f64,
    ) {
        let dx_norm = dx.norm_l2();
        if dx_norm > 1. {
            dx /= dx_norm;
        }
        let mut a = self.options.backline_a;
        let mut iter = 0;
        let mut search = true;
        while iter < self.options.backline_max_iter && search {
            iter += 1;
            let x_tmp = &*x + a * &dx;
            let func_val = self.func.val(&x_tmp);
            if func_val < old_func_val && func_val.is_finite() && self.feasibility_check(&x_tmp) {
                *x = x_tmp.clone();
                search = false;
            } else {
                a *= self.options.backline_b;
            }
        }
        if iter == self.options.backline_max_iter {
            *backline_exceeded = true;
        }
    }

    fn mat_min(&self, x: &Mat<f64>) -> f64 {
        let mut min = f64::INFINITY;
        x.col_iter().for_each(|c| {
            c.iter().for_each(|&v| {
                if v < min {
                    min = v;
                }
            });
        });
        min
    }

    fn feasibility_check(&self, x: &Mat<f64>) -> bool {
        if let Some(bound) = &self.constraints.bound {
            return !(self.mat_min(&(x - &bound.lower)) < 0.
                || self.mat_min(&(&bound.upper - x)) < 0.);
        }
        true
    }

    fn log_barrier_bound_grad_hes(&self, x: &Mat<f64>, bound: &BoxBound) -> (Mat<f64>, Mat<f64>) {
        let mut grad = Mat::<f64>::zeros(x.nrows(), 1);
        zip!(&mut grad, x, &bound.lower, &bound.upper)
            .for_each(|unzip!(g, v, l, u)| *g = 1.0 / (*u - *v) + 1.0 / (*l - *v));
        let mut hes = Mat::<f64>::zeros(x.nrows(), x.nrows());
        for i in 0..hes.nrows() {
            hes[(i, i)] = 1.0 / (bound.upper[(i, 0)] - x[(i, 0)]).powi(2)
                + 1.0 / (bound.lower[(i, 0)] - x[(i, 0)]).powi(2);
        }
        (grad, hes)
    }
}
