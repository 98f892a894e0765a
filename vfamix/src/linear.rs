use crate::{Error, MatrixDRows, Result, stats};
use faer::{Mat, linalg::solvers::Solve};
use faer_ext::{IntoFaer, IntoNalgebra};
use nalgebra::{DMatrix, DVector, SVector};
use std::fmt::Display;

/// How the zero-sum equality constraint is imposed on the least squares
/// fit. Both strategies solve the same constrained problem exactly; the
/// choice is a capability decision made once, not an error-driven fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstraintStrategy {
    /// Solve the augmented KKT system of the equality-constrained normal
    /// equations directly.
    #[default]
    Kkt,
    /// Subtract the last (reference) coordinate from the others, drop it,
    /// and fit an unconstrained OLS on the difference features.
    Reparameterized,
}

impl Display for ConstraintStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintStrategy::Kkt => write!(f, "KKT"),
            ConstraintStrategy::Reparameterized => write!(f, "reparameterized"),
        }
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Ordinary least squares on CLR coordinates under the equality constraint
/// $\sum_i \beta_i = 0$ over the compositional coefficients (the intercept
/// is unconstrained).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstrainedLinearModel<const D: usize> {
    strategy: ConstraintStrategy,
}

impl<const D: usize> ConstrainedLinearModel<D> {
    /// Creates the model with the default (KKT) strategy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the model with the given constraint strategy.
    pub fn with_strategy(mut self, strategy: ConstraintStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fits the constrained regression of `y` on the CLR coordinates
    /// (one column of `x` per observation).
    pub fn fit(&self, x: &MatrixDRows<D>, y: &DVector<f64>) -> Result<FittedLinearModel<D>> {
        let n = x.ncols();
        if y.len() != n {
            return Err(Error::ColumnLengthMismatch {
                column: "response".to_string(),
                len: y.len(),
                expected: n,
            });
        }
        // D + 1 parameters minus one constraint
        if n <= D {
            return Err(Error::InsufficientRows { rows: n, params: D });
        }
        let (coefficients, covariance_unscaled) = match self.strategy {
            ConstraintStrategy::Kkt => Self::fit_kkt(x, y)?,
            ConstraintStrategy::Reparameterized => Self::fit_reparameterized(x, y)?,
        };
        if coefficients.iter().any(|v| !v.is_finite()) {
            return Err(Error::ConstraintInfeasible {
                reason: "singular constrained normal equations".to_string(),
            });
        }

        let fitted = Self::design(x) * &coefficients;
        let residuals = y - &fitted;
        let rss: f64 = residuals.norm_squared();
        let y_mean = y.mean();
        let tss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
        let df = (n - D) as f64;
        let sigma2 = rss / df;

        let standard_errors =
            DVector::from_iterator(D + 1, (0..D + 1).map(|i| (sigma2 * covariance_unscaled[(i, i)]).sqrt()));
        let t_values = DVector::from_iterator(
            D + 1,
            coefficients
                .iter()
                .zip(standard_errors.iter())
                .map(|(b, se)| if *se > 0. { b / se } else { f64::NAN }),
        );
        let p_values =
            DVector::from_iterator(D + 1, t_values.iter().map(|t| stats::student_t_p_value(*t, df)));

        log::debug!(
            "constrained linear fit ({}): rss {:.6e}, df {}",
            self.strategy,
            rss,
            df
        );
        Ok(FittedLinearModel {
            strategy: self.strategy,
            coefficients,
            standard_errors,
            t_values,
            p_values,
            r_squared: if tss > 0. { 1. - rss / tss } else { f64::NAN },
            residual_df: df,
            fitted,
        })
    }

    // Design matrix with intercept column: n x (D + 1).
    fn design(x: &MatrixDRows<D>) -> DMatrix<f64> {
        let n = x.ncols();
        let mut design = DMatrix::from_element(n, D + 1, 1.);
        for r in 0..n {
            for c in 0..D {
                design[(r, c + 1)] = x[(c, r)];
            }
        }
        design
    }

    // Augmented KKT system [[X'X, c], [c', 0]] with c = (0, 1, .., 1).
    fn fit_kkt(x: &MatrixDRows<D>, y: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let p = D + 1;
        let design = Self::design(x);
        let xtx = design.transpose() * &design;
        let xty = design.transpose() * y;

        let mut a = DMatrix::<f64>::zeros(p + 1, p + 1);
        a.view_range_mut(0..p, 0..p).copy_from(&xtx);
        for i in 1..p {
            a[(i, p)] = 1.;
            a[(p, i)] = 1.;
        }
        let mut b = Mat::<f64>::zeros(p + 1, 1);
        b.as_mut()
            .submatrix_mut(0, 0, p, 1)
            .copy_from(xty.view_range(.., ..).into_faer());

        let a_f = a.view_range(.., ..).into_faer().to_owned();
        let lu = a_f.partial_piv_lu();
        let sol = lu.solve(&b);
        let coefficients: DVector<f64> = sol
            .submatrix(0, 0, p, 1)
            .as_ref()
            .into_nalgebra()
            .column(0)
            .into();

        // Cov(beta) = sigma^2 * upper-left block of the inverse KKT matrix.
        let inverse = lu.solve(&Mat::<f64>::identity(p + 1, p + 1));
        let covariance: DMatrix<f64> = inverse
            .submatrix(0, 0, p, p)
            .as_ref()
            .into_nalgebra()
            .into_owned();
        Ok((coefficients, covariance))
    }

    // Exact reparameterization: gamma on (1, x_i - x_{D-1}) for i < D - 1,
    // constrained coefficients recovered from gamma afterwards.
    fn fit_reparameterized(
        x: &MatrixDRows<D>,
        y: &DVector<f64>,
    ) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let n = x.ncols();
        let mut z = DMatrix::from_element(n, D, 1.);
        for r in 0..n {
            for c in 0..D - 1 {
                z[(r, c + 1)] = x[(c, r)] - x[(D - 1, r)];
            }
        }
        let ztz = z.transpose() * &z;
        let zty = z.transpose() * y;
        let ztz_f = ztz.view_range(.., ..).into_faer().to_owned();
        let lu = ztz_f.partial_piv_lu();
        let gamma: DVector<f64> = lu
            .solve(&zty.view_range(.., ..).into_faer().to_owned())
            .as_ref()
            .into_nalgebra()
            .column(0)
            .into();
        let gamma_cov: DMatrix<f64> = lu
            .solve(&Mat::<f64>::identity(D, D))
            .as_ref()
            .into_nalgebra()
            .into_owned();

        // beta_i = gamma_{i+1}, beta_last = -sum(gamma_{1..}); the linear
        // recovery map L turns Cov(gamma) into Cov(beta) = L Cov L'.
        let mut recovery = DMatrix::<f64>::zeros(D + 1, D);
        recovery[(0, 0)] = 1.;
        for i in 0..D - 1 {
            recovery[(i + 1, i + 1)] = 1.;
            recovery[(D, i + 1)] = -1.;
        }
        let coefficients = &recovery * gamma;
        let covariance = &recovery * gamma_cov * recovery.transpose();
        Ok((coefficients, covariance))
    }
}

/// Fitted constrained regression. Immutable once fit; re-fitting creates a
/// new value.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedLinearModel<const D: usize> {
    strategy: ConstraintStrategy,
    coefficients: DVector<f64>,
    standard_errors: DVector<f64>,
    t_values: DVector<f64>,
    p_values: DVector<f64>,
    r_squared: f64,
    residual_df: f64,
    fitted: DVector<f64>,
}

impl<const D: usize> FittedLinearModel<D> {
    /// Strategy used to impose the zero-sum constraint.
    pub fn strategy(&self) -> ConstraintStrategy {
        self.strategy
    }

    /// Intercept estimate.
    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// Compositional coefficient estimates, summing to zero.
    pub fn coefficients(&self) -> SVector<f64, D> {
        SVector::from_iterator(self.coefficients.iter().skip(1).cloned())
    }

    /// Standard errors in (intercept, coefficients...) order.
    pub fn standard_errors(&self) -> &DVector<f64> {
        &self.standard_errors
    }

    /// Student-t statistics in (intercept, coefficients...) order.
    pub fn t_values(&self) -> &DVector<f64> {
        &self.t_values
    }

    /// Two-sided p-values in (intercept, coefficients...) order.
    pub fn p_values(&self) -> &DVector<f64> {
        &self.p_values
    }

    /// Coefficient of determination.
    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    /// Residual degrees of freedom.
    pub fn residual_df(&self) -> f64 {
        self.residual_df
    }

    /// Fitted values at the training points, in row order.
    pub fn fitted_values(&self) -> &DVector<f64> {
        &self.fitted
    }

    /// Predicted response at a CLR point.
    pub fn predict(&self, x: &SVector<f64, D>) -> f64 {
        self.coefficients[0]
            + x.iter()
                .enumerate()
                .map(|(i, v)| self.coefficients[i + 1] * v)
                .sum::<f64>()
    }
}

impl<const D: usize> Display for FittedLinearModel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = 52usize;
        writeln!(f, "{:-^width$}", " Constrained Linear Model ")?;
        writeln!(f, "Strategy: {}", self.strategy)?;
        writeln!(
            f,
            "{:<10}{:>10}{:>10}{:>10}{:>10}",
            "Term", "Coef", "StdErr", "t", "p"
        )?;
        for i in 0..D + 1 {
            let term = if i == 0 {
                "intercept".to_string()
            } else {
                format!("z{}", i)
            };
            writeln!(
                f,
                "{:<10}{:>10.4}{:>10.4}{:>10.3}{:>10.4}",
                term, self.coefficients[i], self.standard_errors[i], self.t_values[i], self.p_values[i]
            )?;
        }
        writeln!(f, "R-squared: {:.4}", self.r_squared)?;
        write!(f, "{:-^width$}", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClrTransform, Result};
    use nalgebra::Vector4;

    fn training_data() -> Result<(MatrixDRows<4>, DVector<f64>)> {
        let raw = [
            [14., 10., 12., 64.],
            [16., 11., 13., 60.],
            [20., 14., 11., 55.],
            [25., 15., 10., 50.],
            [30., 18., 12., 40.],
            [12., 20., 18., 50.],
            [18., 22., 15., 45.],
            [22., 12., 20., 46.],
            [28., 16., 16., 40.],
            [15., 25., 20., 40.],
            [10., 15., 25., 50.],
            [24., 20., 21., 35.],
        ];
        let transform = ClrTransform::<4>::new();
        let mut compositions = MatrixDRows::<4>::zeros(raw.len());
        for (i, row) in raw.iter().enumerate() {
            compositions.set_column(i, &Vector4::from_row_slice(row));
        }
        let clr = transform.clr_matrix(&compositions)?;
        // linear response in CLR space with a deterministic perturbation
        let y = DVector::from_iterator(
            raw.len(),
            clr.column_iter().enumerate().map(|(i, z)| {
                20. + 3. * z[0] - 1.5 * z[1] + 0.5 * z[2] - 2. * z[3] + 0.1 * (i as f64).sin()
            }),
        );
        Ok((clr, y))
    }

    #[test]
    fn coefficients_sum_to_zero() -> Result<()> {
        let (x, y) = training_data()?;
        let fit = ConstrainedLinearModel::<4>::new().fit(&x, &y)?;
        assert!(fit.coefficients().sum().abs() < 1e-8);
        assert!(fit.r_squared() > 0.9 && fit.r_squared() <= 1.);
        Ok(())
    }

    #[test]
    fn strategies_are_equivalent() -> Result<()> {
        let (x, y) = training_data()?;
        let kkt = ConstrainedLinearModel::<4>::new().fit(&x, &y)?;
        let repar = ConstrainedLinearModel::<4>::new()
            .with_strategy(ConstraintStrategy::Reparameterized)
            .fit(&x, &y)?;
        assert_eq!(kkt.strategy(), ConstraintStrategy::Kkt);
        assert_eq!(repar.strategy(), ConstraintStrategy::Reparameterized);
        assert!(kkt.fitted_values().relative_eq(repar.fitted_values(), 1e-6, 1e-6));
        assert!(
            kkt.coefficients().relative_eq(&repar.coefficients(), 1e-6, 1e-6),
            "kkt {:?} vs repar {:?}",
            kkt.coefficients(),
            repar.coefficients()
        );
        assert!((kkt.r_squared() - repar.r_squared()).abs() < 1e-9);
        for i in 0..5 {
            assert!((kkt.standard_errors()[i] - repar.standard_errors()[i]).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn too_few_rows_rejected() -> Result<()> {
        let (x, y) = training_data()?;
        let x_small: MatrixDRows<4> = x.columns(0, 4).clone_owned();
        let y_small = y.rows(0, 4).clone_owned();
        assert_eq!(
            ConstrainedLinearModel::<4>::new().fit(&x_small, &y_small),
            Err(Error::InsufficientRows { rows: 4, params: 4 })
        );
        Ok(())
    }

    #[test]
    fn prediction_matches_fitted_values() -> Result<()> {
        let (x, y) = training_data()?;
        let fit = ConstrainedLinearModel::<4>::new().fit(&x, &y)?;
        for (i, col) in x.column_iter().enumerate() {
            let p = fit.predict(&col.into());
            assert!((p - fit.fitted_values()[i]).abs() < 1e-9);
        }
        Ok(())
    }
}
