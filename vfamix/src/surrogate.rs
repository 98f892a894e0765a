use crate::{
    Error, MatrixDRows, Result,
    basis::{BsplineBasis, difference_penalty},
    stats,
};
use faer::{Mat, linalg::solvers::Solve};
use faer_ext::{IntoFaer, IntoNalgebra};
use nalgebra::{DMatrix, DVector, SMatrix, SVector};
use rayon::prelude::*;
use std::fmt::Display;

/// Log-spaced smoothing strength candidates between `lower` and `upper`.
pub fn lambda_grid(lower: f64, upper: f64, count: usize) -> Vec<f64> {
    match count {
        0 => vec![],
        1 => vec![lower],
        _ => {
            let log_lo = lower.ln();
            let step = (upper.ln() - log_lo) / (count as f64 - 1.);
            (0..count)
                .map(|i| (log_lo + i as f64 * step).exp())
                .collect()
        }
    }
}

/// Configuration of [SplineSurrogateModel].
#[derive(Debug, Clone, PartialEq)]
pub struct SurrogateConfig {
    /// Internal knots per univariate term.
    pub internal_knots: usize,
    /// Spline degree.
    pub degree: usize,
    /// Difference penalty order.
    pub penalty_order: usize,
    /// Smoothing strength candidates shared by all terms.
    pub lambda_grid: Vec<f64>,
    /// Interval every per-term basis must cover in addition to the data
    /// range, so the surrogate stays smooth over the optimizer's box.
    pub coverage: (f64, f64),
    /// Ridge added to the penalized normal equations as a numerical
    /// stabilizer for small samples.
    pub ridge: f64,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        Self {
            internal_knots: 4,
            degree: 3,
            penalty_order: 2,
            lambda_grid: lambda_grid(1e-3, 10., 50),
            coverage: (-2., 2.),
            ridge: 1e-8,
        }
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Additive penalized spline regression over the CLR coordinates.
///
/// One univariate smooth $s_j$ is fit per coordinate, $y \approx \sum_j
/// s_j(z_j)$, without a global intercept (it is redundant under the
/// zero-sum CLR constraint). Each term's smoothing strength is selected
/// from the candidate grid by generalized cross validation,
/// $\mathrm{GCV}(\lambda) = n \cdot \mathrm{RSS} / (n -
/// \mathrm{edf})^2$, in a deterministic coordinate-wise pass with ties
/// broken toward the earlier candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplineSurrogateModel<const D: usize> {
    config: SurrogateConfig,
}

impl<const D: usize> SplineSurrogateModel<D> {
    /// Creates the model with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the model with the given configuration.
    pub fn with_config(mut self, config: SurrogateConfig) -> Self {
        self.config = config;
        self
    }

    /// Fits the additive surface to the CLR coordinates (one column of `x`
    /// per observation) and the response `y`.
    pub fn fit(&self, x: &MatrixDRows<D>, y: &DVector<f64>) -> Result<FittedSurrogate<D>> {
        let n = x.ncols();
        if y.len() != n {
            return Err(Error::ColumnLengthMismatch {
                column: "response".to_string(),
                len: y.len(),
                expected: n,
            });
        }
        if self.config.lambda_grid.is_empty() {
            return Err(Error::EmptyLambdaGrid);
        }
        if n <= D {
            return Err(Error::InsufficientRows { rows: n, params: D });
        }

        let mut bases = Vec::with_capacity(D);
        for j in 0..D {
            let row = x.row(j);
            let lo = row.min().min(self.config.coverage.0);
            let hi = row.max().max(self.config.coverage.1);
            bases.push(BsplineBasis::new(
                lo,
                hi,
                self.config.internal_knots,
                self.config.degree,
            )?);
        }
        let m = bases[0].num_basis();
        let penalty = difference_penalty(m, self.config.penalty_order)?;

        // stacked design: one m-column block per term
        let mut design = DMatrix::<f64>::zeros(n, D * m);
        for (j, basis) in bases.iter().enumerate() {
            let points: Vec<f64> = x.row(j).iter().cloned().collect();
            design
                .view_range_mut(.., j * m..(j + 1) * m)
                .copy_from(&basis.design_matrix(&points));
        }
        let btb = design.transpose() * &design;
        let bty = design.transpose() * y;

        let workspace = FitWorkspace {
            n,
            m,
            design: &design,
            btb: &btb,
            bty: &bty,
            penalty: &penalty,
            y,
            ridge: self.config.ridge,
        };

        // deterministic coordinate-wise GCV pass, starting from the
        // stiffest candidate for every term
        let grid = &self.config.lambda_grid;
        let mut lambdas = vec![grid[grid.len() - 1]; D];
        for j in 0..D {
            let scored: Vec<f64> = grid
                .par_iter()
                .map(|&candidate| {
                    let mut trial = lambdas.clone();
                    trial[j] = candidate;
                    workspace.penalized_fit(&trial).gcv
                })
                .collect();
            let mut best = 0;
            for (gi, gcv) in scored.iter().enumerate() {
                if *gcv < scored[best] {
                    best = gi;
                }
            }
            lambdas[j] = grid[best];
        }

        let final_fit = workspace.penalized_fit(&lambdas);
        if !final_fit.gcv.is_finite() {
            return Err(Error::ConstraintInfeasible {
                reason: "penalized normal equations are singular".to_string(),
            });
        }
        log::info!(
            "surrogate fit: lambdas {:?}, edf {:.3}, gcv {:.6e}",
            lambdas,
            final_fit.edf_total,
            final_fit.gcv
        );

        let sigma2 = final_fit.rss / (n as f64 - final_fit.edf_total);
        let mut coefficients = Vec::with_capacity(D);
        let mut term_f = Vec::with_capacity(D);
        let mut term_p = Vec::with_capacity(D);
        for j in 0..D {
            let c_j: DVector<f64> = final_fit.coefficients.rows(j * m, m).clone_owned();
            let contribution = design.view_range(.., j * m..(j + 1) * m) * &c_j;
            // approximate significance of the term's contribution
            let f_stat = if final_fit.edf[j] > 0. && sigma2 > 0. {
                (contribution.norm_squared() / final_fit.edf[j]) / sigma2
            } else {
                f64::NAN
            };
            term_f.push(f_stat);
            term_p.push(stats::f_p_value(
                f_stat,
                final_fit.edf[j],
                n as f64 - final_fit.edf_total,
            ));
            coefficients.push(c_j);
        }

        Ok(FittedSurrogate {
            bases,
            coefficients,
            lambdas,
            edf: final_fit.edf,
            edf_total: final_fit.edf_total,
            gcv: final_fit.gcv,
            term_f,
            term_p,
        })
    }
}

struct FitWorkspace<'a> {
    n: usize,
    m: usize,
    design: &'a DMatrix<f64>,
    btb: &'a DMatrix<f64>,
    bty: &'a DVector<f64>,
    penalty: &'a DMatrix<f64>,
    y: &'a DVector<f64>,
    ridge: f64,
}

struct PenalizedFit {
    coefficients: DVector<f64>,
    edf: Vec<f64>,
    edf_total: f64,
    rss: f64,
    gcv: f64,
}

impl FitWorkspace<'_> {
    fn penalized_fit(&self, lambdas: &[f64]) -> PenalizedFit {
        let p = self.btb.nrows();
        let mut a = self.btb.clone();
        for (j, &lambda) in lambdas.iter().enumerate() {
            let offset = j * self.m;
            for r in 0..self.m {
                for c in 0..self.m {
                    a[(offset + r, offset + c)] += lambda * self.penalty[(r, c)];
                }
            }
        }
        for i in 0..p {
            a[(i, i)] += self.ridge;
        }
        let a_f = a.view_range(.., ..).into_faer().to_owned();
        let lu = a_f.partial_piv_lu();
        let coefficients: DVector<f64> = lu
            .solve(&self.bty.view_range(.., ..).into_faer().to_owned())
            .as_ref()
            .into_nalgebra()
            .column(0)
            .into();

        // edf = tr(A^-1 B'B), accumulated per term block
        let hat_core = lu.solve(&self.btb.view_range(.., ..).into_faer().to_owned());
        let num_terms = lambdas.len();
        let mut edf = vec![0.; num_terms];
        for j in 0..num_terms {
            for i in 0..self.m {
                edf[j] += hat_core[(j * self.m + i, j * self.m + i)];
            }
        }
        let edf_total: f64 = edf.iter().sum();

        let fitted = self.design * &coefficients;
        let rss = (self.y - fitted).norm_squared();
        let denom = self.n as f64 - edf_total;
        let gcv = if denom > 1e-6 && coefficients.iter().all(|v| v.is_finite()) {
            self.n as f64 * rss / denom.powi(2)
        } else {
            f64::INFINITY
        };
        PenalizedFit {
            coefficients,
            edf,
            edf_total,
            rss,
            gcv,
        }
    }
}

/// Fitted additive spline surface. Immutable once fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedSurrogate<const D: usize> {
    bases: Vec<BsplineBasis>,
    coefficients: Vec<DVector<f64>>,
    lambdas: Vec<f64>,
    edf: Vec<f64>,
    edf_total: f64,
    gcv: f64,
    term_f: Vec<f64>,
    term_p: Vec<f64>,
}

impl<const D: usize> FittedSurrogate<D> {
    /// Chosen smoothing strength per term.
    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    /// Effective degrees of freedom per term.
    pub fn edf(&self) -> &[f64] {
        &self.edf
    }

    /// Total effective degrees of freedom.
    pub fn edf_total(&self) -> f64 {
        self.edf_total
    }

    /// Generalized cross validation score of the retained fit.
    pub fn gcv(&self) -> f64 {
        self.gcv
    }

    /// Approximate per-term p-values.
    pub fn term_p_values(&self) -> &[f64] {
        &self.term_p
    }

    /// Predicted response at a single CLR point.
    pub fn predict(&self, x: &SVector<f64, D>) -> f64 {
        (0..D)
            .map(|j| self.bases[j].evaluate(x[j]).dot(&self.coefficients[j]))
            .sum()
    }

    /// Predicted responses for a batch of CLR points (one per column),
    /// numerically identical to repeated single-point evaluation.
    pub fn predict_matrix(&self, x: &MatrixDRows<D>) -> DVector<f64> {
        DVector::from_iterator(
            x.ncols(),
            x.column_iter().map(|col| self.predict(&col.into())),
        )
    }

    /// Evaluates one smooth term in isolation over the given points.
    pub fn partial_dependence(&self, term: usize, points: &[f64]) -> Result<Vec<f64>> {
        if term >= D {
            return Err(Error::UnknownComponent {
                index: term,
                dimension: D,
            });
        }
        Ok(points
            .iter()
            .map(|&p| self.bases[term].evaluate(p).dot(&self.coefficients[term]))
            .collect())
    }

    /// Value, gradient and diagonal hessian of the predicted surface at a
    /// CLR point; the additive structure makes both analytic.
    pub fn val_grad_hes(&self, x: &SVector<f64, D>) -> (f64, SVector<f64, D>, SMatrix<f64, D, D>) {
        let mut val = 0.;
        let mut grad = SVector::<f64, D>::zeros();
        let mut hes = SMatrix::<f64, D, D>::zeros();
        for j in 0..D {
            let (b, db, d2b) = self.bases[j].evaluate_with_derivatives(x[j]);
            val += b.dot(&self.coefficients[j]);
            grad[j] = db.dot(&self.coefficients[j]);
            hes[(j, j)] = d2b.dot(&self.coefficients[j]);
        }
        (val, grad, hes)
    }
}

impl<const D: usize> Display for FittedSurrogate<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = 52usize;
        writeln!(f, "{:-^width$}", " Spline Surrogate Model ")?;
        writeln!(
            f,
            "{:<8}{:>12}{:>10}{:>10}{:>10}",
            "Term", "Lambda", "EDF", "F", "p"
        )?;
        for j in 0..D {
            writeln!(
                f,
                "{:<8}{:>12.4e}{:>10.3}{:>10.3}{:>10.4}",
                format!("s(z{})", j + 1),
                self.lambdas[j],
                self.edf[j],
                self.term_f[j],
                self.term_p[j]
            )?;
        }
        writeln!(f, "Total EDF: {:.3}  GCV: {:.6e}", self.edf_total, self.gcv)?;
        write!(f, "{:-^width$}", "")
    }
}

/// Negated view of a fitted surrogate, the minimization target used to
/// maximize the predicted response.
pub struct NegatedSurrogate<const D: usize> {
    model: std::sync::Arc<FittedSurrogate<D>>,
}

impl<const D: usize> NegatedSurrogate<D> {
    /// Wraps the model for maximization by the NLP solver.
    pub fn new(model: std::sync::Arc<FittedSurrogate<D>>) -> Self {
        Self { model }
    }
}

impl<const D: usize> crate::solver::NlpFunctionTarget for NegatedSurrogate<D> {
    fn val(&self, x: &Mat<f64>) -> f64 {
        use crate::IntoSVector;
        -self.model.predict(&x.into_svector())
    }

    fn val_grad(&self, x: &Mat<f64>) -> (f64, Mat<f64>) {
        let (val, grad, _) = self.val_grad_hes(x);
        (val, grad)
    }

    fn val_grad_hes(&self, x: &Mat<f64>) -> (f64, Mat<f64>, Mat<f64>) {
        use crate::IntoSVector;
        let (val, grad, hes) = self.model.val_grad_hes(&x.into_svector());
        let mut grad_m = Mat::<f64>::zeros(D, 1);
        let mut hes_m = Mat::<f64>::zeros(D, D);
        for i in 0..D {
            grad_m[(i, 0)] = -grad[i];
            for j in 0..D {
                hes_m[(i, j)] = -hes[(i, j)];
            }
        }
        (-val, grad_m, hes_m)
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
            [26., 13., 14., 47.],
            [19., 17., 19., 45.],
            [21., 19., 13., 47.],
        ];
        let transform = ClrTransform::<4>::new();
        let mut compositions = MatrixDRows::<4>::zeros(raw.len());
        for (i, row) in raw.iter().enumerate() {
            compositions.set_column(i, &Vector4::from_row_slice(row));
        }
        let clr = transform.clr_matrix(&compositions)?;
        let y = DVector::from_iterator(
            raw.len(),
            clr.column_iter()
                .map(|z| 25. + 4. * z[0] - 2. * z[0] * z[0] - 1.2 * z[1] + 0.8 * z[2] - z[3]),
        );
        Ok((clr, y))
    }

    #[test]
    fn lambda_grid_is_log_spaced() {
        let grid = lambda_grid(1e-3, 10., 50);
        assert_eq!(grid.len(), 50);
        assert!((grid[0] - 1e-3).abs() < 1e-12);
        assert!((grid[49] - 10.).abs() < 1e-9);
        let r0 = grid[1] / grid[0];
        let r1 = grid[25] / grid[24];
        assert!((r0 - r1).abs() < 1e-9);
    }

    #[test]
    fn fit_selects_lambdas_from_grid() -> Result<()> {
        let (x, y) = training_data()?;
        let model = SplineSurrogateModel::<4>::new();
        let fit = model.fit(&x, &y)?;
        let grid = SurrogateConfig::default().lambda_grid;
        for lambda in fit.lambdas() {
            assert!(grid.iter().any(|g| (g - lambda).abs() < 1e-15));
        }
        assert!(fit.edf_total() > 0. && fit.edf_total() < x.ncols() as f64);
        assert!(fit.gcv().is_finite());
        Ok(())
    }

    #[test]
    fn fit_is_deterministic() -> Result<()> {
        let (x, y) = training_data()?;
        let model = SplineSurrogateModel::<4>::new();
        let a = model.fit(&x, &y)?;
        let b = model.fit(&x, &y)?;
        assert_eq!(a.lambdas(), b.lambdas());
        assert_eq!(a.coefficients, b.coefficients);
        Ok(())
    }

    #[test]
    fn batch_prediction_matches_single_points() -> Result<()> {
        let (x, y) = training_data()?;
        let fit = SplineSurrogateModel::<4>::new().fit(&x, &y)?;
        let batch = fit.predict_matrix(&x);
        for (i, col) in x.column_iter().enumerate() {
            assert_eq!(batch[i], fit.predict(&col.into()));
        }
        Ok(())
    }

    #[test]
    fn partial_dependence_sums_to_prediction() -> Result<()> {
        let (x, y) = training_data()?;
        let fit = SplineSurrogateModel::<4>::new().fit(&x, &y)?;
        let point: SVector<f64, 4> = x.column(3).into();
        let total: f64 = (0..4)
            .map(|j| fit.partial_dependence(j, &[point[j]]).unwrap()[0])
            .sum();
        assert!((total - fit.predict(&point)).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn gradient_matches_finite_differences() -> Result<()> {
        let (x, y) = training_data()?;
        let fit = SplineSurrogateModel::<4>::new().fit(&x, &y)?;
        let p: SVector<f64, 4> = x.column(5).into();
        let (_, grad, _) = fit.val_grad_hes(&p);
        let h = 1e-6;
        for j in 0..4 {
            let mut up = p;
            up[j] += h;
            let mut down = p;
            down[j] -= h;
            let fd = (fit.predict(&up) - fit.predict(&down)) / (2. * h);
            assert!((grad[j] - fd).abs() < 1e-4, "term {j}: {} vs {}", grad[j], fd);
        }
        Ok(())
    }

    #[test]
    fn empty_grid_rejected() -> Result<()> {
        let (x, y) = training_data()?;
        let config = SurrogateConfig {
            lambda_grid: vec![],
            ..Default::default()
        };
        let result = SplineSurrogateModel::<4>::new().with_config(config).fit(&x, &y);
        assert_eq!(result.unwrap_err(), Error::EmptyLambdaGrid);
        Ok(())
    }
}
