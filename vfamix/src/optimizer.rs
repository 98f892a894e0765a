use crate::{
    ClrTransform, Error, Result,
    solver::{
        BoxBound, LinearEqualityConstraint, NlpSolver, NlpSolverConstraints, NlpSolverOptions,
    },
    surrogate::{FittedSurrogate, NegatedSurrogate},
};
use nalgebra::{DMatrix, DVector, SVector};
use std::fmt::Display;
use std::sync::Arc;

#[cfg_attr(doc, katexit::katexit)]
/// Searches the CLR simplex image for the composition that maximizes a
/// fitted surrogate's predicted response.
///
/// The search runs in CLR coordinates under the zero-sum constraint
/// $\sum_j z_j = 0$ and a componentwise box bound. The start point is the
/// barycenter $z = 0$, which satisfies the constraint exactly and lies in
/// the interior of the default box.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionOptimizer<const D: usize> {
    lower: SVector<f64, D>,
    upper: SVector<f64, D>,
    start: SVector<f64, D>,
}

impl<const D: usize> Default for CompositionOptimizer<D> {
    fn default() -> Self {
        Self {
            lower: SVector::from_element(-2.),
            upper: SVector::from_element(2.),
            start: SVector::zeros(),
        }
    }
}

impl<const D: usize> CompositionOptimizer<D> {
    /// Creates the optimizer with the default box of ±2 around the
    /// barycenter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the optimizer with custom CLR bounds. Fails when a lower
    /// bound does not lie strictly below its upper bound or the start
    /// point leaves the interior of the box.
    pub fn with_bounds(mut self, lower: SVector<f64, D>, upper: SVector<f64, D>) -> Result<Self> {
        for j in 0..D {
            if !(lower[j] < upper[j]) {
                return Err(Error::InvalidRange {
                    lower: lower[j],
                    upper: upper[j],
                });
            }
            if self.start[j] <= lower[j] || self.start[j] >= upper[j] {
                return Err(Error::ConstraintInfeasible {
                    reason: format!(
                        "start coordinate {} = {} outside the open interval ({}, {})",
                        j, self.start[j], lower[j], upper[j]
                    ),
                });
            }
        }
        self.lower = lower;
        self.upper = upper;
        Ok(self)
    }

    /// Returns the optimizer with a custom zero-sum start point. Fails
    /// when the point does not sum to zero or leaves the interior of the
    /// current box.
    pub fn with_start(mut self, start: SVector<f64, D>) -> Result<Self> {
        if start.sum().abs() > 1e-9 {
            return Err(Error::ConstraintInfeasible {
                reason: format!("start point sums to {} instead of zero", start.sum()),
            });
        }
        for j in 0..D {
            if start[j] <= self.lower[j] || start[j] >= self.upper[j] {
                return Err(Error::ConstraintInfeasible {
                    reason: format!(
                        "start coordinate {} = {} outside the open interval ({}, {})",
                        j, start[j], self.lower[j], self.upper[j]
                    ),
                });
            }
        }
        self.start = start;
        Ok(self)
    }

    /// Maximizes the surrogate's prediction and maps the optimum back to
    /// proportions.
    pub fn maximize(
        &self,
        model: Arc<FittedSurrogate<D>>,
        transform: &ClrTransform<D>,
    ) -> Result<Optimum<D>> {
        let constraints = NlpSolverConstraints {
            bound: Some(BoxBound::new(
                DVector::from_column_slice(self.lower.as_slice()),
                DVector::from_column_slice(self.upper.as_slice()),
            )),
            lin_equal: Some(LinearEqualityConstraint {
                mat: DMatrix::from_element(1, D, 1.),
            }),
        };
        let solver = NlpSolver::new(
            NlpSolverOptions::new(),
            constraints,
            Arc::new(NegatedSurrogate::new(model.clone())),
        );
        let solution = solver.minimize(DVector::from_column_slice(self.start.as_slice()))?;

        let clr = SVector::<f64, D>::from_column_slice(solution.x.as_slice());
        if clr.sum().abs() > 1e-6 {
            return Err(Error::OptimizationFailure {
                reason: format!("optimum drifted off the zero-sum constraint by {}", clr.sum()),
            });
        }
        let predicted = model.predict(&clr);
        if !predicted.is_finite() {
            return Err(Error::OptimizationFailure {
                reason: "surrogate prediction at the optimum is not finite".to_string(),
            });
        }
        log::debug!(
            "optimum after {} barrier / {} newton iterations: {:?}",
            solution.barrier_iterations,
            solution.newton_iterations,
            clr.as_slice()
        );
        Ok(Optimum {
            clr,
            proportions: transform.proportions(&clr),
            predicted,
            barrier_iterations: solution.barrier_iterations,
            newton_iterations: solution.newton_iterations,
        })
    }
}

/// Constrained optimum of a fitted surrogate.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimum<const D: usize> {
    /// CLR coordinates of the optimum, summing to zero.
    pub clr: SVector<f64, D>,
    /// Composition proportions at the optimum, summing to one.
    pub proportions: SVector<f64, D>,
    /// Predicted response at the optimum.
    pub predicted: f64,
    /// Outer (barrier) iterations used by the solver.
    pub barrier_iterations: u64,
    /// Total Newton iterations used by the solver.
    pub newton_iterations: u64,
}

impl<const D: usize> Display for Optimum<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = 40usize;
        writeln!(f, "{:-^width$}", " Optimal Composition ")?;
        writeln!(f, "{:<12}{:>12}{:>14}", "Component", "CLR", "Proportion")?;
        for j in 0..D {
            writeln!(
                f,
                "{:<12}{:>12.4}{:>14.4}",
                format!("z{}", j + 1),
                self.clr[j],
                self.proportions[j]
            )?;
        }
        writeln!(f, "Predicted response: {:.4}", self.predicted)?;
        write!(f, "{:-^width$}", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surrogate::SplineSurrogateModel;
    use crate::{MatrixDRows, Result};
    use nalgebra::Vector4;

    fn fitted_model() -> Result<Arc<FittedSurrogate<4>>> {
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
        // concave in every coordinate, so the constrained optimum is interior
        let y = nalgebra::DVector::from_iterator(
            raw.len(),
            clr.column_iter().map(|z| {
                30. - (z[0] - 0.2).powi(2) - (z[1] + 0.1).powi(2) - z[2].powi(2) - z[3].powi(2)
            }),
        );
        Ok(Arc::new(SplineSurrogateModel::<4>::new().fit(&clr, &y)?))
    }

    #[test]
    fn optimum_satisfies_constraints() -> Result<()> {
        let model = fitted_model()?;
        let transform = ClrTransform::<4>::new();
        let optimum = CompositionOptimizer::new().maximize(model, &transform)?;
        assert!(optimum.clr.sum().abs() < 1e-6);
        assert!((optimum.proportions.sum() - 1.).abs() < 1e-12);
        for j in 0..4 {
            assert!(optimum.clr[j] > -2. && optimum.clr[j] < 2.);
            assert!(optimum.proportions[j] > 0.);
        }
        assert!(optimum.predicted.is_finite());
        Ok(())
    }

    #[test]
    fn optimum_beats_barycenter() -> Result<()> {
        let model = fitted_model()?;
        let transform = ClrTransform::<4>::new();
        let barycenter = model.predict(&SVector::zeros());
        let optimum = CompositionOptimizer::new().maximize(model, &transform)?;
        assert!(optimum.predicted >= barycenter - 1e-8);
        Ok(())
    }

    #[test]
    fn degenerate_bounds_rejected() {
        let result = CompositionOptimizer::<4>::new().with_bounds(
            SVector::from_element(1.),
            SVector::from_element(1.),
        );
        assert!(matches!(result, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn off_constraint_start_rejected() {
        let result =
            CompositionOptimizer::<4>::new().with_start(SVector::from_element(0.5));
        assert!(matches!(result, Err(Error::ConstraintInfeasible { .. })));
    }
}
