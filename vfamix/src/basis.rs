use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};

#[cfg_attr(doc, katexit::katexit)]
/// Uniform-knot B-spline basis over a fixed interval.
///
/// The basis carries $n = q + d + 1$ functions for $q$ internal knots and
/// degree $d$, with $d + 1$ repeated knots at each boundary. Evaluation
/// clamps the input into the knot interval, so the expansion is defined on
/// all of $\mathbb R$ and constant outside the interval.
#[derive(Debug, Clone, PartialEq)]
pub struct BsplineBasis {
    knots: DVector<f64>,
    degree: usize,
    lower: f64,
    upper: f64,
}

impl BsplineBasis {
    /// Creates the basis with uniformly spaced internal knots.
    pub fn new(lower: f64, upper: f64, internal_knots: usize, degree: usize) -> Result<Self> {
        if degree < 1 {
            return Err(Error::InvalidDegree { degree });
        }
        if lower >= upper {
            return Err(Error::InvalidRange { lower, upper });
        }
        let h = (upper - lower) / (internal_knots as f64 + 1.);
        let mut knots = Vec::with_capacity(internal_knots + 2 * (degree + 1));
        knots.extend(std::iter::repeat_n(lower, degree + 1));
        knots.extend((1..=internal_knots).map(|i| lower + i as f64 * h));
        knots.extend(std::iter::repeat_n(upper, degree + 1));
        Ok(Self {
            knots: DVector::from_vec(knots),
            degree,
            lower,
            upper,
        })
    }

    /// Number of basis functions.
    pub fn num_basis(&self) -> usize {
        self.knots.len() - self.degree - 1
    }

    /// Interval the basis is built over.
    pub fn range(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Evaluates all basis functions at `x` (clamped into the interval).
    pub fn evaluate(&self, x: f64) -> DVector<f64> {
        let x = x.clamp(self.lower, self.upper);
        self.eval_degree(x, self.degree)
    }

    /// Evaluates all basis functions together with their first and second
    /// derivatives at `x` (clamped into the interval).
    pub fn evaluate_with_derivatives(&self, x: f64) -> (DVector<f64>, DVector<f64>, DVector<f64>) {
        let x = x.clamp(self.lower, self.upper);
        let n = self.num_basis();
        let d = self.degree;
        let values = self.eval_degree(x, d);

        let lower_deg = self.eval_degree(x, d - 1);
        let mut first = DVector::zeros(n);
        for i in 0..n {
            first[i] = d as f64 * (self.span_ratio(&lower_deg, i, d) - self.span_ratio(&lower_deg, i + 1, d));
        }

        let mut second = DVector::zeros(n);
        if d >= 2 {
            let lowest_deg = self.eval_degree(x, d - 2);
            let mut d_lower = DVector::zeros(n + 1);
            for i in 0..n + 1 {
                d_lower[i] = (d - 1) as f64
                    * (self.span_ratio(&lowest_deg, i, d - 1)
                        - self.span_ratio(&lowest_deg, i + 1, d - 1));
            }
            for i in 0..n {
                second[i] =
                    d as f64 * (self.span_ratio(&d_lower, i, d) - self.span_ratio(&d_lower, i + 1, d));
            }
        }
        (values, first, second)
    }

    /// Design matrix of the basis over a slice of sample points, one row
    /// per point.
    pub fn design_matrix(&self, points: &[f64]) -> DMatrix<f64> {
        let n = self.num_basis();
        let mut design = DMatrix::zeros(points.len(), n);
        for (r, &x) in points.iter().enumerate() {
            design.row_mut(r).copy_from(&self.evaluate(x).transpose());
        }
        design
    }

    // b[i] / (knots[i + d] - knots[i]), zero where the span collapses or
    // the index runs past the lower-degree basis.
    fn span_ratio(&self, b: &DVector<f64>, i: usize, d: usize) -> f64 {
        if i >= b.len() || i + d >= self.knots.len() {
            return 0.;
        }
        let span = self.knots[i + d] - self.knots[i];
        if span > 0. { b[i] / span } else { 0. }
    }

    // Cox-de Boor over the full knot vector for an arbitrary degree not
    // above self.degree.
    fn eval_degree(&self, x: f64, degree: usize) -> DVector<f64> {
        let k = &self.knots;
        let intervals = k.len() - 1;
        let mut b = DVector::<f64>::zeros(intervals);
        if x >= self.upper {
            // half-open intervals leave the upper boundary uncovered
            if let Some(i) = (0..intervals).rev().find(|&i| k[i + 1] - k[i] > 0.) {
                b[i] = 1.;
            }
        } else {
            for i in 0..intervals {
                if k[i] <= x && x < k[i + 1] {
                    b[i] = 1.;
                }
            }
        }
        for d in 1..=degree {
            let count = k.len() - d - 1;
            let mut next = DVector::<f64>::zeros(intervals);
            for i in 0..count {
                let left_span = k[i + d] - k[i];
                let right_span = k[i + d + 1] - k[i + 1];
                let mut v = 0.;
                if left_span > 0. {
                    v += (x - k[i]) / left_span * b[i];
                }
                if right_span > 0. {
                    v += (k[i + d + 1] - x) / right_span * b[i + 1];
                }
                next[i] = v;
            }
            b = next;
        }
        DVector::from_iterator(k.len() - degree - 1, b.iter().take(k.len() - degree - 1).cloned())
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Difference penalty matrix $S = D_r^T D_r$ penalizing squared r-th order
/// differences of adjacent spline coefficients.
pub fn difference_penalty(num_basis: usize, order: usize) -> Result<DMatrix<f64>> {
    if order == 0 || order >= num_basis {
        return Err(Error::InvalidPenaltyOrder { order, num_basis });
    }
    let mut d = DMatrix::<f64>::identity(num_basis, num_basis);
    for _ in 0..order {
        let rows = d.nrows() - 1;
        let diff = d.rows(1, rows) - d.rows(0, rows);
        d = diff.clone_owned();
    }
    Ok(d.transpose() * d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn partition_of_unity() -> Result<()> {
        let basis = BsplineBasis::new(-2., 2., 4, 3)?;
        assert_eq!(basis.num_basis(), 8);
        for i in 0..=100 {
            let x = -2. + 4. * i as f64 / 100.;
            let sum: f64 = basis.evaluate(x).sum();
            assert!((sum - 1.).abs() < 1e-9, "sum {sum} at {x}");
        }
        Ok(())
    }

    #[test]
    fn evaluation_clamps_outside_range() -> Result<()> {
        let basis = BsplineBasis::new(-1., 1., 3, 3)?;
        assert_eq!(basis.evaluate(-5.), basis.evaluate(-1.));
        assert_eq!(basis.evaluate(5.), basis.evaluate(1.));
        Ok(())
    }

    #[test]
    fn derivatives_match_finite_differences() -> Result<()> {
        let basis = BsplineBasis::new(0., 1., 5, 3)?;
        let h = 1e-6;
        for &x in &[0.15, 0.4, 0.77] {
            let (_, first, second) = basis.evaluate_with_derivatives(x);
            let up = basis.evaluate(x + h);
            let down = basis.evaluate(x - h);
            let mid = basis.evaluate(x);
            for i in 0..basis.num_basis() {
                let fd1 = (up[i] - down[i]) / (2. * h);
                let fd2 = (up[i] - 2. * mid[i] + down[i]) / (h * h);
                assert!((first[i] - fd1).abs() < 1e-4, "first deriv {i} at {x}");
                assert!((second[i] - fd2).abs() < 1e-2, "second deriv {i} at {x}");
            }
        }
        Ok(())
    }

    #[test]
    fn second_order_penalty_matches_reference() -> Result<()> {
        let s = difference_penalty(5, 2)?;
        let expected = DMatrix::from_row_slice(
            5,
            5,
            &[
                1., -2., 1., 0., 0., //
                -2., 5., -4., 1., 0., //
                1., -4., 6., -4., 1., //
                0., 1., -4., 5., -2., //
                0., 0., 1., -2., 1.,
            ],
        );
        assert!((s - expected).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn invalid_arguments_rejected() {
        assert_eq!(
            BsplineBasis::new(0., 1., 3, 0).unwrap_err(),
            Error::InvalidDegree { degree: 0 }
        );
        assert_eq!(
            BsplineBasis::new(1., 0., 3, 3).unwrap_err(),
            Error::InvalidRange {
                lower: 1.,
                upper: 0.
            }
        );
        assert_eq!(
            difference_penalty(4, 4).unwrap_err(),
            Error::InvalidPenaltyOrder {
                order: 4,
                num_basis: 4
            }
        );
    }
}
