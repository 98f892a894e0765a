use crate::{Error, MatrixDRows, Result};
use nalgebra::SVector;

#[cfg_attr(doc, katexit::katexit)]
/// Centered log-ratio transform between compositions and unconstrained
/// coordinates.
///
/// The forward map takes a composition $c \in \mathbb R_{>0}^D$ to $z_i =
/// \log(c_i / g(c))$ with the geometric mean $g(c) = \exp(\frac 1D \sum_i
/// \log c_i)$, so that $\sum_i z_i = 0$ and any positive rescaling of $c$
/// maps to the same point. The inverse map returns proportions $p_i =
/// \exp(z_i) / \sum_j \exp(z_j)$ summing to one.
///
/// Components are clamped to `epsilon` before taking logs; rows containing
/// non-finite values are rejected rather than propagated as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ClrTransform<const D: usize> {
    epsilon: f64,
}

impl<const D: usize> Default for ClrTransform<D> {
    fn default() -> Self {
        Self { epsilon: 1e-9 }
    }
}

impl<const D: usize> ClrTransform<D> {
    /// Creates the transform with the default clamp epsilon of 1e-9.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the transform with the given clamp epsilon.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Clamp epsilon applied to each component before taking logs.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Forward map of a single composition to CLR coordinates.
    pub fn clr(&self, composition: &SVector<f64, D>) -> Result<SVector<f64, D>> {
        self.clr_row(composition, 0)
    }

    /// Inverse map of CLR coordinates to proportions summing to one.
    pub fn proportions(&self, clr: &SVector<f64, D>) -> SVector<f64, D> {
        let exp = clr.map(f64::exp);
        exp / exp.sum()
    }

    /// Row-wise forward map over a batch of compositions, preserving column
    /// order. The first invalid column aborts the batch with its index.
    pub fn clr_matrix(&self, compositions: &MatrixDRows<D>) -> Result<MatrixDRows<D>> {
        let mut out = compositions.clone_owned();
        for (row, mut col) in out.column_iter_mut().enumerate() {
            let z = self.clr_row(&col.clone_owned(), row)?;
            col.copy_from(&z);
        }
        Ok(out)
    }

    fn clr_row(&self, composition: &SVector<f64, D>, row: usize) -> Result<SVector<f64, D>> {
        for (component, v) in composition.iter().enumerate() {
            if !v.is_finite() {
                return Err(Error::InvalidComposition { row, component });
            }
        }
        let logs = composition.map(|v| v.max(self.epsilon).ln());
        let log_gmean = logs.mean();
        Ok(logs.map(|l| l - log_gmean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use nalgebra::Vector4;

    const EQ_EPS: f64 = 1e-9;

    #[test]
    fn clr_sums_to_zero() -> Result<()> {
        let t = ClrTransform::<4>::new();
        let c = Vector4::new(14., 10., 12., 64.);
        let z = t.clr(&c)?;
        assert!(z.sum().abs() < EQ_EPS);
        Ok(())
    }

    #[test]
    fn clr_scale_invariant() -> Result<()> {
        let t = ClrTransform::<4>::new();
        let c = Vector4::new(14., 10., 12., 64.);
        let z = t.clr(&c)?;
        let z_scaled = t.clr(&(c * 3.5))?;
        assert!(z.relative_eq(&z_scaled, 1e-12, 1e-12));
        Ok(())
    }

    #[test]
    fn round_trip_proportional() -> Result<()> {
        let t = ClrTransform::<4>::new();
        let c = Vector4::new(16., 11., 13., 60.);
        let p = t.proportions(&t.clr(&c)?);
        assert!((p.sum() - 1.).abs() < EQ_EPS);
        // p must be a positive rescaling of c
        let scale = p[0] / c[0];
        for i in 0..4 {
            assert!((p[i] - scale * c[i]).abs() < EQ_EPS);
        }
        Ok(())
    }

    #[test]
    fn zero_component_clamped() -> Result<()> {
        let t = ClrTransform::<4>::new().with_epsilon(1e-6);
        let c = Vector4::new(0., 10., 12., 64.);
        let z = t.clr(&c)?;
        assert!(z.iter().all(|v| v.is_finite()));
        assert!(z.sum().abs() < EQ_EPS);
        Ok(())
    }

    #[test]
    fn nan_component_rejected() -> Result<()> {
        let t = ClrTransform::<4>::new();
        let c = Vector4::new(14., f64::NAN, 12., 64.);
        let err = t.clr(&c);
        assert_eq!(
            err,
            Err(Error::InvalidComposition {
                row: 0,
                component: 1
            })
        );
        Ok(())
    }

    #[test]
    fn batch_preserves_order_and_reports_row() -> Result<()> {
        let t = ClrTransform::<4>::new();
        let data = MatrixDRows::<4>::from_vec(vec![
            14., 10., 12., 64., //
            16., 11., 13., 60.,
        ]);
        let z = t.clr_matrix(&data)?;
        assert_eq!(z.column(0).clone_owned(), t.clr(&data.column(0).into())?);
        assert_eq!(z.column(1).clone_owned(), t.clr(&data.column(1).into())?);

        let bad = MatrixDRows::<4>::from_vec(vec![
            14., 10., 12., 64., //
            16., f64::NAN, 13., 60.,
        ]);
        assert_eq!(
            t.clr_matrix(&bad),
            Err(Error::InvalidComposition {
                row: 1,
                component: 1
            })
        );
        Ok(())
    }
}
