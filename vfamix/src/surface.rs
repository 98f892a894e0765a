use crate::{ClrTransform, Error, Result, surrogate::FittedSurrogate};
use nalgebra::{DMatrix, SVector};
use rayon::prelude::*;
use std::fmt::Display;

/// Evenly spaced sampling interval of a grid dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    /// Lowest sampled mass.
    pub lower: f64,
    /// Highest sampled mass.
    pub upper: f64,
    /// Number of sample points, at least two.
    pub points: usize,
}

impl Axis {
    /// Creates the axis; validation happens when the request is sampled.
    pub fn new(lower: f64, upper: f64, points: usize) -> Self {
        Self {
            lower,
            upper,
            points,
        }
    }

    fn validate(&self, name: &'static str) -> Result<()> {
        if !(self.lower < self.upper) {
            return Err(Error::InvalidRange {
                lower: self.lower,
                upper: self.upper,
            });
        }
        if self.points < 2 {
            return Err(Error::MinGridPoints {
                axis: name,
                points: self.points,
                ge_points: 2,
            });
        }
        Ok(())
    }

    /// Axis spanning a relative deviation around a center level, e.g.
    /// `deviation = 0.1` sweeps ±10% of `center`.
    pub fn around(center: f64, deviation: f64, points: usize) -> Self {
        Self {
            lower: center * (1. - deviation),
            upper: center * (1. + deviation),
            points,
        }
    }

    /// The sampled mass levels, endpoints included.
    pub fn levels(&self) -> Vec<f64> {
        let step = (self.upper - self.lower) / (self.points as f64 - 1.);
        (0..self.points)
            .map(|i| self.lower + i as f64 * step)
            .collect()
    }
}

/// Grid request for a two-component response surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceRequest<const D: usize> {
    /// Component varied along the x axis.
    pub x_component: usize,
    /// Component varied along the y axis.
    pub y_component: usize,
    /// Mass levels of the x component.
    pub x_axis: Axis,
    /// Mass levels of the y component.
    pub y_axis: Axis,
    /// Baseline composition that apportions the remaining mass.
    pub baseline: SVector<f64, D>,
    /// Total mass every sampled composition must conserve.
    pub total_mass: f64,
}

impl<const D: usize> SurfaceRequest<D> {
    fn validate(&self) -> Result<()> {
        for index in [self.x_component, self.y_component] {
            if index >= D {
                return Err(Error::UnknownComponent {
                    index,
                    dimension: D,
                });
            }
        }
        if self.x_component == self.y_component {
            return Err(Error::DuplicateAxis {
                index: self.x_component,
            });
        }
        self.x_axis.validate("x")?;
        self.y_axis.validate("y")
    }
}

/// One-dimensional sweep of a single component's mass.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityRequest<const D: usize> {
    /// Component varied along the sweep.
    pub component: usize,
    /// Mass levels of the varied component.
    pub axis: Axis,
    /// Baseline composition that apportions the remaining mass.
    pub baseline: SVector<f64, D>,
    /// Total mass every sampled composition must conserve.
    pub total_mass: f64,
}

impl<const D: usize> SensitivityRequest<D> {
    fn validate(&self) -> Result<()> {
        if self.component >= D {
            return Err(Error::UnknownComponent {
                index: self.component,
                dimension: D,
            });
        }
        self.axis.validate("sensitivity")
    }
}

/// Sampled two-component response surface. Cells whose fixed masses
/// exceed the total mass are infeasible and hold NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSurface {
    /// Mass levels along the x axis.
    pub x_levels: Vec<f64>,
    /// Mass levels along the y axis.
    pub y_levels: Vec<f64>,
    /// Predicted responses, row i column j belonging to
    /// `(x_levels[i], y_levels[j])`.
    pub values: DMatrix<f64>,
}

impl ResponseSurface {
    /// Largest finite response on the grid with its mass coordinates, or
    /// None when every cell is infeasible.
    pub fn max(&self) -> Option<(f64, f64, f64)> {
        let mut best: Option<(f64, f64, f64)> = None;
        for i in 0..self.x_levels.len() {
            for j in 0..self.y_levels.len() {
                let v = self.values[(i, j)];
                if v.is_finite() && best.is_none_or(|(_, _, b)| v > b) {
                    best = Some((self.x_levels[i], self.y_levels[j], v));
                }
            }
        }
        best
    }
}

impl Display for ResponseSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let feasible = self.values.iter().filter(|v| v.is_finite()).count();
        writeln!(
            f,
            "Response surface {} x {} ({} feasible cells)",
            self.x_levels.len(),
            self.y_levels.len(),
            feasible
        )?;
        match self.max() {
            Some((x, y, v)) => write!(f, "Maximum {v:.4} at x = {x:.4}, y = {y:.4}"),
            None => write!(f, "No feasible cell"),
        }
    }
}

/// Sampled sensitivity sweep, one value column per model.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityCurves {
    /// Mass levels of the varied component.
    pub levels: Vec<f64>,
    /// Predicted responses, row i belonging to `levels[i]` and one
    /// column per model in request order.
    pub values: DMatrix<f64>,
}

/// Reconstructs response surfaces and sensitivity sweeps from fitted
/// surrogates by sampling mass-scale compositions and mapping them
/// through the CLR transform.
pub struct ResponseSampler<'a, const D: usize> {
    transform: &'a ClrTransform<D>,
}

impl<'a, const D: usize> ResponseSampler<'a, D> {
    /// Creates the sampler over the given transform.
    pub fn new(transform: &'a ClrTransform<D>) -> Self {
        Self { transform }
    }

    /// Samples the surface of one model over a two-component grid. Every
    /// feasible cell conserves the requested total mass exactly.
    pub fn surface(
        &self,
        model: &FittedSurrogate<D>,
        request: &SurfaceRequest<D>,
    ) -> Result<ResponseSurface> {
        request.validate()?;
        let x_levels = request.x_axis.levels();
        let y_levels = request.y_axis.levels();
        let rows: Vec<Vec<f64>> = x_levels
            .par_iter()
            .map(|&x_mass| {
                y_levels
                    .iter()
                    .map(|&y_mass| {
                        self.cell_value(
                            model,
                            &[
                                (request.x_component, x_mass),
                                (request.y_component, y_mass),
                            ],
                            &request.baseline,
                            request.total_mass,
                        )
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let values = DMatrix::from_fn(x_levels.len(), y_levels.len(), |i, j| rows[i][j]);
        Ok(ResponseSurface {
            x_levels,
            y_levels,
            values,
        })
    }

    /// Sweeps one component's mass and evaluates every model at each
    /// level.
    pub fn sensitivity(
        &self,
        models: &[&FittedSurrogate<D>],
        request: &SensitivityRequest<D>,
    ) -> Result<SensitivityCurves> {
        request.validate()?;
        let levels = request.axis.levels();
        let rows: Vec<Vec<f64>> = levels
            .par_iter()
            .map(|&mass| {
                models
                    .iter()
                    .map(|model| {
                        self.cell_value(
                            model,
                            &[(request.component, mass)],
                            &request.baseline,
                            request.total_mass,
                        )
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let values = DMatrix::from_fn(levels.len(), models.len(), |i, j| rows[i][j]);
        Ok(SensitivityCurves { levels, values })
    }

    fn cell_value(
        &self,
        model: &FittedSurrogate<D>,
        fixed: &[(usize, f64)],
        baseline: &SVector<f64, D>,
        total_mass: f64,
    ) -> Result<f64> {
        match apportion(fixed, baseline, total_mass) {
            Some(masses) => {
                let clr = self.transform.clr(&masses)?;
                Ok(model.predict(&clr))
            }
            None => Ok(f64::NAN),
        }
    }
}

/// Distributes the mass left after the fixed components among the free
/// ones, proportionally to the baseline. A baseline with no mass on the
/// free components splits the remainder equally. Returns None when the
/// fixed masses already exceed the total.
fn apportion<const D: usize>(
    fixed: &[(usize, f64)],
    baseline: &SVector<f64, D>,
    total_mass: f64,
) -> Option<SVector<f64, D>> {
    let mut masses = SVector::<f64, D>::zeros();
    let mut is_fixed = [false; D];
    let mut remainder = total_mass;
    for &(index, mass) in fixed {
        masses[index] = mass;
        is_fixed[index] = true;
        remainder -= mass;
    }
    if remainder < 0. {
        return None;
    }
    let weight_sum: f64 = (0..D)
        .filter(|&j| !is_fixed[j])
        .map(|j| baseline[j])
        .sum();
    let free_count = is_fixed.iter().filter(|f| !**f).count();
    for j in 0..D {
        if !is_fixed[j] {
            masses[j] = if weight_sum > 0. {
                remainder * baseline[j] / weight_sum
            } else {
                remainder / free_count as f64
            };
        }
    }
    Some(masses)
}
