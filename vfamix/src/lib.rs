#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../../README.md")]
mod basis;
mod clr;
mod dataset;
mod error;
mod linear;
mod optimizer;
mod solver;
mod stats;
mod surface;
mod surrogate;
mod utils;

pub use basis::{BsplineBasis, difference_penalty};
pub use clr::ClrTransform;
pub use dataset::{ColumnMap, CorrelationReport, Dataset, Table};
pub use error::{Error, Result};
pub use linear::{ConstrainedLinearModel, ConstraintStrategy, FittedLinearModel};
pub use optimizer::{CompositionOptimizer, Optimum};
pub use solver::{
    BoxBound, LinearEqualityConstraint, NlpFunctionTarget, NlpSolver, NlpSolverConstraints,
    NlpSolverOptions, Solution,
};
pub use stats::{f_p_value, ln_gamma, regularized_incomplete_beta, student_t_p_value};
pub use surface::{
    Axis, ResponseSampler, ResponseSurface, SensitivityCurves, SensitivityRequest, SurfaceRequest,
};
pub use surrogate::{
    FittedSurrogate, NegatedSurrogate, SplineSurrogateModel, SurrogateConfig, lambda_grid,
};
pub use utils::{IntoSVector, MatrixDRows};
