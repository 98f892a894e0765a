/// Main error type
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// A required column is absent from the input table.
    #[error("column {name} is missing from the input table")]
    MissingColumn {
        /// Column name.
        name: String,
    },
    /// A numeric column contains a value that is not a finite number.
    #[error("column {column} contains a non-numeric value at row {row}")]
    NonNumericValue {
        /// Column name.
        column: String,
        /// Zero-based row index.
        row: usize,
    },
    /// A column does not have the same number of rows as the rest of the table.
    #[error("column {column} has {len} rows but the table has {expected}")]
    ColumnLengthMismatch {
        /// Column name.
        column: String,
        /// Length of the offending column.
        len: usize,
        /// Length of the columns already in the table.
        expected: usize,
    },
    /// A compositional entry is invalid even after epsilon clamping.
    #[error("composition at row {row} has a non-finite component {component}")]
    InvalidComposition {
        /// Zero-based row index within the batch, 0 for single compositions.
        row: usize,
        /// Zero-based component index.
        component: usize,
    },
    /// Fewer observations than free parameters.
    #[error("{rows} observations cannot identify {params} free parameters")]
    InsufficientRows {
        /// Number of observations.
        rows: usize,
        /// Number of free parameters of the fit.
        params: usize,
    },
    /// The constrained least squares system cannot be solved.
    #[error("constrained fit is infeasible: {reason}")]
    ConstraintInfeasible {
        /// Underlying cause.
        reason: String,
    },
    /// Spline degree out of range.
    #[error("spline degree must be at least 1, but was {degree}")]
    InvalidDegree {
        /// Requested degree.
        degree: usize,
    },
    /// An interval has a non-positive span.
    #[error("range lower bound {lower} must be strictly below upper bound {upper}")]
    InvalidRange {
        /// Lower end of the interval.
        lower: f64,
        /// Upper end of the interval.
        upper: f64,
    },
    /// Difference penalty order incompatible with the basis size.
    #[error("penalty order {order} must be positive and below the number of basis functions {num_basis}")]
    InvalidPenaltyOrder {
        /// Requested difference order.
        order: usize,
        /// Number of basis functions.
        num_basis: usize,
    },
    /// The smoothing candidate grid is empty.
    #[error("the smoothing strength candidate grid is empty")]
    EmptyLambdaGrid,
    /// An axis needs at least the given number of sample points.
    #[error("axis {axis} needs at least {ge_points} sample points, but {points} were requested")]
    MinGridPoints {
        /// Axis name.
        axis: &'static str,
        /// Requested sample points.
        points: usize,
        /// Required minimum.
        ge_points: usize,
    },
    /// A component index is outside the compositional dimension.
    #[error("component index {index} is outside the {dimension} components of the mixture")]
    UnknownComponent {
        /// Offending index.
        index: usize,
        /// Compositional dimension.
        dimension: usize,
    },
    /// Two grid axes refer to the same mixture component.
    #[error("surface axes must vary two distinct components, both refer to {index}")]
    DuplicateAxis {
        /// Component index used twice.
        index: usize,
    },
    /// The nonlinear solver did not produce a usable result.
    #[error("optimization failed: {reason}")]
    OptimizationFailure {
        /// Solver diagnostic.
        reason: String,
    },
}

/// Main result type
pub type Result<T> = std::result::Result<T, Error>;
