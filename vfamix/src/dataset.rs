use crate::{Error, MatrixDRows, Result};
use nalgebra::{DVector, SMatrix};
use std::fmt::Display;

/// Rectangular table of named numeric columns, the hand-off format of the
/// external data loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<(String, DVector<f64>)>,
}

impl Table {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table with an additional named column. All columns must
    /// share the same length.
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        if let Some((_, first)) = self.columns.first() {
            if first.len() != values.len() {
                return Err(Error::ColumnLengthMismatch {
                    column: name.to_string(),
                    len: values.len(),
                    expected: first.len(),
                });
            }
        }
        self.columns.push((name.to_string(), DVector::from_vec(values)));
        Ok(self)
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&DVector<f64>> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map(|(_, v)| v.len()).unwrap_or(0)
    }

    /// Whether the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validated mapping from column names to semantic roles, built once at
/// load time. Unknown or missing names are rejected eagerly instead of
/// being resolved ad hoc during processing.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap<const D: usize> {
    /// Names of the D compositional component columns, in component order.
    pub components: [String; D],
    /// Names of the response columns.
    pub responses: Vec<String>,
}

impl<const D: usize> ColumnMap<D> {
    /// Creates the map from component and response column names.
    pub fn new(components: [&str; D], responses: &[&str]) -> Self {
        Self {
            components: components.map(str::to_string),
            responses: responses.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Immutable dataset of observations: one composition column per row of the
/// source table, plus the named response vectors, in source row order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset<const D: usize> {
    component_names: [String; D],
    response_names: Vec<String>,
    compositions: MatrixDRows<D>,
    responses: Vec<DVector<f64>>,
}

impl<const D: usize> Dataset<D> {
    /// Builds the dataset from a table and a column map, validating every
    /// referenced column and cell up front.
    pub fn from_table(table: &Table, map: &ColumnMap<D>) -> Result<Self> {
        let n = table.len();
        let mut compositions = MatrixDRows::<D>::zeros(n);
        for (i, name) in map.components.iter().enumerate() {
            let col = Self::numeric_column(table, name, n)?;
            for (row, v) in col.iter().enumerate() {
                compositions[(i, row)] = *v;
            }
        }
        let responses = map
            .responses
            .iter()
            .map(|name| Self::numeric_column(table, name, n).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            component_names: map.components.clone(),
            response_names: map.responses.clone(),
            compositions,
            responses,
        })
    }

    fn numeric_column<'a>(table: &'a Table, name: &str, n: usize) -> Result<&'a DVector<f64>> {
        let col = table.column(name).ok_or_else(|| Error::MissingColumn {
            name: name.to_string(),
        })?;
        if col.len() != n {
            return Err(Error::ColumnLengthMismatch {
                column: name.to_string(),
                len: col.len(),
                expected: n,
            });
        }
        if let Some(row) = col.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonNumericValue {
                column: name.to_string(),
                row,
            });
        }
        Ok(col)
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.compositions.ncols()
    }

    /// Whether the dataset holds no observations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Component column names in component order.
    pub fn component_names(&self) -> &[String; D] {
        &self.component_names
    }

    /// Compositions, one column per observation.
    pub fn compositions(&self) -> &MatrixDRows<D> {
        &self.compositions
    }

    /// Response vector by name.
    pub fn response(&self, name: &str) -> Result<&DVector<f64>> {
        self.response_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.responses[i])
            .ok_or_else(|| Error::MissingColumn {
                name: name.to_string(),
            })
    }

    /// Pearson correlation matrix of the component columns. Entries for a
    /// zero-variance component are NaN.
    pub fn correlation_matrix(&self) -> SMatrix<f64, D, D> {
        let n = self.len() as f64;
        let means: Vec<f64> = (0..D).map(|i| self.compositions.row(i).mean()).collect();
        let mut cov = SMatrix::<f64, D, D>::zeros();
        for i in 0..D {
            for j in i..D {
                let mut s = 0.;
                for k in 0..self.len() {
                    s += (self.compositions[(i, k)] - means[i])
                        * (self.compositions[(j, k)] - means[j]);
                }
                cov[(i, j)] = s / n;
                cov[(j, i)] = cov[(i, j)];
            }
        }
        let mut corr = SMatrix::<f64, D, D>::zeros();
        for i in 0..D {
            for j in 0..D {
                corr[(i, j)] = cov[(i, j)] / (cov[(i, i)] * cov[(j, j)]).sqrt();
            }
        }
        corr
    }

    /// Correlation matrix annotated with the component names, ready for
    /// reporting.
    pub fn correlation_report(&self) -> CorrelationReport<D> {
        CorrelationReport {
            names: self.component_names.clone(),
            matrix: self.correlation_matrix(),
        }
    }
}

/// Named rendering of a component correlation matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationReport<const D: usize> {
    /// Component column names, in component order.
    pub names: [String; D],
    /// Pearson correlations between the component columns.
    pub matrix: SMatrix<f64, D, D>,
}

impl<const D: usize> Display for CorrelationReport<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<10}", "")?;
        for name in &self.names {
            write!(f, "{name:>10}")?;
        }
        writeln!(f)?;
        for i in 0..D {
            write!(f, "{:<10}", self.names[i])?;
            for j in 0..D {
                write!(f, "{:>10.3}", self.matrix[(i, j)])?;
            }
            if i + 1 < D {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    fn table() -> Result<Table> {
        Table::new()
            .with_column("Ac", vec![14., 16., 15.])?
            .with_column("Pr", vec![10., 11., 9.])?
            .with_column("Val", vec![12., 13., 11.])?
            .with_column("But", vec![64., 60., 65.])?
            .with_column("yield", vec![25., 28., 24.])
    }

    fn map() -> ColumnMap<4> {
        ColumnMap::new(["Ac", "Pr", "Val", "But"], &["yield"])
    }

    #[test]
    fn dataset_from_table() -> Result<()> {
        let ds = Dataset::from_table(&table()?, &map())?;
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.compositions()[(3, 1)], 60.);
        assert_eq!(ds.response("yield")?[2], 24.);
        Ok(())
    }

    #[test]
    fn missing_column_rejected() -> Result<()> {
        let map = ColumnMap::<4>::new(["Ac", "Pr", "Val", "Cap"], &["yield"]);
        assert_eq!(
            Dataset::from_table(&table()?, &map),
            Err(Error::MissingColumn {
                name: "Cap".to_string()
            })
        );
        Ok(())
    }

    #[test]
    fn non_numeric_cell_rejected() -> Result<()> {
        let t = Table::new()
            .with_column("Ac", vec![14., f64::NAN])?
            .with_column("Pr", vec![10., 11.])?
            .with_column("Val", vec![12., 13.])?
            .with_column("But", vec![64., 60.])?
            .with_column("yield", vec![25., 28.])?;
        assert_eq!(
            Dataset::from_table(&t, &map()),
            Err(Error::NonNumericValue {
                column: "Ac".to_string(),
                row: 1
            })
        );
        Ok(())
    }

    #[test]
    fn column_length_mismatch_rejected() {
        let t = Table::new()
            .with_column("Ac", vec![14., 16.])
            .and_then(|t| t.with_column("Pr", vec![10.]));
        assert_eq!(
            t,
            Err(Error::ColumnLengthMismatch {
                column: "Pr".to_string(),
                len: 1,
                expected: 2
            })
        );
    }

    #[test]
    fn correlation_report_names_every_component() -> Result<()> {
        let ds = Dataset::from_table(&table()?, &map())?;
        let rendered = ds.correlation_report().to_string();
        for name in ["Ac", "Pr", "Val", "But"] {
            assert!(rendered.contains(name));
        }
        Ok(())
    }

    #[test]
    fn correlation_is_symmetric_and_unit_diagonal() -> Result<()> {
        let ds = Dataset::from_table(&table()?, &map())?;
        let corr = ds.correlation_matrix();
        for i in 0..4 {
            assert!((corr[(i, i)] - 1.).abs() < 1e-12);
            for j in 0..4 {
                assert!((corr[(i, j)] - corr[(j, i)]).abs() < 1e-12);
                assert!(corr[(i, j)].abs() <= 1. + 1e-12);
            }
        }
        Ok(())
    }
}
