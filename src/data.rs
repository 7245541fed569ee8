//! Training data tables.
//!
//! A `DataTable` is the append-only backing store for a surrogate's samples:
//! rows are never edited, only appended, matching spec.md's `SurrogateSample`
//! layout (`x_1..x_d | y | [dy/dx_1..dy/dx_d] | [v_1..v_d]`). Persisted as
//! ASCII CSV without a header, per spec.md section 6.

use std::fs;
use std::path::Path;

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::error::{Error, Result};

/// Which optional blocks a row schema carries, beyond `x_1..x_d | y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowSchema {
    pub dimension: usize,
    /// gradient columns `dy/dx_1..dy/dx_d` (adjoint-mode models)
    pub has_gradient: bool,
    /// direction columns `v_1..v_d` plus one directional-derivative column (tangent models)
    pub has_direction: bool,
}

impl RowSchema {
    pub fn plain(dimension: usize) -> Self {
        RowSchema { dimension, has_gradient: false, has_direction: false }
    }

    pub fn with_gradient(dimension: usize) -> Self {
        RowSchema { dimension, has_gradient: true, has_direction: false }
    }

    pub fn with_direction(dimension: usize) -> Self {
        RowSchema { dimension, has_gradient: false, has_direction: true }
    }

    /// Total column count for this schema.
    pub fn ncols(&self) -> usize {
        let mut n = self.dimension + 1; // x | y
        if self.has_gradient {
            n += self.dimension;
        }
        if self.has_direction {
            n += self.dimension + 1; // v_1..v_d | dy/dv
        }
        n
    }
}

/// An append-only table of training samples sharing one `RowSchema`.
#[derive(Clone, Debug)]
pub struct DataTable {
    schema: RowSchema,
    rows: Vec<Vec<f64>>,
}

impl DataTable {
    pub fn new(schema: RowSchema) -> Self {
        DataTable { schema, rows: Vec::new() }
    }

    pub fn schema(&self) -> RowSchema {
        self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, validating it matches the table's schema.
    pub fn append_row(&mut self, row: Vec<f64>) -> Result<()> {
        if row.len() != self.schema.ncols() {
            return Err(Error::Io(format!(
                "row has {} columns, expected {} for this schema",
                row.len(),
                self.schema.ncols()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Rejects samples closer than `tau` (in infinity-norm, in normalized
    /// space) to any existing row's `x` block, per spec.md section 4.3.
    pub fn is_duplicate(&self, x_normalized: &DVector<f64>, tau: f64) -> bool {
        self.rows.iter().any(|row| {
            (0..self.schema.dimension)
                .map(|i| (row[i] - x_normalized[i]).abs())
                .fold(0.0, f64::max)
                < tau
        })
    }

    /// The `x` block of every row as a matrix (rows = samples).
    pub fn inputs(&self) -> DMatrix<f64> {
        let d = self.schema.dimension;
        DMatrix::from_fn(self.rows.len(), d, |r, c| self.rows[r][c])
    }

    /// The `y` column.
    pub fn outputs(&self) -> DVector<f64> {
        let d = self.schema.dimension;
        DVector::from_fn(self.rows.len(), |r, _| self.rows[r][d])
    }

    /// The gradient block, if this schema has one.
    pub fn gradients(&self) -> Option<DMatrix<f64>> {
        if !self.schema.has_gradient {
            return None;
        }
        let d = self.schema.dimension;
        Some(DMatrix::from_fn(self.rows.len(), d, |r, c| self.rows[r][d + 1 + c]))
    }

    /// The direction block and directional-derivative column, if this schema has one.
    pub fn directions_and_derivative(&self) -> Option<(DMatrix<f64>, DVector<f64>)> {
        if !self.schema.has_direction {
            return None;
        }
        let d = self.schema.dimension;
        let offset = d + 1;
        let dirs = DMatrix::from_fn(self.rows.len(), d, |r, c| self.rows[r][offset + c]);
        let deriv = DVector::from_fn(self.rows.len(), |r, _| self.rows[r][offset + d]);
        Some((dirs, deriv))
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Parses an ASCII CSV file (no header, whitespace/comma separated) into a table.
    pub fn load_csv(path: impl AsRef<Path>, schema: RowSchema) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Io(format!("cannot read {}: {e}", path.as_ref().display())))?;
        let mut table = DataTable::new(schema);
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row: std::result::Result<Vec<f64>, _> =
                line.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()).map(|s| s.parse::<f64>()).collect();
            let row = row.map_err(|e| Error::Io(format!("{}:{}: {e}", path.as_ref().display(), line_no + 1)))?;
            table.append_row(row)?;
        }
        Ok(table)
    }

    /// Writes the whole table out as ASCII CSV (no header), overwriting `path`.
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut content = String::new();
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|v| format!("{v:.15e}")).collect();
            content.push_str(&line.join(","));
            content.push('\n');
        }
        fs::write(path.as_ref(), content).map_err(|e| Error::Io(format!("cannot write {}: {e}", path.as_ref().display())))
    }

    /// Appends one row directly to the CSV file on disk, mirroring the
    /// in-memory append (spec.md's "training CSVs (augmented in place)").
    pub fn append_csv(path: impl AsRef<Path>, row: &[f64]) -> Result<()> {
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| Error::Io(format!("cannot open {}: {e}", path.as_ref().display())))?;
        let line: Vec<String> = row.iter().map(|v| format!("{v:.15e}")).collect();
        writeln!(file, "{}", line.join(",")).map_err(|e| Error::Io(e.to_string()))
    }

    /// Builds a single row from a `RowDVector` of inputs plus trailing scalars/blocks.
    pub fn compose_row(x: &RowDVector<f64>, y: f64, gradient: Option<&RowDVector<f64>>, direction: Option<(&RowDVector<f64>, f64)>) -> Vec<f64> {
        let mut row: Vec<f64> = x.iter().copied().collect();
        row.push(y);
        if let Some(g) = gradient {
            row.extend(g.iter().copied());
        }
        if let Some((v, dv)) = direction {
            row.extend(v.iter().copied());
            row.push(dv);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_reread_reproduces_row() {
        let schema = RowSchema::plain(2);
        let mut table = DataTable::new(schema);
        table.append_row(vec![1.0, 2.0, 3.0]).unwrap();
        let tmp = std::env::temp_dir().join(format!("rodeo_test_{}.csv", std::process::id()));
        table.save_csv(&tmp).unwrap();
        let reloaded = DataTable::load_csv(&tmp, schema).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.row(0), &[1.0, 2.0, 3.0]);
        let _ = std::fs::remove_file(tmp);
    }

    #[test]
    fn rejects_mismatched_row_width() {
        let schema = RowSchema::plain(2);
        let mut table = DataTable::new(schema);
        assert!(table.append_row(vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn duplicate_detection_uses_infinity_norm() {
        let schema = RowSchema::plain(2);
        let mut table = DataTable::new(schema);
        table.append_row(vec![0.5, 0.5, 1.0]).unwrap();
        assert!(table.is_duplicate(&DVector::from_vec(vec![0.5, 0.5 + 1e-10]), 1e-8));
        assert!(!table.is_duplicate(&DVector::from_vec(vec![0.5, 0.6]), 1e-8));
    }
}
