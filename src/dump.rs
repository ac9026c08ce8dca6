//! Whitespace-delimited numeric tables for diagnostics
//!
//! One row per sample or rank, one column per requested statistic. Lines
//! starting with `#` are comments (used for headers) and are skipped on read.

use crate::error::{NpfgaError, Result};
use nalgebra::DMatrix;
use std::path::Path;

/// Column-oriented table builder
#[derive(Debug, Default)]
pub struct Table {
    header: Option<String>,
    columns: Vec<Vec<f64>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `# ...` comment line written before the data
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Append one column; all columns must have the same length
    pub fn column(mut self, values: impl Into<Vec<f64>>) -> Self {
        self.columns.push(values.into());
        self
    }

    /// Append every column of a matrix
    pub fn matrix_columns(mut self, m: &DMatrix<f64>) -> Self {
        for j in 0..m.ncols() {
            self.columns.push(m.column(j).iter().copied().collect());
        }
        self
    }

    fn n_rows(&self) -> Result<usize> {
        let n = self.columns.first().map(|c| c.len()).unwrap_or(0);
        for c in &self.columns {
            NpfgaError::check_len("table column length", n, c.len())?;
        }
        Ok(n)
    }

    /// Render as text, numbers in `%.18e` form
    pub fn to_text(&self) -> Result<String> {
        let n = self.n_rows()?;
        let mut output = String::new();

        if let Some(ref header) = self.header {
            output.push_str("# ");
            output.push_str(header);
            output.push('\n');
        }

        for i in 0..n {
            let row: Vec<String> = self
                .columns
                .iter()
                .map(|c| format!("{:.18e}", c[i]))
                .collect();
            output.push_str(&row.join(" "));
            output.push('\n');
        }

        Ok(output)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text()?)?;
        tracing::debug!("Wrote diagnostic table {}", path.display());
        Ok(())
    }
}

/// Write every column of `m` as a headerless table
pub fn write_table(path: &Path, m: &DMatrix<f64>) -> Result<()> {
    Table::new().matrix_columns(m).write(path)
}

/// Parse a whitespace-delimited matrix
pub fn parse_matrix(text: &str) -> Result<DMatrix<f64>> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|e| {
                    NpfgaError::config(format!("line {}: cannot parse '{tok}': {e}", lineno + 1))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if let Some(first) = rows.first() {
            NpfgaError::check_len("matrix row width", first.len(), row.len())?;
        }
        rows.push(row);
    }
    let n_rows = rows.len();
    let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(DMatrix::from_row_slice(n_rows, n_cols, &flat))
}

pub fn read_matrix(path: &Path) -> Result<DMatrix<f64>> {
    parse_matrix(&std::fs::read_to_string(path)?)
}

/// Read all numbers of a table as a flat vector (row-major)
pub fn read_vector(path: &Path) -> Result<Vec<f64>> {
    let m = read_matrix(path)?;
    Ok(m.transpose().iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_to_text_with_header() {
        let text = Table::new()
            .with_header("rank exs")
            .column(vec![1.0, 2.0])
            .column(vec![0.5, -0.25])
            .to_text()
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# rank exs");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("2.0"));
        assert!(lines[2].contains("-2.5"));
    }

    #[test]
    fn test_table_rejects_ragged_columns() {
        let result = Table::new().column(vec![1.0]).column(vec![1.0, 2.0]).to_text();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_matrix_skips_comments() {
        let m = parse_matrix("# header\n1 2 3\n\n4 5 6\n").unwrap();
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m[(1, 2)], 6.0);
    }

    #[test]
    fn test_parse_matrix_rejects_bad_token() {
        assert!(parse_matrix("1 x 3\n").is_err());
        assert!(parse_matrix("1 2\n3\n").is_err());
    }

    #[test]
    fn test_write_then_read_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.txt");
        let m = DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.3, 0.4]);
        Table::new().matrix_columns(&m).write(&path).unwrap();
        let back = read_matrix(&path).unwrap();
        assert!((back - m).amax() < 1e-15);
        assert_eq!(read_vector(&path).unwrap().len(), 4);
    }
}
