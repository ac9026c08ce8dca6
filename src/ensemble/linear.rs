// Ordinary least squares through aprender's LinearRegression
//
// aprender works in f32; conversion happens at this boundary only.

use crate::ensemble::Model;
use crate::error::{NpfgaError, Result};
use aprender::linear_model::LinearRegression;
use aprender::primitives::{Matrix, Vector};
use aprender::traits::Estimator;
use nalgebra::DMatrix;

fn to_aprender(x: &DMatrix<f64>) -> Result<Matrix<f32>> {
    // row-major copy
    let data: Vec<f32> = x.transpose().iter().map(|v| *v as f32).collect();
    Matrix::from_vec(x.nrows(), x.ncols(), data).map_err(|e| NpfgaError::Model(e.to_string()))
}

/// Least-squares linear model with intercept
#[derive(Default)]
pub struct LinearModel {
    inner: Option<LinearRegression>,
}

impl LinearModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Model for LinearModel {
    fn fit(&mut self, x: &DMatrix<f64>, y: &[f64]) -> Result<()> {
        NpfgaError::check_len("model target length", x.nrows(), y.len())?;
        let xm = to_aprender(x)?;
        let yv = Vector::from_vec(y.iter().map(|v| *v as f32).collect());
        let mut model = LinearRegression::new();
        model
            .fit(&xm, &yv)
            .map_err(|e| NpfgaError::Model(format!("linear fit failed: {e}")))?;
        self.inner = Some(model);
        Ok(())
    }

    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>> {
        let model = self
            .inner
            .as_ref()
            .ok_or_else(|| NpfgaError::Model("predict called before fit".to_string()))?;
        if x.nrows() == 0 {
            return Ok(Vec::new());
        }
        let yp = model.predict(&to_aprender(x)?);
        Ok(yp.as_slice().iter().map(|v| f64::from(*v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_fit_recovers_line() {
        let x = DMatrix::from_column_slice(5, 1, &[0.0, 1.0, 2.0, 3.0, 4.0]);
        let y = [1.0, 3.0, 5.0, 7.0, 9.0];
        let mut m = LinearModel::new();
        m.fit(&x, &y).unwrap();
        let yp = m.predict(&DMatrix::from_column_slice(2, 1, &[5.0, 10.0])).unwrap();
        assert!((yp[0] - 11.0).abs() < 1e-2);
        assert!((yp[1] - 21.0).abs() < 1e-2);
    }

    #[test]
    fn test_predict_before_fit() {
        let m = LinearModel::new();
        assert!(matches!(m.predict(&DMatrix::zeros(1, 1)), Err(NpfgaError::Model(_))));
    }
}
