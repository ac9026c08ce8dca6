// Bootstrap ensemble over a user-chosen model family

use crate::ensemble::{Model, ModelKind};
use crate::error::{NpfgaError, Result};
use crate::stats::{argsort_asc, median, searchsorted_left, std_dev};
use nalgebra::DMatrix;
use rand::Rng;
use std::str::FromStr;

/// Resamples drawn per requested member before `Samples` mode gives up
const MAX_DRAWS_PER_MEMBER: usize = 100;

/// Smallest target spread a `Samples` resample may have
const MIN_TARGET_STD: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMethod {
    /// Refit on rows drawn with replacement
    Samples,
    /// Refit on the full rows with resampled residuals added to the target
    Residuals,
    /// Single fit on the full data
    None,
    /// One univariate member per feature column
    Features,
}

impl FromStr for ResampleMethod {
    type Err = NpfgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "samples" => Ok(ResampleMethod::Samples),
            "residuals" => Ok(ResampleMethod::Residuals),
            "none" => Ok(ResampleMethod::None),
            "features" => Ok(ResampleMethod::Features),
            other => Err(NpfgaError::config(format!("unknown resample method '{other}'"))),
        }
    }
}

struct Member {
    model: Box<dyn Model>,
    /// Columns the member was trained on; `None` means all
    columns: Option<Vec<usize>>,
    weight: f64,
}

impl Member {
    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>> {
        match &self.columns {
            Some(cols) => self.model.predict(&x.select_columns(cols)),
            None => self.model.predict(x),
        }
    }
}

fn draw_rows<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

pub struct BootstrapEnsemble {
    method: ResampleMethod,
    bootstraps: usize,
    kind: ModelKind,
    members: Vec<Member>,
}

impl BootstrapEnsemble {
    pub fn new(method: ResampleMethod, bootstraps: usize, kind: ModelKind) -> Self {
        Self {
            method,
            bootstraps,
            kind,
            members: Vec::new(),
        }
    }

    pub fn method(&self) -> ResampleMethod {
        self.method
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn fit_member(&self, x: &DMatrix<f64>, y: &[f64], columns: Option<Vec<usize>>, weight: f64) -> Result<Member> {
        let mut model = self.kind.build();
        match &columns {
            Some(cols) => model.fit(&x.select_columns(cols), y)?,
            None => model.fit(x, y)?,
        }
        Ok(Member { model, columns, weight })
    }

    /// Fit the ensemble, discarding any previous members
    ///
    /// `feature_weights` is only read in `Features` mode and defaults to 1 per
    /// column.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        x: &DMatrix<f64>,
        y: &[f64],
        feature_weights: Option<&[f64]>,
        rng: &mut R,
    ) -> Result<()> {
        NpfgaError::check_len("ensemble target length", x.nrows(), y.len())?;
        let n = x.nrows();
        self.members.clear();
        let mut members = Vec::new();

        match self.method {
            ResampleMethod::Samples => {
                let mut draws = 0;
                while members.len() < self.bootstraps {
                    if draws >= self.bootstraps * MAX_DRAWS_PER_MEMBER {
                        return Err(NpfgaError::Numerical(format!(
                            "only {} of {} bootstrap resamples had a non-constant target",
                            members.len(),
                            self.bootstraps
                        )));
                    }
                    draws += 1;
                    let rows = draw_rows(n, rng);
                    let y_boot: Vec<f64> = rows.iter().map(|&i| y[i]).collect();
                    if std_dev(&y_boot) < MIN_TARGET_STD {
                        tracing::debug!("Skipping bootstrap resample with constant target");
                        continue;
                    }
                    members.push(self.fit_member(&x.select_rows(&rows), &y_boot, None, 1.0)?);
                }
            }
            ResampleMethod::Residuals => {
                let mut base = self.kind.build();
                base.fit(x, y)?;
                let residuals: Vec<f64> = base.predict(x)?.iter().zip(y).map(|(p, t)| t - p).collect();
                for _ in 0..self.bootstraps {
                    let rows = draw_rows(n, rng);
                    let y_res: Vec<f64> = y.iter().zip(&rows).map(|(t, &i)| t + residuals[i]).collect();
                    members.push(self.fit_member(x, &y_res, None, 1.0)?);
                }
            }
            ResampleMethod::None => {
                members.push(self.fit_member(x, y, None, 1.0)?);
            }
            ResampleMethod::Features => {
                let weights = match feature_weights {
                    Some(w) => {
                        NpfgaError::check_len("feature weights", x.ncols(), w.len())?;
                        w.to_vec()
                    }
                    None => vec![1.0; x.ncols()],
                };
                for (f, &w) in weights.iter().enumerate() {
                    tracing::debug!("Ensemble for feature {}", f);
                    if self.bootstraps > 0 {
                        for _ in 0..self.bootstraps {
                            let rows = draw_rows(n, rng);
                            let y_boot: Vec<f64> = rows.iter().map(|&i| y[i]).collect();
                            members.push(self.fit_member(&x.select_rows(&rows), &y_boot, Some(vec![f]), w)?);
                        }
                    } else {
                        members.push(self.fit_member(x, y, Some(vec![f]), w)?);
                    }
                }
            }
        }

        tracing::info!("Fitted ensemble of {} members ({:?})", members.len(), self.method);
        self.members = members;
        Ok(())
    }

    /// Central prediction and spread per row of `x`
    pub fn predict(&self, x: &DMatrix<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        if self.members.is_empty() {
            return Err(NpfgaError::Model("ensemble has no fitted members".to_string()));
        }
        let preds = self
            .members
            .iter()
            .map(|m| m.predict(x))
            .collect::<Result<Vec<Vec<f64>>>>()?;
        let weights: Vec<f64> = self.members.iter().map(|m| m.weight).collect();

        let mut avg = Vec::with_capacity(x.nrows());
        let mut std = Vec::with_capacity(x.nrows());
        for i in 0..x.nrows() {
            let column: Vec<f64> = preds.iter().map(|p| p[i]).collect();
            avg.push(match self.method {
                ResampleMethod::Features => weighted_median(&column, &weights),
                _ => median(&column),
            });
            std.push(std_dev(&column));
        }
        Ok((avg, std))
    }
}

/// Midpoint of the two values straddling half the cumulative weight
fn weighted_median(values: &[f64], weights: &[f64]) -> f64 {
    if values.len() == 1 {
        return values[0];
    }
    let order = argsort_asc(values);
    let mut cum = Vec::with_capacity(order.len());
    let mut acc = 0.0;
    for &i in &order {
        acc += weights[i];
        cum.push(acc);
    }
    let cum: Vec<f64> = cum.iter().map(|c| c / acc).collect();
    let s = searchsorted_left(&cum, 0.5).clamp(1, order.len() - 1);
    0.5 * (values[order[s - 1]] + values[order[s]])
}
