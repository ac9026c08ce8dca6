// Prediction quality metrics for cross-validation
//
// Error metrics come from aprender and carry f32 precision.

use crate::error::{NpfgaError, Result};
use aprender::primitives::Vector;
use crate::stats::{normalized_covariance, ranks};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Mae,
    Mse,
    Rmse,
    /// Pearson correlation
    Rhop,
    /// Spearman rank correlation
    Rhor,
    /// Area under the ROC curve, targets thresholded at 0.5
    Auc,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Mae,
        Metric::Mse,
        Metric::Rmse,
        Metric::Rhop,
        Metric::Rhor,
        Metric::Auc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Mae => "mae",
            Metric::Mse => "mse",
            Metric::Rmse => "rmse",
            Metric::Rhop => "rhop",
            Metric::Rhor => "rhor",
            Metric::Auc => "auc",
        }
    }

    /// Score predictions `yp` against truth `yt`; NaN when undefined
    pub fn score(&self, yp: &[f64], yt: &[f64]) -> f64 {
        match self {
            Metric::Mae => mae(yp, yt),
            Metric::Mse => mse(yp, yt),
            Metric::Rmse => mse(yp, yt).sqrt(),
            Metric::Rhop => normalized_covariance(yp, yt),
            Metric::Rhor => normalized_covariance(&ranks(yp), &ranks(yt)),
            Metric::Auc => auc(yp, yt),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = NpfgaError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .iter()
            .find(|m| m.name() == s)
            .copied()
            .ok_or_else(|| NpfgaError::config(format!("unknown metric '{s}'")))
    }
}

fn to_vector(values: &[f64]) -> Vector<f32> {
    Vector::from_vec(values.iter().map(|v| *v as f32).collect())
}

fn mse(yp: &[f64], yt: &[f64]) -> f64 {
    if yp.is_empty() || yp.len() != yt.len() {
        return f64::NAN;
    }
    f64::from(aprender::metrics::mse(&to_vector(yp), &to_vector(yt)))
}

fn mae(yp: &[f64], yt: &[f64]) -> f64 {
    if yp.is_empty() || yp.len() != yt.len() {
        return f64::NAN;
    }
    f64::from(aprender::metrics::mae(&to_vector(yp), &to_vector(yt)))
}

/// Mann-Whitney form of the ROC AUC: positives are `yt > 0.5`
pub(crate) fn auc(yp: &[f64], yt: &[f64]) -> f64 {
    let r = ranks(yp);
    let n_pos = yt.iter().filter(|t| **t > 0.5).count();
    let n_neg = yt.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }
    let rank_sum: f64 = r.iter().zip(yt).filter(|(_, t)| **t > 0.5).map(|(r, _)| r).sum();
    let np = n_pos as f64;
    (rank_sum - np * (np + 1.0) / 2.0) / (np * n_neg as f64)
}
