// Bootstrap ensembles of simple models, stacked stage by stage
//
// A `BootstrapEnsemble` wraps any `Model` and reports a robust central
// prediction plus its spread across members. The `Booster` feeds each stage's
// predictions forward so later stages can model what earlier ones missed.

mod booster;
mod bootstrap;
mod linear;

pub use booster::{BoostKind, Booster, StageScores};
pub use bootstrap::{BootstrapEnsemble, ResampleMethod};
pub use linear::LinearModel;

use crate::error::{NpfgaError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A regressor that can be refit from scratch
pub trait Model: Send + Sync {
    fn fit(&mut self, x: &DMatrix<f64>, y: &[f64]) -> Result<()>;

    fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>>;
}

/// Member model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Least-squares linear regression
    #[default]
    Lse,
}

impl ModelKind {
    pub fn build(&self) -> Box<dyn Model> {
        match self {
            ModelKind::Lse => Box::new(LinearModel::new()),
        }
    }
}

impl FromStr for ModelKind {
    type Err = NpfgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lse" => Ok(ModelKind::Lse),
            other => Err(NpfgaError::config(format!("unknown regressor '{other}'"))),
        }
    }
}
