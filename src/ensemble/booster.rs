// Stage-wise stacking of ensembles
//
// Iteration 0 receives the true targets. Every `evaluate` pushes the latest
// stage's predictions onto the target stack, so the residue seen by the next
// stage is the accumulated prediction minus the truth.

use crate::cv::Metric;
use crate::dump::write_table;
use crate::ensemble::BootstrapEnsemble;
use crate::error::{NpfgaError, Result};
use nalgebra::DMatrix;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;

/// Which statistics `Booster::evaluate` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostKind {
    /// (rmse, Pearson rho)
    Regression,
    /// (ROC AUC, Matthews correlation at a 0.5 cut)
    Classification,
}

/// Train and test statistics of one evaluated stage; NaN when a set is empty
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageScores {
    pub train: (f64, f64),
    pub test: (f64, f64),
}

/// Predicted avg, predicted std and truth, row-aligned
#[derive(Debug, Clone, Default)]
struct Record {
    avg: Vec<f64>,
    std: Vec<f64>,
    truth: Vec<f64>,
}

impl Record {
    fn extend(&mut self, avg: &[f64], std: &[f64], truth: &[f64]) {
        self.avg.extend_from_slice(avg);
        self.std.extend_from_slice(std);
        self.truth.extend_from_slice(truth);
    }

    fn to_matrix(&self) -> DMatrix<f64> {
        let n = self.avg.len();
        let mut m = DMatrix::zeros(n, 3);
        m.column_mut(0).copy_from_slice(&self.avg);
        m.column_mut(1).copy_from_slice(&self.std);
        m.column_mut(2).copy_from_slice(&self.truth);
        m
    }
}

#[derive(Default)]
pub struct Booster {
    iteration: Option<usize>,
    x_trains: Vec<DMatrix<f64>>,
    x_tests: Vec<DMatrix<f64>>,
    /// Stage 0 is the truth, later entries are stage predictions
    y_trains: Vec<Vec<f64>>,
    y_tests: Vec<Vec<f64>>,
    train_records: BTreeMap<usize, Record>,
    test_records: BTreeMap<usize, Record>,
    regressors: Vec<BootstrapEnsemble>,
}

fn hstack(blocks: &[DMatrix<f64>], nrows: usize) -> Result<DMatrix<f64>> {
    let ncols = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMatrix::zeros(nrows, ncols);
    let mut offset = 0;
    for b in blocks {
        NpfgaError::check_len("stacked feature rows", nrows, b.nrows())?;
        out.columns_mut(offset, b.ncols()).copy_from(b);
        offset += b.ncols();
    }
    Ok(out)
}

fn rmse(yp: &[f64], yt: &[f64]) -> f64 {
    Metric::Rmse.score(yp, yt)
}

/// Matthews correlation of `yp > 0.5` against `yt > 0.5`
fn mcc(yp: &[f64], yt: &[f64]) -> f64 {
    let (mut tp, mut tn, mut fp, mut fneg) = (0.0, 0.0, 0.0, 0.0);
    for (p, t) in yp.iter().zip(yt) {
        match (*p > 0.5, *t > 0.5) {
            (true, true) => tp += 1.0,
            (false, false) => tn += 1.0,
            (true, false) => fp += 1.0,
            (false, true) => fneg += 1.0,
        }
    }
    let denom: f64 = (tp + fp) * (tp + fneg) * (tn + fp) * (tn + fneg);
    if denom == 0.0 {
        return 0.0;
    }
    (tp * tn - fp * fneg) / denom.sqrt()
}

impl Booster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iteration(&self) -> Option<usize> {
        self.iteration
    }

    fn current(&self) -> Result<usize> {
        self.iteration
            .ok_or_else(|| NpfgaError::Model("booster has no dispatched iteration".to_string()))
    }

    /// Register the targets of `iteration`; iteration 0 starts a new stack
    pub fn dispatch_y(&mut self, iteration: usize, y_train: &[f64], y_test: &[f64]) {
        self.iteration = Some(iteration);
        if iteration == 0 {
            self.x_trains.clear();
            self.x_tests.clear();
            self.y_trains = vec![y_train.to_vec()];
            self.y_tests = vec![y_test.to_vec()];
        }
        self.train_records.entry(iteration).or_default();
        self.test_records.entry(iteration).or_default();
    }

    /// Add a feature block for the current iteration
    pub fn dispatch_x(&mut self, iteration: usize, x_train: DMatrix<f64>, x_test: DMatrix<f64>) -> Result<()> {
        if self.iteration != Some(iteration) {
            return Err(NpfgaError::Model(format!(
                "dispatch_x for iteration {iteration} without a matching dispatch_y"
            )));
        }
        let (n_train, n_test) = self.stage_sizes()?;
        NpfgaError::check_len("booster train rows", n_train, x_train.nrows())?;
        NpfgaError::check_len("booster test rows", n_test, x_test.nrows())?;
        self.x_trains.push(x_train);
        self.x_tests.push(x_test);
        Ok(())
    }

    fn stage_sizes(&self) -> Result<(usize, usize)> {
        match (self.y_trains.first(), self.y_tests.first()) {
            (Some(tr), Some(te)) => Ok((tr.len(), te.len())),
            _ => Err(NpfgaError::Model("booster has no stage 0 targets".to_string())),
        }
    }

    /// Targets for the next stage: the truth at iteration 0, otherwise the
    /// latest prediction minus the truth
    pub fn residues(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        let it = self.current()?;
        let (tr0, te0) = match (self.y_trains.first(), self.y_tests.first()) {
            (Some(tr), Some(te)) => (tr, te),
            _ => return Err(NpfgaError::Model("booster has no stage 0 targets".to_string())),
        };
        if it == 0 {
            return Ok((tr0.clone(), te0.clone()));
        }
        let diff = |last: &[f64], first: &[f64]| -> Vec<f64> { last.iter().zip(first).map(|(l, f)| l - f).collect() };
        let tr_last = self.y_trains.last().unwrap_or(tr0);
        let te_last = self.y_tests.last().unwrap_or(te0);
        Ok((diff(tr_last, tr0), diff(te_last, te0)))
    }

    fn stacked(&self) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
        let (n_train, n_test) = self.stage_sizes()?;
        Ok((hstack(&self.x_trains, n_train)?, hstack(&self.x_tests, n_test)?))
    }

    /// Fit `regressor` on all dispatched feature blocks against the stage 0 target
    pub fn train<R: Rng + ?Sized>(
        &mut self,
        mut regressor: BootstrapEnsemble,
        feature_weights: Option<&[f64]>,
        rng: &mut R,
    ) -> Result<()> {
        let (x_train, _) = self.stacked()?;
        let y_train = self.y_trains[0].clone();
        regressor.fit(&x_train, &y_train, feature_weights, rng)?;
        self.regressors.push(regressor);
        Ok(())
    }

    /// Predict with the most recently trained regressor
    pub fn apply_latest(&self, x: &DMatrix<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        let regressor = self
            .regressors
            .last()
            .ok_or_else(|| NpfgaError::Model("booster has no trained regressor".to_string()))?;
        if x.nrows() == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        regressor.predict(x)
    }

    /// Score the latest regressor on train and test, record the predictions and
    /// push them as the next stage
    pub fn evaluate(&mut self, kind: BoostKind) -> Result<StageScores> {
        let it = self.current()?;
        let (x_train, x_test) = self.stacked()?;
        let y_train = self.y_trains[0].clone();
        let y_test = self.y_tests[0].clone();
        let (train_avg, train_std) = self.apply_latest(&x_train)?;
        let (test_avg, test_std) = self.apply_latest(&x_test)?;

        self.train_records
            .entry(it)
            .or_default()
            .extend(&train_avg, &train_std, &y_train);
        if !y_test.is_empty() {
            self.test_records
                .entry(it)
                .or_default()
                .extend(&test_avg, &test_std, &y_test);
        }

        let score = |yp: &[f64], yt: &[f64]| -> (f64, f64) {
            if yt.is_empty() {
                return (f64::NAN, f64::NAN);
            }
            match kind {
                BoostKind::Regression => (rmse(yp, yt), Metric::Rhop.score(yp, yt)),
                BoostKind::Classification => (Metric::Auc.score(yp, yt), mcc(yp, yt)),
            }
        };
        let scores = StageScores {
            train: score(&train_avg, &y_train),
            test: score(&test_avg, &y_test),
        };
        tracing::info!(
            "Stage {}: train ({:.4}, {:.4}) test ({:.4}, {:.4})",
            it,
            scores.train.0,
            scores.train.1,
            scores.test.0,
            scores.test.1
        );

        self.y_trains.push(train_avg);
        self.y_tests.push(test_avg);
        Ok(scores)
    }

    /// Write `{prefix}{it}_train.txt` and `{prefix}{it}_test.txt` per iteration
    ///
    /// Columns are predicted mean, predicted std and truth. An iteration without
    /// test rows gets an empty test file.
    pub fn write(&self, prefix: &str) -> Result<()> {
        for (it, record) in &self.train_records {
            write_table(Path::new(&format!("{prefix}{it}_train.txt")), &record.to_matrix())?;
            let test = self.test_records.get(it).cloned().unwrap_or_default();
            let test_path = format!("{prefix}{it}_test.txt");
            if test.avg.is_empty() {
                std::fs::write(&test_path, "")?;
            } else {
                write_table(Path::new(&test_path), &test.to_matrix())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_x_requires_dispatch_y() {
        let mut b = Booster::new();
        assert!(b.dispatch_x(0, DMatrix::zeros(2, 1), DMatrix::zeros(0, 1)).is_err());
        b.dispatch_y(0, &[1.0, 2.0], &[]);
        assert!(b.dispatch_x(1, DMatrix::zeros(2, 1), DMatrix::zeros(0, 1)).is_err());
        assert!(b.dispatch_x(0, DMatrix::zeros(3, 1), DMatrix::zeros(0, 1)).is_err());
        assert!(b.dispatch_x(0, DMatrix::zeros(2, 1), DMatrix::zeros(0, 1)).is_ok());
    }

    #[test]
    fn test_residues_at_stage_zero() {
        let mut b = Booster::new();
        assert!(b.residues().is_err());
        b.dispatch_y(0, &[1.0, 2.0], &[3.0]);
        let (tr, te) = b.residues().unwrap();
        assert_eq!(tr, vec![1.0, 2.0]);
        assert_eq!(te, vec![3.0]);
    }

    #[test]
    fn test_hstack() {
        let a = DMatrix::from_column_slice(2, 1, &[1.0, 2.0]);
        let b = DMatrix::from_column_slice(2, 2, &[3.0, 4.0, 5.0, 6.0]);
        let m = hstack(&[a, b], 2).unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m[(1, 2)], 6.0);
        assert_eq!(hstack(&[], 4).unwrap().shape(), (4, 0));
    }

    #[test]
    fn test_mcc() {
        assert_eq!(mcc(&[0.9, 0.1], &[1.0, 0.0]), 1.0);
        assert_eq!(mcc(&[0.1, 0.9], &[1.0, 0.0]), -1.0);
        assert_eq!(mcc(&[0.9, 0.9], &[1.0, 0.0]), 0.0);
    }
}
