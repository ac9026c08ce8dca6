//! Randomized controls and bootstrap resampling
//!
//! Randomized controls destroy the association between data and target while
//! keeping marginal distributions intact; they are the raw material of every
//! null model. Bootstrap generators draw row index sets with replacement.
//!
//! All draws come from a caller-supplied RNG and happen sequentially, so a
//! seeded run always produces the same index sets regardless of how the
//! resulting instances are evaluated afterwards.

use crate::error::{NpfgaError, Result};
use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::Rng;
use std::str::FromStr;

/// How a data matrix is permuted into a randomized control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomizeMatrix {
    /// Shuffle each column independently
    PermWithinCols,
    /// Shuffle whole rows
    PermRows,
}

impl FromStr for RandomizeMatrix {
    type Err = NpfgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "perm_within_cols" => Ok(RandomizeMatrix::PermWithinCols),
            "perm_rows" => Ok(RandomizeMatrix::PermRows),
            other => Err(NpfgaError::config(format!(
                "unknown randomization method '{other}'"
            ))),
        }
    }
}

impl RandomizeMatrix {
    /// Draw `n_samples` randomized copies of `x`
    pub fn sample<R: Rng + ?Sized>(&self, x: &DMatrix<f64>, n_samples: usize, rng: &mut R) -> Vec<DMatrix<f64>> {
        (0..n_samples)
            .map(|i| {
                tracing::debug!("Random feature set {}", i);
                match self {
                    RandomizeMatrix::PermWithinCols => {
                        let mut out = x.clone();
                        for j in 0..out.ncols() {
                            let mut col: Vec<f64> = out.column(j).iter().copied().collect();
                            col.shuffle(rng);
                            out.column_mut(j).copy_from_slice(&col);
                        }
                        out
                    }
                    RandomizeMatrix::PermRows => {
                        let mut rows: Vec<usize> = (0..x.nrows()).collect();
                        rows.shuffle(rng);
                        x.select_rows(rows.iter())
                    }
                }
            })
            .collect()
    }
}

/// `end - start` indices drawn uniformly from `start..end` with replacement
pub fn draw_range<R: Rng + ?Sized>(start: usize, end: usize, rng: &mut R) -> Vec<usize> {
    if end <= start {
        return Vec::new();
    }
    (start..end).map(|_| rng.gen_range(start..end)).collect()
}

/// `n` resamples of the range `start..end`, drawn up front
///
/// With `n == 0` a single identity index set is returned, so callers can
/// treat "no bootstrap" and "bootstrap" uniformly.
pub fn resample_range<R: Rng + ?Sized>(start: usize, end: usize, n: usize, rng: &mut R) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![(start..end).collect()];
    }
    (0..n).map(|_| draw_range(start, end, rng)).collect()
}

/// Row-resampling scheme for bootstrapping the true data
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResampleScheme {
    /// Draw all rows uniformly with replacement
    Uniform,
    /// Resample the `y < threshold` and `y >= threshold` classes separately,
    /// preserving their sizes
    ByMode { threshold: f64 },
}

/// One bootstrap draw: its index and the selected rows
#[derive(Debug, Clone, PartialEq)]
pub struct Resample {
    pub index: usize,
    pub rows: Vec<usize>,
}

impl Resample {
    pub fn select_x(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        x.select_rows(self.rows.iter())
    }

    pub fn select_y(&self, y: &[f64]) -> Vec<f64> {
        self.rows.iter().map(|&i| y[i]).collect()
    }
}

/// Finite iterator of bootstrap row sets
pub struct Resampler<'a, R: Rng + ?Sized> {
    n_rows: usize,
    remaining: usize,
    next_index: usize,
    classes: Option<(Vec<usize>, Vec<usize>)>,
    rng: &'a mut R,
}

impl<'a, R: Rng + ?Sized> Resampler<'a, R> {
    /// Resampler over targets `y`, yielding `n` draws
    pub fn new(y: &[f64], n: usize, scheme: ResampleScheme, rng: &'a mut R) -> Self {
        let classes = match scheme {
            ResampleScheme::Uniform => None,
            ResampleScheme::ByMode { threshold } => {
                let (lo, hi): (Vec<usize>, Vec<usize>) =
                    (0..y.len()).partition(|&i| y[i] < threshold);
                if lo.is_empty() || hi.is_empty() {
                    tracing::warn!(
                        "Mode resampling with threshold {} leaves one class empty ({} / {})",
                        threshold,
                        lo.len(),
                        hi.len()
                    );
                }
                Some((lo, hi))
            }
        };
        Self {
            n_rows: y.len(),
            remaining: n,
            next_index: 0,
            classes,
            rng,
        }
    }
}

impl<R: Rng + ?Sized> Iterator for Resampler<'_, R> {
    type Item = Resample;

    fn next(&mut self) -> Option<Resample> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let rows = match &self.classes {
            None => draw_range(0, self.n_rows, self.rng),
            Some((lo, hi)) => {
                let mut rows: Vec<usize> = draw_range(0, lo.len(), self.rng)
                    .into_iter()
                    .map(|k| lo[k])
                    .collect();
                rows.extend(draw_range(0, hi.len(), self.rng).into_iter().map(|k| hi[k]));
                rows
            }
        };
        let index = self.next_index;
        self.next_index += 1;
        Some(Resample { index, rows })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
