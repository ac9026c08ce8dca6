// Null-distribution estimation from randomized controls
//
// Input is a samples x channels matrix of covariances obtained on permuted
// data. Output is everything the rank tests need: per-channel tail pivots,
// the exceedance of every null sample, and rank-pooled null distributions
// ("how extreme is whichever channel lands at rank r under pure chance").
//
// Degenerate inputs (tiny samples, all-zero tails) are clamped instead of
// rejected so long batch analyses keep running.

use crate::dump::Table;
use crate::error::{NpfgaError, Result};
use crate::significance::exceedance::{calculate_exceedance, harmonic_pivot, TailScaling};
use crate::stats::{cmp_f64, mean, plotting_positions, std_dev};
use nalgebra::DMatrix;
use std::path::Path;

/// Lower bound for per-channel thresholds
pub const MIN_THRESHOLD: f64 = 1e-2;

/// Null model for one set of channels
#[derive(Debug, Clone)]
pub struct NullDistribution {
    pub n_samples: usize,
    pub n_channels: usize,
    pub tail_fraction: f64,
    /// First sorted row that belongs to the tail
    pub i_threshold: usize,
    /// Per-channel |cov| at the tail boundary, clamped to [`MIN_THRESHOLD`]
    pub thresholds: Vec<f64>,
    /// Per-channel harmonic mean of the tail
    pub pivots: Vec<f64>,
    pub scaling: TailScaling,
    /// |cov| of every null sample, unsorted (samples x channels)
    pub null_abs: DMatrix<f64>,
    /// |cov| sorted ascending within each channel
    pub channel_sorted_covs: DMatrix<f64>,
    /// Exceedance of every null sample, unsorted (samples x channels)
    pub null_exs: DMatrix<f64>,
    /// Column r: ascending distribution of the r-th largest exceedance per sample
    pub null_exs_rank: DMatrix<f64>,
    /// Column r: ascending distribution of the r-th largest |cov| per sample
    pub null_covs_rank: DMatrix<f64>,
    /// Average / std of the row-sorted (ascending) exceedances per position
    pub exs_rank_avg: Vec<f64>,
    pub exs_rank_std: Vec<f64>,
    /// Reversed plotting positions over samples (index 0 = most extreme)
    pub cum_samples: Vec<f64>,
    /// Reversed plotting positions over channels
    pub cum_channels: Vec<f64>,
}

fn columns_of(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    (0..m.ncols())
        .map(|j| m.column(j).iter().copied().collect())
        .collect()
}

fn rows_of(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    (0..m.nrows())
        .map(|i| m.row(i).iter().copied().collect())
        .collect()
}

fn sort_columns(m: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    for j in 0..out.ncols() {
        let mut col: Vec<f64> = out.column(j).iter().copied().collect();
        col.sort_by(cmp_f64);
        out.column_mut(j).copy_from_slice(&col);
    }
    out
}

/// Sort every row descending, then every column ascending
///
/// Afterwards column r holds the cross-sample distribution of the r-th
/// largest value within a sample.
pub fn rank_pooled(values: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = values.clone();
    for i in 0..out.nrows() {
        let mut row: Vec<f64> = out.row(i).iter().copied().collect();
        row.sort_by(|a, b| cmp_f64(b, a));
        for (j, v) in row.into_iter().enumerate() {
            out[(i, j)] = v;
        }
    }
    sort_columns(&out)
}

/// Build the null model from randomized-control covariances
///
/// # Arguments
/// * `null_covs` - samples x channels covariances under the null
/// * `tail_fraction` - share of samples treated as the tail, in (0, 1)
/// * `apply_tail_weight` - apply the fitted tail weight to exceedances
pub fn calculate_null_distribution(
    null_covs: &DMatrix<f64>,
    tail_fraction: f64,
    apply_tail_weight: bool,
) -> Result<NullDistribution> {
    let n_samples = null_covs.nrows();
    let n_channels = null_covs.ncols();
    if n_samples == 0 || n_channels == 0 {
        return Err(NpfgaError::config(format!(
            "null covariance matrix must be non-empty, got {n_samples}x{n_channels}"
        )));
    }
    if !(tail_fraction > 0.0 && tail_fraction < 1.0) {
        return Err(NpfgaError::config(format!(
            "tail_fraction must be in (0, 1), got {tail_fraction}"
        )));
    }

    // Keep at least one sample in the tail
    let i_threshold =
        (((1.0 - tail_fraction) * n_samples as f64 + 0.5).floor() as usize).min(n_samples - 1);
    tracing::info!("Tail contains {} samples", n_samples - i_threshold);

    let null_abs = null_covs.abs();
    let channel_sorted_covs = sort_columns(&null_abs);
    let sorted_cols = columns_of(&channel_sorted_covs);

    let scaling = TailScaling::fit(&sorted_cols, tail_fraction, apply_tail_weight);

    let tail_count = ((tail_fraction * n_samples as f64) as usize).clamp(1, n_samples);
    let boundary = n_samples - tail_count;
    let thresholds: Vec<f64> = sorted_cols
        .iter()
        .map(|col| col[boundary].max(MIN_THRESHOLD))
        .collect();
    let t_min = thresholds.iter().copied().fold(f64::INFINITY, f64::min);
    let t_max = thresholds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    tracing::info!(
        "Channel-dependent thresholds: min avg max +/- std = {:.2} {:.2} {:.2} +/- {:.4}",
        t_min,
        mean(&thresholds),
        t_max,
        std_dev(&thresholds)
    );

    // Peaks over threshold: harmonic tail average per channel
    let pivots: Vec<f64> = sorted_cols
        .iter()
        .map(|col| harmonic_pivot(&col[i_threshold..]))
        .collect();

    tracing::debug!("Calculating exceedance for {} null samples", n_samples);
    let exs_rows: Vec<Vec<f64>> = rows_of(&null_abs)
        .iter()
        .map(|row| calculate_exceedance(&pivots, row, &scaling))
        .collect();
    let null_exs = DMatrix::from_fn(n_samples, n_channels, |i, j| exs_rows[i][j]);

    let mut row_sorted = exs_rows;
    for row in row_sorted.iter_mut() {
        row.sort_by(cmp_f64);
    }
    let (exs_rank_avg, exs_rank_std): (Vec<f64>, Vec<f64>) = (0..n_channels)
        .map(|j| {
            let col: Vec<f64> = row_sorted.iter().map(|r| r[j]).collect();
            (mean(&col), std_dev(&col))
        })
        .unzip();

    Ok(NullDistribution {
        n_samples,
        n_channels,
        tail_fraction,
        i_threshold,
        thresholds,
        pivots,
        scaling,
        null_exs_rank: rank_pooled(&null_exs),
        null_covs_rank: rank_pooled(&null_abs),
        null_abs,
        channel_sorted_covs,
        null_exs,
        exs_rank_avg,
        exs_rank_std,
        cum_samples: plotting_positions(n_samples),
        cum_channels: plotting_positions(n_channels),
    })
}

impl NullDistribution {
    /// Number of samples in the tail
    pub fn tail_len(&self) -> usize {
        self.n_samples - self.i_threshold
    }

    /// Exceedance of observed |cov| values against this null's pivots
    pub fn exceedance(&self, observed_abs: &[f64]) -> Vec<f64> {
        calculate_exceedance(&self.pivots, observed_abs, &self.scaling)
    }

    /// Write the channel histogram, rank-pooled exceedance and per-rank summary tables
    pub fn write_diagnostics(&self, dir: &Path) -> Result<()> {
        Table::new()
            .column(self.cum_samples.clone())
            .matrix_columns(&self.channel_sorted_covs)
            .write(&dir.join("out_sis_channel_cov.hist"))?;
        Table::new()
            .column(self.cum_samples.clone())
            .matrix_columns(&self.null_exs_rank)
            .write(&dir.join("out_exs_rank_rand.txt"))?;
        Table::new()
            .column(self.cum_channels.clone())
            .column(self.exs_rank_avg.clone())
            .column(self.exs_rank_std.clone())
            .write(&dir.join("out_exs_rand.txt"))?;
        Ok(())
    }
}
