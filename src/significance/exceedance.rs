// Peaks-over-threshold exceedance and tail scaling
//
// A channel's raw |covariance| is compared with the harmonic mean of its own
// null tail (the "pivot"). The resulting exceedance is dimensionless, so
// channels with heavy and light null tails become comparable.

use crate::stats::percentile;

/// Offset that keeps the harmonic mean finite for zero-valued tail entries
pub const HARMONIC_EPSILON: f64 = 1e-10;

/// Harmonic mean of tail values: `n / sum(1 / (v + eps))`
pub fn harmonic_pivot(tail: &[f64]) -> f64 {
    let denom: f64 = tail.iter().map(|v| 1.0 / (v + HARMONIC_EPSILON)).sum();
    tail.len() as f64 / denom
}

/// Multiplicative correction applied to exceedances
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TailScaling {
    /// Factor 1 for every channel
    #[default]
    Identity,
    /// Per-channel tail weight fitted from two extreme null percentiles
    TailWeight {
        /// `(1 - p0) / (1 - p1)` per channel
        weights: Vec<f64>,
        /// When false the weight is kept for inspection but the factor stays 1
        apply: bool,
    },
}

impl TailScaling {
    /// Fit the tail weight from per-channel |null| columns
    ///
    /// `p0` is taken at percentile `100(1 - 2 tail)` and `p1` at
    /// `100(1 - tail)`.
    pub fn fit(sorted_columns: &[Vec<f64>], tail_fraction: f64, apply: bool) -> Self {
        let weights = sorted_columns
            .iter()
            .map(|col| {
                let p0 = percentile(col, 100.0 * (1.0 - 2.0 * tail_fraction));
                let p1 = percentile(col, 100.0 * (1.0 - tail_fraction));
                (1.0 - p0) / (1.0 - p1)
            })
            .collect();
        TailScaling::TailWeight { weights, apply }
    }

    /// Scaling factor for `channel` given its observed value
    pub fn factor(&self, channel: usize, _observed: f64) -> f64 {
        match self {
            TailScaling::Identity => 1.0,
            TailScaling::TailWeight { weights, apply: true } => {
                weights.get(channel).copied().unwrap_or(1.0)
            }
            TailScaling::TailWeight { apply: false, .. } => 1.0,
        }
    }

    /// Fitted weights, if any
    pub fn weights(&self) -> Option<&[f64]> {
        match self {
            TailScaling::Identity => None,
            TailScaling::TailWeight { weights, .. } => Some(weights),
        }
    }
}

/// Exceedance per channel: `scale * (observed - pivot) / pivot`
pub fn calculate_exceedance(pivots: &[f64], observed: &[f64], scaling: &TailScaling) -> Vec<f64> {
    pivots
        .iter()
        .zip(observed.iter())
        .enumerate()
        .map(|(c, (&pivot, &obs))| (obs - pivot) / pivot * scaling.factor(c, obs))
        .collect()
}
