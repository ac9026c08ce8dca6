//! Descriptive statistics over `f64` samples
//!
//! Helpers used throughout the significance and modeling code. Moments go
//! through nalgebra vectors and dispersion is the population standard
//! deviation (divide by n). Quantiles come from aprender's `DescriptiveStats`
//! (R-7 linear interpolation) over trueno vectors.

use aprender::stats::DescriptiveStats;
use nalgebra::DVector;
use std::cmp::Ordering;
use trueno::Vector;

/// Total order for floats that sorts NaN last
pub fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or_else(|| match (a.is_nan(), b.is_nan()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => Ordering::Equal,
    })
}

/// Sort a vector ascending
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(cmp_f64);
    v
}

/// Indices that sort `values` in descending order (stable)
pub fn argsort_desc(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| cmp_f64(&values[b], &values[a]));
    idx
}

/// Indices that sort `values` in ascending order (stable)
pub fn argsort_asc(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| cmp_f64(&values[a], &values[b]));
    idx
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    DVector::from_column_slice(values).mean()
}

/// Population standard deviation; NaN for an empty slice
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let v = DVector::from_column_slice(values);
    let centered = v.add_scalar(-v.mean());
    (centered.norm_squared() / values.len() as f64).sqrt()
}

/// Median (average of the two central order statistics for even lengths)
pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Percentile `p` in [0, 100]; NaN for an empty slice or NaN entries
///
/// Delegates to aprender's R-7 quantile, so the result carries `f32`
/// precision.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let narrowed: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    let vector = Vector::from_slice(&narrowed);
    DescriptiveStats::new(&vector)
        .quantile(p.clamp(0.0, 100.0) / 100.0)
        .map(f64::from)
        .unwrap_or(f64::NAN)
}

/// First index at which `value` could be inserted keeping `sorted_values` ordered
pub fn searchsorted_left(sorted_values: &[f64], value: f64) -> usize {
    sorted_values.partition_point(|v| *v < value)
}

/// Reversed plotting-position axis `(i - 0.5)/n` for i = n..1
///
/// Index 0 holds the cumulative probability of the most extreme observation.
pub fn plotting_positions(n: usize) -> Vec<f64> {
    (1..=n)
        .rev()
        .map(|i| (i as f64 - 0.5) / n as f64)
        .collect()
}

/// Z-score a vector (population std); a constant vector maps to NaN
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let s = std_dev(values);
    DVector::from_column_slice(values)
        .map(|v| (v - m) / s)
        .as_slice()
        .to_vec()
}

/// Normalized covariance `z(x) . z(y) / n`, i.e. the Pearson moment
pub fn normalized_covariance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return f64::NAN;
    }
    let zx = DVector::from_vec(zscore(&x[..n]));
    let zy = DVector::from_vec(zscore(&y[..n]));
    zx.dot(&zy) / n as f64
}

/// Fractional ranks (1-based, ties averaged)
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let order = argsort_asc(values);
    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            out[order[k]] = avg;
        }
        i = j + 1;
    }
    out
}
