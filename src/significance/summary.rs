// Channel-level summary of one significance pass
//
// Bundles observed statistics, confidences and the null model used to derive
// them, and answers the usual follow-up questions: which node came out on
// top, what covariance would a random run have produced at the same rank,
// and how does the observed exceedance curve sit against null percentiles.

use crate::dump::Table;
use crate::error::{NpfgaError, Result};
use crate::stats::{argsort_desc, cmp_f64, mean, percentile};
use nalgebra::DMatrix;
use std::fmt;
use std::path::Path;

/// Percentiles reported by default: 0, 10, ..., 100
pub fn decile_percentiles() -> Vec<f64> {
    (0..=10).map(|i| 10.0 * i as f64).collect()
}

/// Summary of the best-ranked channel
#[derive(Debug, Clone, PartialEq)]
pub struct TopNode {
    pub index: usize,
    pub tag: String,
    pub cov: f64,
    pub q: f64,
    pub exceedance: f64,
    /// Mean of the best-of-null statistic
    pub avg_null_exceedance: f64,
    /// Harmonic tail covariance implied by the observed exceedance
    pub rho_harm: f64,
    /// Covariance a random run would have reached on average at rank 0
    pub avg_null_cov: f64,
    pub percentiles: Vec<f64>,
    pub null_exceedance_percentiles: Vec<f64>,
    pub null_cov_percentiles: Vec<f64>,
}

/// Expected covariance exceedance over ranks, as returned by
/// [`ChannelStats::cov_exceedance_percentiles`]
#[derive(Debug, Clone)]
pub struct CovExceedanceTable {
    pub order: Vec<usize>,
    pub percentiles: Vec<f64>,
    /// percentiles x ranks, against the best-of-null distribution
    pub vs_first: DMatrix<f64>,
    /// percentiles x ranks, against the same-rank null distribution
    pub vs_rank: DMatrix<f64>,
}

/// Observed statistics of all channels plus the null they were tested against
#[derive(Debug, Clone)]
pub struct ChannelStats {
    pub tags: Vec<String>,
    pub covs: Vec<f64>,
    /// Test statistic per channel (|cov| or exceedance)
    pub stats: Vec<f64>,
    pub q_first: Vec<f64>,
    pub q_rank: Vec<f64>,
    /// Rank-pooled null of the test statistic (samples x channels)
    pub null_rank: DMatrix<f64>,
    /// Per-channel sorted null |cov| (samples x channels)
    pub null_covs: DMatrix<f64>,
    /// Channels by |cov|, descending
    pub order: Vec<usize>,
    pub top: TopNode,
}

impl ChannelStats {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tags: Vec<String>,
        covs: Vec<f64>,
        stats: Vec<f64>,
        q_first: Vec<f64>,
        q_rank: Vec<f64>,
        null_rank: DMatrix<f64>,
        null_covs: DMatrix<f64>,
    ) -> Result<Self> {
        let n = covs.len();
        if n == 0 {
            return Err(NpfgaError::config("channel summary needs at least one channel"));
        }
        NpfgaError::check_len("channel tags", n, tags.len())?;
        NpfgaError::check_len("channel statistics", n, stats.len())?;
        NpfgaError::check_len("first-rank confidences", n, q_first.len())?;
        NpfgaError::check_len("same-rank confidences", n, q_rank.len())?;
        NpfgaError::check_len("null rank channels", n, null_rank.ncols())?;
        if null_rank.nrows() == 0 {
            return Err(NpfgaError::config("channel summary needs a non-empty null"));
        }

        let abs_covs: Vec<f64> = covs.iter().map(|c| c.abs()).collect();
        let order = argsort_desc(&abs_covs);
        let top = evaluate_top_node(&tags, &covs, &stats, &q_first, &null_rank, order[0]);
        Ok(Self {
            tags,
            covs,
            stats,
            q_first,
            q_rank,
            null_rank,
            null_covs,
            order,
            top,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.covs.len()
    }

    pub fn n_samples(&self) -> usize {
        self.null_rank.nrows()
    }

    fn null_column(&self, rank: usize) -> Vec<f64> {
        self.null_rank.column(rank).iter().copied().collect()
    }

    /// `|cov| - cov_null(p)` for the channel at `rank`, with the null taken at `rank_null`
    pub fn expected_cov_exceedance_rank(&self, rank: usize, rank_null: usize, pctiles: &[f64]) -> Vec<f64> {
        let idx = self.order[rank];
        let cov = self.covs[idx].abs();
        let exc = self.stats[idx];
        let null = self.null_column(rank_null);
        pctiles
            .iter()
            .map(|&p| cov - cov * (1.0 + percentile(&null, p)) / (1.0 + exc))
            .collect()
    }

    /// Expected covariance exceedance for every rank, against rank 0 and the same rank
    pub fn cov_exceedance_percentiles(&self, pctiles: Option<&[f64]>) -> CovExceedanceTable {
        let percentiles = pctiles.map(<[f64]>::to_vec).unwrap_or_else(decile_percentiles);
        let n = self.n_channels();
        let mut vs_first = DMatrix::zeros(percentiles.len(), n);
        let mut vs_rank = DMatrix::zeros(percentiles.len(), n);
        for r in 0..n {
            let first = self.expected_cov_exceedance_rank(r, 0, &percentiles);
            let nth = self.expected_cov_exceedance_rank(r, r, &percentiles);
            for (k, (f, t)) in first.into_iter().zip(nth).enumerate() {
                vs_first[(k, r)] = f;
                vs_rank[(k, r)] = t;
            }
        }
        CovExceedanceTable {
            order: self.order.clone(),
            percentiles,
            vs_first,
            vs_rank,
        }
    }

    /// Human-readable report of the top node and maxima
    pub fn summarize(&self) -> String {
        self.to_string()
    }

    /// Write rank axis, observed statistics (descending) and per-rank null deciles
    pub fn tabulate_exceedance(&self, path: &Path) -> Result<()> {
        let n = self.n_channels();
        let percentiles = decile_percentiles();
        let ranks: Vec<f64> = (1..=n).map(|r| r as f64 / n as f64).collect();
        let mut observed = self.stats.clone();
        observed.sort_by(|a, b| cmp_f64(b, a));

        let header = std::iter::once("rank exs".to_string())
            .chain(percentiles.iter().map(|p| format!("null@{p}")))
            .collect::<Vec<_>>()
            .join(" ");
        let mut table = Table::new().with_header(header).column(ranks).column(observed);
        for &p in &percentiles {
            let col: Vec<f64> = (0..n).map(|r| percentile(&self.null_column(r), p)).collect();
            table = table.column(col);
        }
        table.write(path)
    }

    /// Null |cov| distribution of one channel: `(1 - i/S, cov_i)` pairs
    pub fn channel_null_cov_dist(&self, channel: usize) -> Result<Vec<(f64, f64)>> {
        if channel >= self.null_covs.ncols() {
            return Err(NpfgaError::config(format!(
                "channel {channel} out of range ({} channels)",
                self.null_covs.ncols()
            )));
        }
        let s = self.null_covs.nrows();
        Ok(self
            .null_covs
            .column(channel)
            .iter()
            .enumerate()
            .map(|(i, &c)| (1.0 - i as f64 / s as f64, c))
            .collect())
    }
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.top;
        writeln!(f, "Top-ranked node: '{}'", t.tag)?;
        writeln!(
            f,
            "  [phys]   cov  = {:+.4}     exc  = {:+.4}     q = {:.4}",
            t.cov, t.exceedance, t.q
        )?;
        writeln!(
            f,
            "  [null]  <cov> = {:+.4}    <exc> = {:+.4}",
            t.avg_null_cov, t.avg_null_exceedance
        )?;
        writeln!(f, "Percentiles")?;
        for (k, p) in t.percentiles.iter().enumerate() {
            writeln!(
                f,
                "  [null] p = {:.2}  <cov>_p = {:+.4}  <exc>_p = {:+.4}",
                0.01 * p,
                t.null_cov_percentiles[k],
                t.null_exceedance_percentiles[k]
            )?;
        }

        let abs_covs: Vec<f64> = self.covs.iter().map(|c| c.abs()).collect();
        let cidx = argmax(&abs_covs);
        let eidx = argmax(&self.stats);
        let qidx = argmax(&self.q_first);
        writeln!(f, "Max cov observed: c={:+.4} @ {}", self.covs[cidx], self.tags[cidx])?;
        writeln!(f, "Max exc observed: e={:+.4} @ {}", self.stats[eidx], self.tags[eidx])?;
        writeln!(f, "Max prb observed: q={:+.4} @ {}", self.q_first[qidx], self.tags[qidx])
    }
}

fn argmax(values: &[f64]) -> usize {
    argsort_desc(values).first().copied().unwrap_or(0)
}

fn evaluate_top_node(
    tags: &[String],
    covs: &[f64],
    stats: &[f64],
    q_first: &[f64],
    null_rank: &DMatrix<f64>,
    index: usize,
) -> TopNode {
    let cov = covs[index];
    let exceedance = stats[index];
    let null_top: Vec<f64> = null_rank.column(0).iter().copied().collect();
    let avg_null_exceedance = mean(&null_top);
    let percentiles = decile_percentiles();
    let null_exceedance_percentiles: Vec<f64> =
        percentiles.iter().map(|&p| percentile(&null_top, p)).collect();
    let null_cov_percentiles = null_exceedance_percentiles
        .iter()
        .map(|e| cov * (1.0 + e) / (1.0 + exceedance))
        .collect();
    TopNode {
        index,
        tag: tags[index].clone(),
        cov,
        q: q_first[index],
        exceedance,
        avg_null_exceedance,
        rho_harm: cov.abs() / (1.0 + exceedance),
        avg_null_cov: cov * (1.0 + avg_null_exceedance) / (1.0 + exceedance),
        percentiles,
        null_exceedance_percentiles,
        null_cov_percentiles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stats() -> ChannelStats {
        let null_rank = DMatrix::from_row_slice(4, 3, &[
            0.2, 0.1, 0.0, //
            0.4, 0.2, 0.1, //
            0.6, 0.3, 0.1, //
            0.8, 0.4, 0.2,
        ]);
        let null_covs = null_rank.clone();
        ChannelStats::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![0.3, -0.9, 0.1],
            vec![0.3, 0.9, 0.1],
            vec![0.4, 0.99, 0.05],
            vec![0.5, 0.99, 0.3],
            null_rank,
            null_covs,
        )
        .unwrap()
    }

    #[test]
    fn test_top_node() {
        let s = sample_stats();
        assert_eq!(s.order, vec![1, 0, 2]);
        assert_eq!(s.top.tag, "b");
        assert_eq!(s.top.cov, -0.9);
        assert!((s.top.avg_null_exceedance - 0.5).abs() < 1e-12);
        assert!((s.top.rho_harm - 0.9 / 1.9).abs() < 1e-12);
        assert_eq!(s.top.percentiles.len(), 11);
        // the 100th percentile of the null maximum
        assert!((s.top.null_exceedance_percentiles[10] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_cov_exceedance_table_shape() {
        let s = sample_stats();
        let table = s.cov_exceedance_percentiles(Some(&[50.0, 90.0]));
        assert_eq!(table.vs_first.shape(), (2, 3));
        // same-rank comparison uses a weaker null, so exceedance is larger
        assert!(table.vs_rank[(0, 1)] >= table.vs_first[(0, 1)]);
        // rank 0 compares against column 0 either way
        assert_eq!(table.vs_rank[(1, 0)], table.vs_first[(1, 0)]);
    }

    #[test]
    fn test_summarize_mentions_top_tag() {
        let report = sample_stats().summarize();
        assert!(report.starts_with("Top-ranked node: 'b'"));
        assert!(report.contains("Max cov observed: c=-0.9000 @ b"));
        assert!(report.contains("Max prb observed"));
        assert!(report.contains("Percentiles\n  [null] p = 0.00"));
        assert_eq!(report.lines().count(), 4 + 11 + 3);
        assert_eq!(format!("{}", sample_stats()), report);
    }

    #[test]
    fn test_tabulate_exceedance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exs.tab");
        sample_stats().tabulate_exceedance(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# rank exs null@0 null@10"));
        let m = crate::dump::read_matrix(&path).unwrap();
        assert_eq!(m.shape(), (3, 13));
        assert_eq!(m[(0, 1)], 0.9);
        assert_eq!(m[(2, 0)], 1.0);
    }

    #[test]
    fn test_channel_null_cov_dist() {
        let s = sample_stats();
        let dist = s.channel_null_cov_dist(1).unwrap();
        assert_eq!(dist.len(), 4);
        assert_eq!(dist[0], (1.0, 0.1));
        assert_eq!(dist[3], (0.25, 0.4));
        assert!(s.channel_null_cov_dist(5).is_err());
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let r = ChannelStats::new(
            vec!["a".into()],
            vec![0.1, 0.2],
            vec![0.1, 0.2],
            vec![0.5, 0.5],
            vec![0.5, 0.5],
            DMatrix::zeros(3, 2),
            DMatrix::zeros(3, 2),
        );
        assert!(r.is_err());
    }
}
