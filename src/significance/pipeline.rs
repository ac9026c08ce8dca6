// Single-pass significance run over the whole feature graph
//
// 1. Evaluate the graph on every randomized control (batch map)
// 2. Build the null model once
// 3. Evaluate the true data, optionally bootstrapped, and rank-test each draw
// 4. Average covariances, exceedances and confidences over draws

use crate::config::AnalysisConfig;
use crate::error::{NpfgaError, Result};
use crate::graph::{cov_confidence_key, rank_nodes, CorrelationMeasure, GraphEvaluator, NodeStats, RankMode, StatsMap};
use crate::resample::{Resample, ResampleScheme, Resampler};
use crate::significance::null_distribution::{calculate_null_distribution, NullDistribution};
use crate::significance::rank_test::{rank_ptest, RankTestResult};
use crate::significance::summary::ChannelStats;
use crate::stats::{mean, std_dev};
use nalgebra::DMatrix;
use rand::Rng;
use rayon::prelude::*;

/// Covariances of every node on every control (instances x nodes)
///
/// Controls are evaluated in parallel; row `i` always belongs to control `i`.
pub fn apply_batch<E: GraphEvaluator + ?Sized>(
    evaluator: &E,
    controls: &[DMatrix<f64>],
    y: &[f64],
    measure: CorrelationMeasure,
) -> Result<DMatrix<f64>> {
    let n_nodes = evaluator.graph().len();
    let rows: Vec<Vec<f64>> = controls
        .par_iter()
        .enumerate()
        .map(|(i, x)| {
            tracing::debug!("Randomized control, instance {}", i);
            let covs = evaluator.correlate(x, y, measure)?;
            NpfgaError::check_len("covariances per node", n_nodes, covs.len())?;
            Ok(covs)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DMatrix::from_fn(rows.len(), n_nodes, |i, j| rows[i][j]))
}

/// Null model plus both rank tests for one set of observed covariances
#[derive(Debug, Clone)]
pub struct NullTest {
    pub null: NullDistribution,
    pub covs_abs: Vec<f64>,
    pub exs: Vec<f64>,
    /// |cov| against the rank-pooled |cov| null
    pub cov_test: RankTestResult,
    /// Exceedance against the rank-pooled exceedance null
    pub exs_test: RankTestResult,
}

impl NullTest {
    /// Channel summaries for the |cov| test and the exceedance test
    pub fn channel_stats(&self, tags: &[String], covs: &[f64]) -> Result<(ChannelStats, ChannelStats)> {
        let cstats = ChannelStats::new(
            tags.to_vec(),
            covs.to_vec(),
            self.covs_abs.clone(),
            self.cov_test.q_first.clone(),
            self.cov_test.q_rank.clone(),
            self.null.null_covs_rank.clone(),
            self.null.channel_sorted_covs.clone(),
        )?;
        let xstats = ChannelStats::new(
            tags.to_vec(),
            covs.to_vec(),
            self.exs.clone(),
            self.exs_test.q_first.clone(),
            self.exs_test.q_rank.clone(),
            self.null.null_exs_rank.clone(),
            self.null.channel_sorted_covs.clone(),
        )?;
        Ok((cstats, xstats))
    }
}

fn test_against(null: &NullDistribution, covs: &[f64]) -> Result<(Vec<f64>, Vec<f64>, RankTestResult, RankTestResult)> {
    let covs_abs: Vec<f64> = covs.iter().map(|c| c.abs()).collect();
    let cov_test = rank_ptest(&covs_abs, &null.null_covs_rank, &null.cum_samples)?;
    let exs = null.exceedance(&covs_abs);
    let exs_test = rank_ptest(&exs, &null.null_exs_rank, &null.cum_samples)?;
    Ok((covs_abs, exs, cov_test, exs_test))
}

/// Build the null from `null_covs` and rank-test the observed `covs`
pub fn calculate_null_and_test(covs: &[f64], null_covs: &DMatrix<f64>, config: &AnalysisConfig) -> Result<NullTest> {
    NpfgaError::check_len("observed channels", null_covs.ncols(), covs.len())?;
    let null = calculate_null_distribution(null_covs, config.tail_fraction, config.apply_fitted_tail_weight)?;
    let (covs_abs, exs, cov_test, exs_test) = test_against(&null, covs)?;
    Ok(NullTest {
        null,
        covs_abs,
        exs,
        cov_test,
        exs_test,
    })
}

/// Bootstrap mean and std of a per-node quantity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Averaged {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Averaged {
    fn over(samples: &[Vec<f64>], n_nodes: usize) -> Self {
        let (mean, std): (Vec<f64>, Vec<f64>) = (0..n_nodes)
            .map(|j| {
                let col: Vec<f64> = samples.iter().map(|s| s[j]).collect();
                (mean(&col), std_dev(&col))
            })
            .unzip();
        Self { mean, std }
    }
}

/// Outcome of [`run_npfga`]
#[derive(Debug, Clone)]
pub struct NpfgaRun {
    pub tags: Vec<String>,
    pub covs: Averaged,
    pub exs: Averaged,
    /// |cov| test, best-of-null confidence
    pub cq: Averaged,
    /// |cov| test, same-rank confidence
    pub cq_rank: Averaged,
    /// Exceedance test, best-of-null confidence
    pub xq: Averaged,
    /// Exceedance test, same-rank confidence
    pub xq_rank: Averaged,
    pub null: NullDistribution,
    pub cstats: ChannelStats,
    pub xstats: ChannelStats,
    /// Per-node cov, q (exceedance test) and complexity, ranked by |cov * q|
    pub stats: StatsMap,
}

struct Draw {
    covs: Vec<f64>,
    exs: Vec<f64>,
    cov_test: RankTestResult,
    exs_test: RankTestResult,
}

fn average_draws(draws: &[Draw], n_nodes: usize, field: fn(&Draw) -> &[f64]) -> Averaged {
    let samples: Vec<Vec<f64>> = draws.iter().map(|d| field(d).to_vec()).collect();
    Averaged::over(&samples, n_nodes)
}

/// Run the complete significance analysis once over all nodes
///
/// `controls` are randomized copies of `x`, correlated against `control_y`.
/// With `config.bootstrap > 0` the true data is resampled that many times
/// (stratified by class when `bootstrap_by_mode` is set) and results are
/// averaged; otherwise the single true draw is used.
pub fn run_npfga<E, R>(
    evaluator: &E,
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    control_y: &[f64],
    config: &AnalysisConfig,
    rng: &mut R,
) -> Result<NpfgaRun>
where
    E: GraphEvaluator + ?Sized,
    R: Rng + ?Sized,
{
    NpfgaError::check_len("target length", x.nrows(), y.len())?;
    let graph = evaluator.graph();
    let n_nodes = graph.len();
    let tags = graph.tags();

    tracing::info!(
        "Running NPFGA on {} nodes with {} randomized controls",
        n_nodes,
        controls.len()
    );
    let null_covs = apply_batch(evaluator, controls, control_y, config.correlation_measure)?;
    let null = calculate_null_distribution(&null_covs, config.tail_fraction, config.apply_fitted_tail_weight)?;

    let resamples: Vec<Resample> = if config.bootstrap == 0 {
        vec![Resample {
            index: 0,
            rows: (0..y.len()).collect(),
        }]
    } else {
        let scheme = if config.bootstrap_by_mode {
            ResampleScheme::ByMode {
                threshold: config.bootstrap_mode_threshold,
            }
        } else {
            ResampleScheme::Uniform
        };
        Resampler::new(y, config.bootstrap, scheme, rng).collect()
    };

    let draws: Vec<Draw> = resamples
        .par_iter()
        .map(|r| {
            tracing::debug!("Resampling idx {}", r.index);
            let covs = evaluator.correlate(&r.select_x(x), &r.select_y(y), config.correlation_measure)?;
            NpfgaError::check_len("covariances per node", n_nodes, covs.len())?;
            let (_, exs, cov_test, exs_test) = test_against(&null, &covs)?;
            Ok(Draw {
                covs,
                exs,
                cov_test,
                exs_test,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let covs = average_draws(&draws, n_nodes, |d| d.covs.as_slice());
    let exs = average_draws(&draws, n_nodes, |d| d.exs.as_slice());
    let cq = average_draws(&draws, n_nodes, |d| d.cov_test.q_first.as_slice());
    let cq_rank = average_draws(&draws, n_nodes, |d| d.cov_test.q_rank.as_slice());
    let xq = average_draws(&draws, n_nodes, |d| d.exs_test.q_first.as_slice());
    let xq_rank = average_draws(&draws, n_nodes, |d| d.exs_test.q_rank.as_slice());

    let covs_abs: Vec<f64> = covs.mean.iter().map(|c| c.abs()).collect();
    let cstats = ChannelStats::new(
        tags.clone(),
        covs.mean.clone(),
        covs_abs.clone(),
        cq.mean.clone(),
        cq_rank.mean.clone(),
        null.null_covs_rank.clone(),
        null.channel_sorted_covs.clone(),
    )?;
    let xstats = ChannelStats::new(
        tags.clone(),
        covs.mean.clone(),
        exs.mean.clone(),
        xq.mean.clone(),
        xq_rank.mean.clone(),
        null.null_exs_rank.clone(),
        null.channel_sorted_covs.clone(),
    )?;

    if let Some(dir) = &config.dump_dir {
        null.write_diagnostics(dir)?;
        let exs_test = rank_ptest(&exs.mean, &null.null_exs_rank, &null.cum_samples)?;
        exs_test.write_observed(&exs.mean, &null.cum_channels, &dir.join("out_exs_phys.txt"))?;
    }

    let complexities = graph.complexities(&config.op_complexity)?;
    let mut stats: StatsMap = (0..n_nodes)
        .map(|i| {
            (
                i,
                NodeStats {
                    cov: covs.mean[i],
                    q: xq.mean[i],
                    complexity: complexities[i],
                    rank: 0.0,
                },
            )
        })
        .collect();
    rank_nodes(&mut stats, RankMode::Score, cov_confidence_key);

    tracing::info!(
        "Top node '{}' (cov {:+.4}, q {:.4}); mean q over nodes {:.4}",
        xstats.top.tag,
        xstats.top.cov,
        xstats.top.q,
        mean(&xq.mean)
    );

    Ok(NpfgaRun {
        tags,
        covs,
        exs,
        cq,
        cq_rank,
        xq,
        xq_rank,
        null,
        cstats,
        xstats,
        stats,
    })
}
