// Partially randomized marginals and the linear solve
//
// For a tuple t the measured marginal covariance is obtained by replacing the
// root columns in t with a randomized control while keeping all other
// columns, averaged over controls. The marginal of t equals the sum of the
// contributions of every tuple disjoint from t, which is the system A x = b
// solved here once per bootstrap resample.

use crate::decomposition::tuples::{coefficient_matrix, marginal_tuples, Tuple};
use crate::error::{NpfgaError, Result};
use crate::graph::{FeatureGraph, GraphEvaluator, NodeId};
use crate::resample::resample_range;
use crate::stats::normalized_covariance;
use nalgebra::DMatrix;
use rand::Rng;
use rayon::prelude::*;

/// Additive covariance attribution per tuple
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub tuples: Vec<Tuple>,
    /// Root expressions of each tuple, for reporting
    pub tuple_tags: Vec<Vec<String>>,
    /// Channels covered, in column order
    pub channels: Vec<NodeId>,
    /// tuples x channels, mean over resamples
    pub mean: DMatrix<f64>,
    /// tuples x channels, population std over resamples
    pub std: DMatrix<f64>,
}

impl Decomposition {
    /// Sum of all tuple attributions of a channel
    pub fn total(&self, channel: usize) -> f64 {
        self.mean.column(channel).sum()
    }

    /// Tuple display label, roots joined by ':'
    pub fn label(&self, tuple: usize) -> String {
        self.tuple_tags[tuple].join(":")
    }
}

/// Replace the data columns of `roots` in `x` by those of `control`
pub fn partial_control(graph: &FeatureGraph, x: &DMatrix<f64>, control: &DMatrix<f64>, roots: &[NodeId]) -> Result<DMatrix<f64>> {
    NpfgaError::check_len("control rows", x.nrows(), control.nrows())?;
    let mut out = x.clone();
    for &r in roots {
        let col = graph
            .root_column(r)
            .ok_or_else(|| NpfgaError::config(format!("node {r} is not a root")))?;
        out.set_column(col, &control.column(col));
    }
    Ok(out)
}

/// Solve `A x = b` for every resample
///
/// `bar_covs[k]` is the tuples x channels marginal matrix of resample k. A
/// singular coefficient matrix is a numerical error.
pub fn solve_decomposition(tuples: &[Tuple], bar_covs: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>> {
    let a = coefficient_matrix(tuples);
    let lu = a.lu();
    tracing::debug!("Solving LSEQ for {} resamples", bar_covs.len());
    bar_covs
        .iter()
        .enumerate()
        .map(|(k, b)| {
            NpfgaError::check_len("marginal rows", tuples.len(), b.nrows())?;
            lu.solve(b).ok_or_else(|| {
                NpfgaError::Numerical(format!(
                    "singular decomposition system ({} tuples, resample {k})",
                    tuples.len()
                ))
            })
        })
        .collect()
}

/// Elementwise mean and population std over a list of equally shaped matrices
fn mean_std(samples: &[DMatrix<f64>]) -> (DMatrix<f64>, DMatrix<f64>) {
    let (r, c) = samples.first().map(|m| m.shape()).unwrap_or((0, 0));
    let n = samples.len().max(1) as f64;
    let mut mean = DMatrix::zeros(r, c);
    for m in samples {
        mean += m;
    }
    mean /= n;
    let mut var = DMatrix::zeros(r, c);
    for m in samples {
        let d = m - &mean;
        var += d.component_mul(&d);
    }
    var /= n;
    (mean, var.map(f64::sqrt))
}

/// Node values selected by `rows`, correlated against `y` selected the same way
fn resampled_cov(values: &[f64], y: &[f64], rows: &[usize]) -> f64 {
    let v: Vec<f64> = rows.iter().map(|&i| values[i]).collect();
    let t: Vec<f64> = rows.iter().map(|&i| y[i]).collect();
    normalized_covariance(&v, &t)
}

/// Core loop shared by single-node and whole-graph decomposition
///
/// `evaluate` maps a partially randomized matrix to one value column per channel.
#[allow(clippy::too_many_arguments)]
fn decompose_with<E, F, R>(
    evaluator: &E,
    channels: Vec<NodeId>,
    tuples: Vec<Tuple>,
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    bootstrap: usize,
    rng: &mut R,
    evaluate: F,
) -> Result<Decomposition>
where
    E: GraphEvaluator + ?Sized,
    F: Fn(&DMatrix<f64>) -> Result<Vec<Vec<f64>>> + Sync,
    R: Rng + ?Sized,
{
    NpfgaError::check_len("target length", x.nrows(), y.len())?;
    if controls.is_empty() {
        return Err(NpfgaError::config("decomposition needs at least one randomized control"));
    }
    let graph = evaluator.graph();
    let resamples = resample_range(0, x.nrows(), bootstrap, rng);
    let n_resample = resamples.len();
    let n_channels = channels.len();

    let mut bar_covs = vec![DMatrix::zeros(tuples.len(), n_channels); n_resample];
    for (t_idx, tuple) in tuples.iter().enumerate() {
        let tags: Vec<&str> = tuple.iter().map(|&r| graph.node(r).expr.as_str()).collect();
        tracing::info!("Marginal {}/{}: ({})", t_idx + 1, tuples.len(), tags.join(", "));

        // instances x resamples x channels
        let per_instance: Vec<Vec<Vec<f64>>> = controls
            .par_iter()
            .enumerate()
            .map(|(i, control)| {
                tracing::debug!(" - Randomized control, instance {}", i);
                let partial = partial_control(graph, x, control, tuple)?;
                let values = evaluate(&partial)?;
                NpfgaError::check_len("evaluated channels", n_channels, values.len())?;
                Ok(resamples
                    .iter()
                    .map(|rows| values.iter().map(|v| resampled_cov(v, y, rows)).collect())
                    .collect())
            })
            .collect::<Result<Vec<_>>>()?;

        let n_inst = per_instance.len() as f64;
        for (k, bar) in bar_covs.iter_mut().enumerate() {
            for c in 0..n_channels {
                bar[(t_idx, c)] = per_instance.iter().map(|inst| inst[k][c]).sum::<f64>() / n_inst;
            }
        }
    }

    let solved = solve_decomposition(&tuples, &bar_covs)?;
    let (mean, std) = mean_std(&solved);
    let tuple_tags = tuples
        .iter()
        .map(|t| t.iter().map(|&r| graph.node(r).expr.clone()).collect())
        .collect();
    Ok(Decomposition {
        tuples,
        tuple_tags,
        channels,
        mean,
        std,
    })
}

/// Decompose the covariance of one node over its own roots
///
/// `bootstrap == 0` uses the full data once; otherwise that many row
/// resamples are drawn up front and shared by every tuple.
pub fn decompose_node<E, R>(
    evaluator: &E,
    node: NodeId,
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    bootstrap: usize,
    rng: &mut R,
) -> Result<Decomposition>
where
    E: GraphEvaluator + ?Sized,
    R: Rng + ?Sized,
{
    let graph = evaluator.graph();
    if node >= graph.len() {
        return Err(NpfgaError::config(format!("unknown node {node}")));
    }
    tracing::info!("Nonlinear covariance decomposition for '{}'", graph.node(node).expr);
    let roots: Vec<NodeId> = graph.node(node).root_deps.iter().copied().collect();
    let tuples = marginal_tuples(&roots, roots.len());
    decompose_with(evaluator, vec![node], tuples, x, y, controls, bootstrap, rng, |m| {
        Ok(vec![evaluator.evaluate_single(node, m)?])
    })
}

/// Decompose every node at once over all roots of the graph
///
/// Tuples go up to the largest root arity found among the nodes.
pub fn decompose_graph<E, R>(
    evaluator: &E,
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    bootstrap: usize,
    rng: &mut R,
) -> Result<Decomposition>
where
    E: GraphEvaluator + ?Sized,
    R: Rng + ?Sized,
{
    tracing::info!("Nonlinear covariance decomposition");
    let graph = evaluator.graph();
    let max_size = graph.nodes().map(|n| n.root_deps.len()).max().unwrap_or(0);
    tracing::info!("Partial randomizations (max degree = {})", max_size);
    let tuples = marginal_tuples(graph.roots(), max_size);
    let channels: Vec<NodeId> = (0..graph.len()).collect();
    decompose_with(evaluator, channels, tuples, x, y, controls, bootstrap, rng, |m| {
        let values = evaluator.apply(m)?;
        Ok((0..values.ncols())
            .map(|j| values.column(j).iter().copied().collect())
            .collect())
    })
}
