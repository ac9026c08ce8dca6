// Root-attribution filter over ranked candidates
//
// A top-ranked node is only trusted if every root it depends on carries a
// significant share of its covariance with the right sign. Candidates are
// decomposed from best rank downwards and scored by how large and how evenly
// attributed their total covariance is.

use crate::config::AnalysisConfig;
use crate::decomposition::solver::{decompose_node, Decomposition};
use crate::error::{NpfgaError, Result};
use crate::graph::{GraphEvaluator, NodeId};
use crate::stats::{argsort_asc, std_dev};
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Significance multiple required of each root attribution
pub const ROOT_SIGMA: f64 = 3.0;

/// What to return when no candidate passes the root filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionFallback {
    /// Highest-scoring candidate, kept or not
    #[default]
    BestScore,
    /// Fail with [`NpfgaError::NoCandidate`]
    Fail,
}

/// Attribution of a candidate's covariance to one root
#[derive(Debug, Clone, PartialEq)]
pub struct RootContribution {
    pub root: NodeId,
    pub tag: String,
    /// Sum over tuples containing the root, each divided by tuple size
    pub cov: f64,
    /// Per-tuple stds added in quadrature
    pub std: f64,
    /// `|cov| >= 3 std` and same sign as the total
    pub significant: bool,
}

/// Filter verdict for one candidate node
#[derive(Debug, Clone)]
pub struct CandidateReport {
    pub node: NodeId,
    pub expr: String,
    pub total_cov: f64,
    pub roots: Vec<RootContribution>,
    pub kept: bool,
    /// `|total| - std(root covs)`; `None` when the dispersion is NaN
    pub score: Option<f64>,
    pub decomposition: Decomposition,
}

/// Outcome of [`run_cov_decomposition_filter`]
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub selected: NodeId,
    /// Whether the selected node itself passed the filter
    pub selected_kept: bool,
    pub candidates: Vec<CandidateReport>,
}

/// Aggregate tuple attributions of channel `channel` per root
pub fn root_contributions(
    decomposition: &Decomposition,
    channel: usize,
    roots: &[(NodeId, String)],
    total_cov: f64,
) -> Vec<RootContribution> {
    roots
        .iter()
        .map(|(root, tag)| {
            let mut cov = 0.0;
            let mut var = 0.0;
            for (t, tuple) in decomposition.tuples.iter().enumerate() {
                if tuple.contains(root) {
                    cov += decomposition.mean[(t, channel)] / tuple.len() as f64;
                    let s = decomposition.std[(t, channel)];
                    var += s * s;
                }
            }
            let std = var.sqrt();
            let significant = cov.abs() >= ROOT_SIGMA * std && cov * total_cov >= 0.0;
            RootContribution {
                root: *root,
                tag: tag.clone(),
                cov,
                std,
                significant,
            }
        })
        .collect()
}

fn log_tuples(d: &Decomposition) {
    let col: Vec<f64> = d.mean.column(0).iter().copied().collect();
    for t in argsort_asc(&col) {
        tracing::info!(
            "i...j = {:<50}  cov(i..j) = {:+.4} (+-{:.4})",
            d.label(t),
            d.mean[(t, 0)],
            d.std[(t, 0)]
        );
    }
}

/// Evaluate one candidate: decompose, attribute to roots, score
pub fn assess_candidate<E, R>(
    evaluator: &E,
    node: NodeId,
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    bootstrap: usize,
    rng: &mut R,
) -> Result<CandidateReport>
where
    E: GraphEvaluator + ?Sized,
    R: Rng + ?Sized,
{
    let graph = evaluator.graph();
    let decomposition = decompose_node(evaluator, node, x, y, controls, bootstrap, rng)?;
    log_tuples(&decomposition);

    let total_cov = decomposition.total(0);
    tracing::info!("Total covariance for this channel is {:+.4}", total_cov);
    let roots: Vec<(NodeId, String)> = graph
        .node(node)
        .root_deps
        .iter()
        .map(|&r| (r, graph.node(r).expr.clone()))
        .collect();
    let contributions = root_contributions(&decomposition, 0, &roots, total_cov);
    for c in &contributions {
        tracing::info!(
            "x={} => rho1(x) = {:+.4} +- {:.4}    {}",
            c.tag,
            c.cov,
            c.std,
            if c.significant { "" } else { "x" }
        );
    }
    let kept = contributions.iter().all(|c| c.significant);

    let root_covs: Vec<f64> = contributions.iter().map(|c| c.cov).collect();
    let delta = std_dev(&root_covs);
    tracing::info!("  => Score = |{:.4}| - {:.4}", total_cov, delta);
    let score = if delta.is_nan() {
        tracing::warn!("NaN in covariance decomposition of '{}'", graph.node(node).expr);
        None
    } else {
        Some(total_cov.abs() - delta)
    };

    Ok(CandidateReport {
        node,
        expr: graph.node(node).expr.clone(),
        total_cov,
        roots: contributions,
        kept,
        score,
        decomposition,
    })
}

/// Pick the best trustworthy node among ranked candidates
///
/// `order` lists candidate nodes best first. Among scored candidates the
/// highest-scoring kept one wins; if none is kept, `fallback` decides.
#[allow(clippy::too_many_arguments)]
pub fn run_cov_decomposition_filter<E, R>(
    evaluator: &E,
    order: &[NodeId],
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    bootstrap: usize,
    fallback: DecompositionFallback,
    rng: &mut R,
) -> Result<FilterOutcome>
where
    E: GraphEvaluator + ?Sized,
    R: Rng + ?Sized,
{
    tracing::info!("Cov decomposition filter over {} candidates", order.len());
    let candidates = order
        .iter()
        .map(|&node| assess_candidate(evaluator, node, x, y, controls, bootstrap, rng))
        .collect::<Result<Vec<_>>>()?;

    let best = |kept_only: bool| {
        candidates
            .iter()
            .filter(|c| !kept_only || c.kept)
            .filter_map(|c| c.score.map(|s| (c, s)))
            .fold(None::<(&CandidateReport, f64)>, |acc, (c, s)| match acc {
                Some((_, best)) if best >= s => acc,
                _ => Some((c, s)),
            })
            .map(|(c, _)| c)
    };

    if best(false).is_none() {
        return Err(NpfgaError::NoCandidate);
    }
    let chosen = match (best(true), fallback) {
        (Some(c), _) => c,
        (None, DecompositionFallback::Fail) => return Err(NpfgaError::NoCandidate),
        (None, DecompositionFallback::BestScore) => {
            tracing::warn!("No candidate passed the root filter; falling back to best score");
            best(false).ok_or(NpfgaError::NoCandidate)?
        }
    };
    let (selected, selected_kept) = (chosen.node, chosen.kept);
    Ok(FilterOutcome {
        selected,
        selected_kept,
        candidates,
    })
}

/// [`run_cov_decomposition_filter`] with bootstrap count and fallback taken from `config`
pub fn select_candidate<E, R>(
    evaluator: &E,
    order: &[NodeId],
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    config: &AnalysisConfig,
    rng: &mut R,
) -> Result<FilterOutcome>
where
    E: GraphEvaluator + ?Sized,
    R: Rng + ?Sized,
{
    run_cov_decomposition_filter(
        evaluator,
        order,
        x,
        y,
        controls,
        config.bootstrap,
        config.decomposition_fallback,
        rng,
    )
}
