// Root weights from a whole-graph decomposition
//
// Each non-empty tuple's attributions are signed by the direction of each
// channel's total and weighted by that channel's confidence, then shared
// equally among the tuple's roots and normalized by how many nodes depend on
// each root.

use crate::decomposition::solver::Decomposition;
use crate::error::{NpfgaError, Result};
use crate::graph::{FeatureGraph, NodeId};
use crate::stats::cmp_f64;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct RootWeights {
    /// Root expressions, ascending by weight
    pub sorted_tags: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    /// Number of graph nodes depending on each root
    pub counts: BTreeMap<String, usize>,
    /// Weight of every non-empty tuple, keyed by its label
    pub tuple_weights: Vec<(String, f64)>,
}

/// Aggregate per-root weights
///
/// `q_values` holds one confidence per channel of `decomposition`.
pub fn calculate_root_weights(graph: &FeatureGraph, q_values: &[f64], decomposition: &Decomposition) -> Result<RootWeights> {
    tracing::info!("Calculating root weights from covariance decomposition");
    let n_channels = decomposition.mean.ncols();
    NpfgaError::check_len("confidence values", n_channels, q_values.len())?;

    let rows: Vec<usize> = (0..decomposition.tuples.len())
        .filter(|&t| !decomposition.tuples[t].is_empty())
        .collect();

    let signs: Vec<f64> = (0..n_channels)
        .map(|c| {
            let s: f64 = rows.iter().map(|&t| decomposition.mean[(t, c)]).sum();
            if s > 0.0 {
                1.0
            } else if s < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
        .collect();

    let tuple_weight: Vec<f64> = rows
        .iter()
        .map(|&t| {
            (0..n_channels)
                .map(|c| decomposition.mean[(t, c)] * signs[c] * q_values[c])
                .sum()
        })
        .collect();

    let mut counts: BTreeMap<NodeId, usize> = graph.roots().iter().map(|&r| (r, 0)).collect();
    for node in graph.nodes() {
        for r in &node.root_deps {
            *counts.entry(*r).or_default() += 1;
        }
    }

    let mut weights: BTreeMap<NodeId, f64> = graph.roots().iter().map(|&r| (r, 0.0)).collect();
    for (k, &t) in rows.iter().enumerate() {
        let tuple = &decomposition.tuples[t];
        for r in tuple {
            *weights.entry(*r).or_default() += tuple_weight[k] / tuple.len() as f64;
        }
    }
    for (r, w) in weights.iter_mut() {
        let n = counts.get(r).copied().unwrap_or(0);
        if n > 0 {
            *w /= n as f64;
        }
    }

    let tag = |r: &NodeId| graph.node(*r).expr.clone();
    let mut sorted: Vec<(String, f64)> = weights.iter().map(|(r, w)| (tag(r), *w)).collect();
    sorted.sort_by(|a, b| cmp_f64(&a.1, &b.1));

    let tuple_weights: Vec<(String, f64)> = rows
        .iter()
        .zip(&tuple_weight)
        .map(|(&t, &w)| (decomposition.label(t), w))
        .collect();
    for (label, w) in &tuple_weights {
        tracing::info!("i...j = {:<50}  w(i...j) = {:.4e}", label, w);
    }
    for (t, w) in &sorted {
        tracing::info!("i = {:<50}  w0(i) = {:.4e}", t, w);
    }

    Ok(RootWeights {
        sorted_tags: sorted.iter().map(|(t, _)| t.clone()).collect(),
        weights: sorted.into_iter().collect(),
        counts: counts.iter().map(|(r, n)| (tag(r), *n)).collect(),
        tuple_weights,
    })
}
