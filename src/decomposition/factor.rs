// Per-factor null analysis of a single node
//
// How much of a node's covariance survives when one root is randomized
// (`randomize_this`), or when every root except one is (`randomize_other`)?
// The observed |cov| is located in each partial null to give a q value.

use crate::decomposition::solver::partial_control;
use crate::dump::Table;
use crate::error::{NpfgaError, Result};
use crate::graph::{GraphEvaluator, NodeId};
use crate::stats::{normalized_covariance, searchsorted_left, sorted};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorMode {
    /// Randomize only the factor under test
    RandomizeThis,
    /// Randomize every root except the factor under test
    RandomizeOther,
}

impl FromStr for FactorMode {
    type Err = NpfgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "randomize_this" => Ok(FactorMode::RandomizeThis),
            "randomize_other" => Ok(FactorMode::RandomizeOther),
            other => Err(NpfgaError::config(format!("unknown factor analysis mode '{other}'"))),
        }
    }
}

impl FactorMode {
    fn short(&self) -> &'static str {
        match self {
            FactorMode::RandomizeThis => "this",
            FactorMode::RandomizeOther => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorResult {
    /// Fraction of the partial null below the observed |cov|
    pub q_value: f64,
    pub min_cov: f64,
    pub max_cov: f64,
    /// Sorted |cov| under partial randomization
    pub null: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FactorAnalysis {
    pub mode: FactorMode,
    pub node: NodeId,
    pub cov: f64,
    /// Sorted |cov| with every root randomized
    pub null_base: Vec<f64>,
    pub factors: BTreeMap<String, FactorResult>,
}

fn sorted_abs_covs<E, F>(evaluator: &E, node: NodeId, n: usize, y: &[f64], make: F) -> Result<Vec<f64>>
where
    E: GraphEvaluator + ?Sized,
    F: Fn(usize) -> Result<DMatrix<f64>> + Sync,
{
    let covs = (0..n)
        .into_par_iter()
        .map(|i| {
            let x = make(i)?;
            let v = evaluator.evaluate_single(node, &x)?;
            Ok(normalized_covariance(&v, y).abs())
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(sorted(&covs))
}

fn write_null(path: &Path, null: &[f64]) -> Result<()> {
    let n = null.len() as f64;
    Table::new()
        .column((0..null.len()).map(|i| i as f64 / n).collect::<Vec<_>>())
        .column(null.to_vec())
        .write(path)
}

/// Run the factor analysis of `node` against randomized `controls`
///
/// With `dump_dir` set, writes `out_null.txt` and one
/// `out_{this|other}_{root}.txt` per factor.
pub fn run_factor_analysis<E: GraphEvaluator + ?Sized>(
    mode: FactorMode,
    evaluator: &E,
    node: NodeId,
    x: &DMatrix<f64>,
    y: &[f64],
    controls: &[DMatrix<f64>],
    dump_dir: Option<&Path>,
) -> Result<FactorAnalysis> {
    let graph = evaluator.graph();
    if node >= graph.len() {
        return Err(NpfgaError::config(format!("unknown node {node}")));
    }
    if controls.is_empty() {
        return Err(NpfgaError::config("factor analysis needs at least one randomized control"));
    }
    NpfgaError::check_len("target length", x.nrows(), y.len())?;

    let cov = normalized_covariance(&evaluator.evaluate_single(node, x)?, y);
    let null_base = sorted_abs_covs(evaluator, node, controls.len(), y, |i| Ok(controls[i].clone()))?;
    if let Some(dir) = dump_dir {
        write_null(&dir.join("out_null.txt"), &null_base)?;
    }

    let roots: Vec<NodeId> = graph.node(node).root_deps.iter().copied().collect();
    let mut factors = BTreeMap::new();
    for &root in &roots {
        let randomized: Vec<NodeId> = match mode {
            FactorMode::RandomizeThis => vec![root],
            FactorMode::RandomizeOther => roots.iter().copied().filter(|&r| r != root).collect(),
        };
        let null = sorted_abs_covs(evaluator, node, controls.len(), y, |i| {
            partial_control(graph, x, &controls[i], &randomized)
        })?;
        let tag = graph.node(root).expr.clone();
        if let Some(dir) = dump_dir {
            write_null(&dir.join(format!("out_{}_{}.txt", mode.short(), tag)), &null)?;
        }
        let rank = searchsorted_left(&null, cov.abs());
        let result = FactorResult {
            q_value: rank as f64 / null.len() as f64,
            min_cov: null[0],
            max_cov: null[null.len() - 1],
            null,
        };
        tracing::info!(
            "{:<50} c={:+.4} q{:<20} = {:+.4}  [random min={:.2} max={:.2}]",
            graph.node(node).expr,
            cov,
            format!("({tag})"),
            result.q_value,
            result.min_cov,
            result.max_cov
        );
        factors.insert(tag, result);
    }

    Ok(FactorAnalysis {
        mode,
        node,
        cov,
        null_base,
        factors,
    })
}
