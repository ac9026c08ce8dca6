//! Shared fixtures for integration tests
//!
//! A small column-expression evaluator standing in for a real feature graph.

#![allow(dead_code)]

use nalgebra::DMatrix;
use npfga::graph::{FeatureGraph, GraphEvaluator, NodeId};
use npfga::stats::normalized_covariance;
use npfga::{NpfgaError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct ColumnEvaluator {
    graph: FeatureGraph,
}

impl ColumnEvaluator {
    pub fn new(graph: FeatureGraph) -> Self {
        Self { graph }
    }

    /// Roots x0..x3 with squares, absolute values, products and sums
    pub fn four_roots() -> Self {
        let mut g = FeatureGraph::new();
        let r: Vec<NodeId> = (0..4).map(|i| g.add_root(&format!("x{i}"), "").unwrap()).collect();
        g.add_node("x0^2", "2", &[r[0]]).unwrap();
        g.add_node("|x3|", "|", &[r[3]]).unwrap();
        g.add_node("(x0*x1)", "*", &[r[0], r[1]]).unwrap();
        g.add_node("(x2*x3)", "*", &[r[2], r[3]]).unwrap();
        g.add_node("(x1+x2)", "+", &[r[1], r[2]]).unwrap();
        g.add_node("(x0-x3)", "-", &[r[0], r[3]]).unwrap();
        Self::new(g)
    }

    fn columns(&self, x: &DMatrix<f64>) -> Result<Vec<Vec<f64>>> {
        let mut cols: Vec<Vec<f64>> = Vec::with_capacity(self.graph.len());
        for node in self.graph.nodes() {
            let values: Vec<f64> = if node.is_root() {
                let j = self
                    .graph
                    .root_column(node.id)
                    .ok_or_else(|| NpfgaError::config("root without column"))?;
                x.column(j).iter().copied().collect()
            } else {
                let a = &cols[node.parents[0]];
                let b = node.parents.get(1).map(|&p| &cols[p]);
                match (node.op_tag.as_str(), b) {
                    ("2", None) => a.iter().map(|v| v * v).collect(),
                    ("|", None) => a.iter().map(|v| v.abs()).collect(),
                    ("*", Some(b)) => a.iter().zip(b).map(|(u, v)| u * v).collect(),
                    ("+", Some(b)) => a.iter().zip(b).map(|(u, v)| u + v).collect(),
                    ("-", Some(b)) => a.iter().zip(b).map(|(u, v)| u - v).collect(),
                    (op, _) => return Err(NpfgaError::config(format!("unsupported op '{op}'"))),
                }
            };
            cols.push(values);
        }
        Ok(cols)
    }
}

impl GraphEvaluator for ColumnEvaluator {
    fn graph(&self) -> &FeatureGraph {
        &self.graph
    }

    fn evaluate_and_correlate(&self, x: &DMatrix<f64>, y: &[f64]) -> Result<Vec<f64>> {
        Ok(self.columns(x)?.iter().map(|c| normalized_covariance(c, y)).collect())
    }

    fn evaluate_single(&self, node: NodeId, x: &DMatrix<f64>) -> Result<Vec<f64>> {
        self.columns(x)?
            .into_iter()
            .nth(node)
            .ok_or_else(|| NpfgaError::config(format!("unknown node {node}")))
    }

    fn apply(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let cols = self.columns(x)?;
        Ok(DMatrix::from_fn(x.nrows(), cols.len(), |i, j| cols[j][i]))
    }
}

/// Approximately standard normal draws
pub fn gaussian(rng: &mut StdRng) -> f64 {
    (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0
}

/// `n x 4` roots with target `x2 * x3 + 0.3 noise`
pub fn interaction_data(n: usize, seed: u64) -> (DMatrix<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = DMatrix::from_fn(n, 4, |_, _| gaussian(&mut rng));
    let y = (0..n).map(|i| x[(i, 2)] * x[(i, 3)] + 0.3 * gaussian(&mut rng)).collect();
    (x, y)
}
