// In-crate evaluator over a handful of elementwise operators, for unit tests

use crate::error::{NpfgaError, Result};
use crate::graph::{FeatureGraph, GraphEvaluator, NodeId};
use crate::stats::normalized_covariance;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub(crate) struct ToyEvaluator {
    pub graph: FeatureGraph,
}

impl ToyEvaluator {
    /// Roots `a`, `b`, `c` plus `(a*b)`, `exp(a)` and `(b+c)`
    pub fn abc() -> Self {
        let mut g = FeatureGraph::new();
        let a = g.add_root("a", "").unwrap();
        let b = g.add_root("b", "").unwrap();
        let c = g.add_root("c", "").unwrap();
        g.add_node("(a*b)", "*", &[a, b]).unwrap();
        g.add_node("exp(a)", "e", &[a]).unwrap();
        g.add_node("(b+c)", "+", &[b, c]).unwrap();
        Self { graph: g }
    }

    fn values(&self, x: &DMatrix<f64>) -> Result<Vec<Vec<f64>>> {
        let mut out: Vec<Vec<f64>> = Vec::with_capacity(self.graph.len());
        for node in self.graph.nodes() {
            let col = if node.is_root() {
                let j = self.graph.root_column(node.id).unwrap_or(0);
                x.column(j).iter().copied().collect()
            } else {
                let p0 = &out[node.parents[0]];
                match (node.op_tag.as_str(), node.parents.get(1)) {
                    ("e", None) => p0.iter().map(|v| v.exp()).collect(),
                    ("2", None) => p0.iter().map(|v| v * v).collect(),
                    ("|", None) => p0.iter().map(|v| v.abs()).collect(),
                    ("*", Some(&p1)) => p0.iter().zip(&out[p1]).map(|(a, b)| a * b).collect(),
                    ("+", Some(&p1)) => p0.iter().zip(&out[p1]).map(|(a, b)| a + b).collect(),
                    ("-", Some(&p1)) => p0.iter().zip(&out[p1]).map(|(a, b)| a - b).collect(),
                    (op, _) => return Err(NpfgaError::config(format!("toy evaluator: unsupported op '{op}'"))),
                }
            };
            out.push(col);
        }
        Ok(out)
    }
}

impl GraphEvaluator for ToyEvaluator {
    fn graph(&self) -> &FeatureGraph {
        &self.graph
    }

    fn evaluate_and_correlate(&self, x: &DMatrix<f64>, y: &[f64]) -> Result<Vec<f64>> {
        Ok(self
            .values(x)?
            .iter()
            .map(|v| normalized_covariance(v, y))
            .collect())
    }

    fn evaluate_single(&self, node: NodeId, x: &DMatrix<f64>) -> Result<Vec<f64>> {
        self.values(x)?
            .into_iter()
            .nth(node)
            .ok_or_else(|| NpfgaError::config(format!("unknown node {node}")))
    }

    fn apply(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let cols = self.values(x)?;
        Ok(DMatrix::from_fn(x.nrows(), cols.len(), |i, j| cols[j][i]))
    }
}

/// Standard-normal-ish noise (sum of 12 uniforms minus 6)
pub(crate) fn noise(rng: &mut StdRng) -> f64 {
    (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0
}

/// `n x 3` data whose target is driven by `a * b`
pub(crate) fn product_data(n: usize, seed: u64) -> (DMatrix<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = DMatrix::from_fn(n, 3, |_, _| noise(&mut rng));
    let y = (0..n)
        .map(|i| x[(i, 0)] * x[(i, 1)] + 0.3 * noise(&mut rng))
        .collect();
    (x, y)
}
