//! Feature graph arena and per-node analysis results
//!
//! The generator that builds expression graphs lives outside this crate. What
//! the analysis needs is the *shape* of that graph: which node derives from
//! which parents through which operator, and which root variables each node
//! ultimately depends on. Nodes are stored in an arena and addressed by
//! [`NodeId`]; a node shared by several descendants is simply referenced by
//! index from each of them.
//!
//! Statistics computed during a pass (covariance, confidence, complexity,
//! rank) are kept in a separate [`StatsMap`] so repeated passes never touch
//! the topology.
//!
//! # Example
//!
//! ```
//! use npfga::graph::FeatureGraph;
//!
//! # fn main() -> npfga::Result<()> {
//! let mut graph = FeatureGraph::new();
//! let a = graph.add_root("a", "m")?;
//! let b = graph.add_root("b", "s")?;
//! let ratio = graph.add_node("(a:b)", ":", &[a, b])?;
//!
//! assert_eq!(graph.len(), 3);
//! assert_eq!(graph.node(ratio).generation, 1);
//! assert_eq!(graph.root_tags(ratio), vec!["a", "b"]);
//! # Ok(())
//! # }
//! ```

use crate::error::{NpfgaError, Result};
use crate::stats::{normalized_covariance, ranks};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

/// Stable index of a node within its [`FeatureGraph`]
pub type NodeId = usize;

/// Operator tag carried by root nodes
pub const ROOT_OP: &str = "I";

/// A single expression in the feature graph
#[derive(Debug, Clone)]
pub struct FeatureNode {
    pub id: NodeId,
    pub expr: String,
    /// 0 for roots, 1 + max parent generation otherwise
    pub generation: usize,
    pub op_tag: String,
    pub parents: Vec<NodeId>,
    /// Unit of a root variable; `None` for derived nodes
    pub unit: Option<String>,
    /// Root nodes this expression depends on (a root depends on itself)
    pub root_deps: BTreeSet<NodeId>,
}

impl FeatureNode {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Arena of feature nodes in generation order
///
/// Parents are always inserted before their children, so iterating the arena
/// front to back is a valid topological order.
#[derive(Debug, Clone, Default)]
pub struct FeatureGraph {
    nodes: Vec<FeatureNode>,
    by_expr: HashMap<String, NodeId>,
    roots: Vec<NodeId>,
}

impl FeatureGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a root variable; roots map to data-matrix columns in insertion order
    pub fn add_root(&mut self, expr: &str, unit: &str) -> Result<NodeId> {
        let id = self.insert(FeatureNode {
            id: self.nodes.len(),
            expr: expr.to_string(),
            generation: 0,
            op_tag: ROOT_OP.to_string(),
            parents: Vec::new(),
            unit: Some(unit.to_string()),
            root_deps: BTreeSet::new(),
        })?;
        self.nodes[id].root_deps.insert(id);
        self.roots.push(id);
        Ok(id)
    }

    /// Add a derived node computed from one (unary) or two (binary) parents
    pub fn add_node(&mut self, expr: &str, op_tag: &str, parents: &[NodeId]) -> Result<NodeId> {
        if parents.is_empty() || parents.len() > 2 {
            return Err(NpfgaError::config(format!(
                "node '{expr}' must have one or two parents, got {}",
                parents.len()
            )));
        }
        let mut generation = 0;
        let mut root_deps = BTreeSet::new();
        for &p in parents {
            let parent = self.nodes.get(p).ok_or_else(|| {
                NpfgaError::config(format!("node '{expr}' references unknown parent {p}"))
            })?;
            generation = generation.max(parent.generation + 1);
            root_deps.extend(parent.root_deps.iter().copied());
        }
        self.insert(FeatureNode {
            id: self.nodes.len(),
            expr: expr.to_string(),
            generation,
            op_tag: op_tag.to_string(),
            parents: parents.to_vec(),
            unit: None,
            root_deps,
        })
    }

    fn insert(&mut self, node: FeatureNode) -> Result<NodeId> {
        if self.by_expr.contains_key(&node.expr) {
            return Err(NpfgaError::config(format!(
                "duplicate expression '{}'",
                node.expr
            )));
        }
        let id = node.id;
        self.by_expr.insert(node.expr.clone(), id);
        self.nodes.push(node);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &FeatureNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FeatureNode> {
        self.nodes.iter()
    }

    pub fn find(&self, expr: &str) -> Option<NodeId> {
        self.by_expr.get(expr).copied()
    }

    /// Root node ids in data-column order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Data-matrix column of a root node
    pub fn root_column(&self, root: NodeId) -> Option<usize> {
        self.roots.iter().position(|&r| r == root)
    }

    /// Root expressions a node depends on, in column order
    pub fn root_tags(&self, id: NodeId) -> Vec<&str> {
        self.nodes[id]
            .root_deps
            .iter()
            .map(|&r| self.nodes[r].expr.as_str())
            .collect()
    }

    /// Expressions of all nodes, in arena order
    pub fn tags(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.expr.clone()).collect()
    }

    /// Node ids grouped by generation
    pub fn generations(&self) -> BTreeMap<usize, Vec<NodeId>> {
        let mut map: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for node in &self.nodes {
            map.entry(node.generation).or_default().push(node.id);
        }
        map
    }

    /// Cumulative complexity per node: operator cost plus the parents' complexities
    pub fn complexities(&self, op_costs: &BTreeMap<String, f64>) -> Result<Vec<f64>> {
        let mut out: Vec<f64> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let cost = op_costs.get(&node.op_tag).ok_or_else(|| {
                NpfgaError::config(format!(
                    "no complexity cost for operator '{}' (node '{}')",
                    node.op_tag, node.expr
                ))
            })?;
            let inherited: f64 = node.parents.iter().map(|&p| out[p]).sum();
            out.push(cost + inherited);
        }
        Ok(out)
    }
}

/// Sorted distinct complexity values; each one closes a phase
pub fn phase_thresholds(complexities: &[f64]) -> Vec<f64> {
    let mut t = crate::stats::sorted(complexities);
    t.dedup();
    t
}

/// How node values are correlated with the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMeasure {
    /// Pearson moment of the z-scored values
    #[default]
    Moment,
    /// Spearman: the moment computed on fractional ranks
    Rank,
}

impl FromStr for CorrelationMeasure {
    type Err = NpfgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "moment" => Ok(CorrelationMeasure::Moment),
            "rank" => Ok(CorrelationMeasure::Rank),
            other => Err(NpfgaError::config(format!("unknown correlation measure '{other}'"))),
        }
    }
}

/// Capability of the external feature-graph evaluator
///
/// Rows of `x` are samples, columns are root variables in
/// [`FeatureGraph::roots`] order. Implementations must be shareable across
/// threads: randomized-control batches are evaluated as an independent map.
pub trait GraphEvaluator: Sync {
    fn graph(&self) -> &FeatureGraph;

    /// Evaluate every node on `x` and return its covariance with `y`, per node
    fn evaluate_and_correlate(&self, x: &DMatrix<f64>, y: &[f64]) -> Result<Vec<f64>>;

    /// Evaluate one node on `x`
    fn evaluate_single(&self, node: NodeId, x: &DMatrix<f64>) -> Result<Vec<f64>>;

    /// Evaluate every node on `x` (samples x nodes)
    fn apply(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>>;

    /// Per-node correlation with `y` under `measure`
    ///
    /// The moment measure is the evaluator's own covariance; ranks are taken
    /// over the applied node values.
    fn correlate(&self, x: &DMatrix<f64>, y: &[f64], measure: CorrelationMeasure) -> Result<Vec<f64>> {
        match measure {
            CorrelationMeasure::Moment => self.evaluate_and_correlate(x, y),
            CorrelationMeasure::Rank => {
                let values = self.apply(x)?;
                NpfgaError::check_len("target length", values.nrows(), y.len())?;
                let ry = ranks(y);
                Ok(values
                    .column_iter()
                    .map(|col| {
                        let v: Vec<f64> = col.iter().copied().collect();
                        normalized_covariance(&ranks(&v), &ry)
                    })
                    .collect())
            }
        }
    }
}

/// Analysis results attached to a node
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeStats {
    pub cov: f64,
    /// Empirical confidence (q value) of the node
    pub q: f64,
    pub complexity: f64,
    pub rank: f64,
}

/// Per-node results, keyed by arena index
pub type StatsMap = BTreeMap<NodeId, NodeStats>;

/// How [`rank_nodes`] turns key values into ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMode {
    /// rank = key
    Score,
    /// rank = cumulative share of the sorted keys times the key
    Cumulative,
    /// rank = position / (n - 1)
    Ordinal,
}

/// Default ranking key: |cov * q|
pub fn cov_confidence_key(stats: &NodeStats) -> f64 {
    (stats.cov * stats.q).abs()
}

/// Assign `rank` for every node present in `stats`
pub fn rank_nodes<F>(stats: &mut StatsMap, mode: RankMode, key: F)
where
    F: Fn(&NodeStats) -> f64,
{
    let ids: Vec<NodeId> = stats.keys().copied().collect();
    let keys: Vec<f64> = ids.iter().map(|id| key(&stats[id])).collect();
    let order = crate::stats::argsort_asc(&keys);
    let mut cumulative = Vec::with_capacity(order.len());
    let mut acc = 0.0;
    for &i in &order {
        acc += keys[i];
        cumulative.push(acc);
    }
    let total = cumulative.last().copied().unwrap_or(0.0);
    let n = order.len();
    for (pos, &i) in order.iter().enumerate() {
        let rank = match mode {
            RankMode::Ordinal if n > 1 => pos as f64 / (n - 1) as f64,
            RankMode::Ordinal => 0.0,
            RankMode::Cumulative if total > 0.0 => cumulative[pos] / total * keys[i],
            RankMode::Cumulative => 0.0,
            RankMode::Score => keys[i],
        };
        if let Some(entry) = stats.get_mut(&ids[i]) {
            entry.rank = rank;
        }
    }
}
