// Marginal tuples and the inclusion-exclusion coefficient matrix

use crate::graph::NodeId;
use nalgebra::DMatrix;

/// Sorted subset of root nodes; the empty tuple is allowed
pub type Tuple = Vec<NodeId>;

/// All `k`-subsets of `items`, in lexicographic order of positions
pub fn combinations(items: &[NodeId], k: usize) -> Vec<Tuple> {
    let n = items.len();
    if k > n {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.iter().map(|&i| items[i]).collect());
        // advance the rightmost index that still has room
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if idx[i] != i + n - k {
                break;
            }
            if i == 0 {
                return out;
            }
        }
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// Subsets of `roots` of size 0 up to `max_size`, by increasing size
pub fn marginal_tuples(roots: &[NodeId], max_size: usize) -> Vec<Tuple> {
    let mut sorted_roots = roots.to_vec();
    sorted_roots.sort_unstable();
    sorted_roots.dedup();
    let mut tuples = Vec::new();
    for size in 0..=sorted_roots.len().min(max_size) {
        let batch = combinations(&sorted_roots, size);
        tracing::debug!(" - Degree {}: {} marginals", size, batch.len());
        tuples.extend(batch);
    }
    tuples
}

pub fn shares_root(a: &[NodeId], b: &[NodeId]) -> bool {
    a.iter().any(|r| b.contains(r))
}

/// `A[i, j] = 0` if tuples i and j share a root, else 1
pub fn coefficient_matrix(tuples: &[Tuple]) -> DMatrix<f64> {
    let n = tuples.len();
    DMatrix::from_fn(n, n, |i, j| {
        if shares_root(&tuples[i], &tuples[j]) {
            0.0
        } else {
            1.0
        }
    })
}
