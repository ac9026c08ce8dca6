// Covariance decomposition of composite features into root contributions
//
// A derived feature such as (a*b) may correlate with the target because of
// a, because of b, or only through their interaction. Partial randomization
// measures the covariance left when any subset of roots is replaced by noise;
// an inclusion-exclusion linear system turns those marginals into additive
// per-subset contributions.

mod factor;
mod filter;
mod solver;
mod tuples;
mod weights;

pub use factor::{run_factor_analysis, FactorAnalysis, FactorMode, FactorResult};
pub use filter::{
    assess_candidate, root_contributions, run_cov_decomposition_filter, select_candidate, CandidateReport,
    DecompositionFallback, FilterOutcome, RootContribution, ROOT_SIGMA,
};
pub use solver::{decompose_graph, decompose_node, partial_control, solve_decomposition, Decomposition};
pub use tuples::{coefficient_matrix, combinations, marginal_tuples, shares_root, Tuple};
pub use weights::{calculate_root_weights, RootWeights};
