// Significance of generated features under multiple comparisons
//
// When thousands of derived features are correlated against one target, the
// best of them looks impressive even on pure noise. This module answers "how
// impressive would the best (or the r-th best) look by chance?" by building a
// null model from randomized controls.
//
// Approach:
// - Peaks over threshold: each channel's null tail is summarized by its
//   harmonic mean (the pivot); observed covariances become exceedances
//   relative to that pivot
// - Rank pooling: null statistics are sorted within each control, so the
//   observed r-th best channel is compared with the r-th best of every control
// - Phasing: the same test repeated on nested subsets of increasing
//   feature complexity

mod exceedance;
mod null_distribution;
mod phasing;
mod pipeline;
mod summary;

pub use exceedance::{calculate_exceedance, harmonic_pivot, TailScaling, HARMONIC_EPSILON};
pub use null_distribution::{calculate_null_distribution, rank_pooled, NullDistribution, MIN_THRESHOLD};
pub use phasing::{phase_offsets, run_npfga_with_phasing, Phase, PhaseIter, PhasedRun};
pub use pipeline::{apply_batch, calculate_null_and_test, run_npfga, Averaged, NpfgaRun, NullTest};
pub use rank_test::{rank_ptest, RankTestResult};
pub use summary::{decile_percentiles, ChannelStats, CovExceedanceTable, TopNode};
