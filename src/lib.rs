//! npfga - Significance testing and covariance decomposition for generated features
//!
//! This library provides the statistical machinery around a feature graph:
//! null models built from randomized controls, rank-pooled permutation tests,
//! complexity phasing, decomposition of a feature's covariance into root
//! contributions, cross-validation strategies, and bootstrap ensembles.

pub mod cli;
pub mod config;
pub mod cv;
pub mod decomposition;
pub mod dump;
pub mod ensemble;
pub mod error;
pub mod graph;
pub mod resample;
pub mod significance;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use error::{NpfgaError, Result};
