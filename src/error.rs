//! Error types shared by every analysis stage
//!
//! Configuration mistakes (unknown modes, out-of-range fractions) fail fast.
//! Numerical degeneracy is mostly clamped or retried at the call site and only
//! surfaces here when no sensible fallback exists.

use thiserror::Error;

/// Errors for significance, decomposition and modeling operations
#[derive(Error, Debug)]
pub enum NpfgaError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Dimension mismatch: {context} (expected {expected}, got {actual})")]
    Dimension {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Cross-validation iterator '{0}' is exhausted")]
    CvExhausted(&'static str),

    #[error("No candidate survived the covariance decomposition filter")]
    NoCandidate,

    #[error("Model failure: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, NpfgaError>;

impl NpfgaError {
    pub fn config(msg: impl Into<String>) -> Self {
        NpfgaError::Config(msg.into())
    }

    pub(crate) fn check_len(context: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(NpfgaError::Dimension {
                context,
                expected,
                actual,
            })
        }
    }
}
