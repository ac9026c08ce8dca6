//! CLI argument parsing for npfga

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable report (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "npfga")]
#[command(version)]
#[command(about = "Significance testing and covariance decomposition for generated features", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Analysis configuration (TOML); defaults apply to missing keys
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rank-test observed channel covariances against a randomized-control null
    NullTest {
        /// Null covariance table: one row per control, one column per channel
        #[arg(long = "null", value_name = "FILE")]
        null: PathBuf,

        /// Observed covariances, one per channel
        #[arg(long = "observed", value_name = "FILE")]
        observed: PathBuf,

        /// Channel names, one per line (default: c0, c1, ...)
        #[arg(long = "tags", value_name = "FILE")]
        tags: Option<PathBuf>,

        /// Override the configured tail fraction
        #[arg(long = "tail-fraction", value_name = "F")]
        tail_fraction: Option<f64>,

        /// Write diagnostic tables into this directory
        #[arg(long = "dump-dir", value_name = "DIR")]
        dump_dir: Option<PathBuf>,

        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Score accumulated cross-validation predictions
    CvEval {
        /// Evaluation state written by a cross-validation run
        #[arg(value_name = "JSON")]
        input: PathBuf,

        /// Comma-separated metrics (mae, mse, rmse, rhop, rhor, auc); default rmse,rhop
        #[arg(long = "metrics", value_delimiter = ',')]
        metrics: Vec<String>,

        /// Bootstrap resamples for error bars (0 = none)
        #[arg(long = "bootstrap", default_value = "0")]
        bootstrap: usize,

        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List the train/test splits of the configured cross-validation mode
    CvSplits {
        /// Number of samples to split
        #[arg(long = "samples", value_name = "N")]
        samples: usize,

        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },
}
