// Cross-validation split strategies and evaluation bookkeeping
//
// Every strategy is a finite sequence of (info, train, test) splits behind
// one trait, so the fitting loop does not care how splits are produced.
// Asking for a split after the sequence is exhausted is an error, never a
// silent wrap-around.

mod eval;
mod metrics;

pub use eval::{CvEval, EvaluationTable};
pub use metrics::Metric;

use crate::error::{NpfgaError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One train/test partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CvSplit {
    /// `"{tag}_i{step:03}"`
    pub info: String,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Finite sequence of train/test splits
pub trait CvStrategy: Send {
    /// Short identifier used in split labels
    fn tag(&self) -> &'static str;

    fn is_done(&self) -> bool;

    /// Produce the next split; fails once `is_done()` is true
    fn next_split(&mut self) -> Result<CvSplit>;

    /// Total number of splits
    fn n_reps(&self) -> usize;
}

fn info(tag: &str, step: usize) -> String {
    format!("{tag}_i{step:03}")
}

/// Train/test from a boolean test mask
fn from_mask(test_mask: &[bool]) -> (Vec<usize>, Vec<usize>) {
    (0..test_mask.len()).partition(|&i| !test_mask[i])
}

fn test_mask(n_samples: usize, test: &[usize]) -> Result<Vec<bool>> {
    let mut mask = vec![false; n_samples];
    for &i in test {
        let slot = mask.get_mut(i).ok_or_else(|| {
            NpfgaError::config(format!("test index {i} out of range ({n_samples} samples)"))
        })?;
        *slot = true;
    }
    Ok(mask)
}

/// Leave-one-out: sample `step` is the test set
#[derive(Debug, Clone)]
pub struct Loo {
    n_samples: usize,
    step: usize,
}

impl Loo {
    pub fn new(n_samples: usize) -> Self {
        Self { n_samples, step: 0 }
    }
}

impl CvStrategy for Loo {
    fn tag(&self) -> &'static str {
        "cv_loo"
    }

    fn is_done(&self) -> bool {
        self.step >= self.n_samples
    }

    fn next_split(&mut self) -> Result<CvSplit> {
        if self.is_done() {
            return Err(NpfgaError::CvExhausted(self.tag()));
        }
        let s = self.step;
        self.step += 1;
        Ok(CvSplit {
            info: info(self.tag(), s),
            train: (0..self.n_samples).filter(|&i| i != s).collect(),
            test: vec![s],
        })
    }

    fn n_reps(&self) -> usize {
        self.n_samples
    }
}

/// Monte-Carlo: a fresh random split per step, `f_mccv` of the data for training
#[derive(Debug, Clone)]
pub struct MonteCarlo {
    n_samples: usize,
    n_reps: usize,
    f_mccv: f64,
    step: usize,
    rng: StdRng,
}

impl MonteCarlo {
    pub fn new(n_samples: usize, n_reps: usize, f_mccv: f64, rng: StdRng) -> Self {
        Self {
            n_samples,
            n_reps,
            f_mccv,
            step: 0,
            rng,
        }
    }
}

impl CvStrategy for MonteCarlo {
    fn tag(&self) -> &'static str {
        "cv_mc"
    }

    fn is_done(&self) -> bool {
        self.step >= self.n_reps
    }

    fn next_split(&mut self) -> Result<CvSplit> {
        if self.is_done() {
            return Err(NpfgaError::CvExhausted(self.tag()));
        }
        let mut idcs: Vec<usize> = (0..self.n_samples).collect();
        idcs.shuffle(&mut self.rng);
        let split_at = ((self.f_mccv * self.n_samples as f64) as usize).min(self.n_samples);
        let test = idcs.split_off(split_at);
        let s = self.step;
        self.step += 1;
        Ok(CvSplit {
            info: info(self.tag(), s),
            train: idcs,
            test,
        })
    }

    fn n_reps(&self) -> usize {
        self.n_reps
    }
}

/// Single split with user-pinned test indices
#[derive(Debug, Clone)]
pub struct User {
    mask: Vec<bool>,
    step: usize,
}

impl User {
    pub fn new(n_samples: usize, test_on: &[usize]) -> Result<Self> {
        Ok(Self {
            mask: test_mask(n_samples, test_on)?,
            step: 0,
        })
    }
}

impl CvStrategy for User {
    fn tag(&self) -> &'static str {
        "cv_user"
    }

    fn is_done(&self) -> bool {
        self.step >= 1
    }

    fn next_split(&mut self) -> Result<CvSplit> {
        if self.is_done() {
            return Err(NpfgaError::CvExhausted(self.tag()));
        }
        let (train, test) = from_mask(&self.mask);
        self.step += 1;
        Ok(CvSplit {
            info: info(self.tag(), 0),
            train,
            test,
        })
    }

    fn n_reps(&self) -> usize {
        1
    }
}

/// Externally supplied test sets, one split each
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomSplit {
    pub idcs_test: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Custom {
    masks: Vec<Vec<bool>>,
    step: usize,
}

impl Custom {
    pub fn new(n_samples: usize, splits: &[CustomSplit]) -> Result<Self> {
        let masks = splits
            .iter()
            .map(|s| test_mask(n_samples, &s.idcs_test))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { masks, step: 0 })
    }

    /// Load `[{"idcs_test": [...]}, ...]`
    pub fn from_json_file(n_samples: usize, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let splits: Vec<CustomSplit> = serde_json::from_str(&text)?;
        tracing::info!("Loaded {} custom splits from {}", splits.len(), path.display());
        Self::new(n_samples, &splits)
    }
}

impl CvStrategy for Custom {
    fn tag(&self) -> &'static str {
        "cv_custom"
    }

    fn is_done(&self) -> bool {
        self.step >= self.masks.len()
    }

    fn next_split(&mut self) -> Result<CvSplit> {
        if self.is_done() {
            return Err(NpfgaError::CvExhausted(self.tag()));
        }
        let (train, test) = from_mask(&self.masks[self.step]);
        let s = self.step;
        self.step += 1;
        Ok(CvSplit {
            info: info(self.tag(), s),
            train,
            test,
        })
    }

    fn n_reps(&self) -> usize {
        self.masks.len()
    }
}

/// Pass-through: everything is training data
#[derive(Debug, Clone)]
pub struct NoSplit {
    n_samples: usize,
    step: usize,
}

impl NoSplit {
    pub fn new(n_samples: usize) -> Self {
        Self { n_samples, step: 0 }
    }
}

impl CvStrategy for NoSplit {
    fn tag(&self) -> &'static str {
        "cv_no"
    }

    fn is_done(&self) -> bool {
        self.step >= 1
    }

    fn next_split(&mut self) -> Result<CvSplit> {
        if self.is_done() {
            return Err(NpfgaError::CvExhausted(self.tag()));
        }
        self.step += 1;
        Ok(CvSplit {
            info: info(self.tag(), 0),
            train: (0..self.n_samples).collect(),
            test: Vec::new(),
        })
    }

    fn n_reps(&self) -> usize {
        1
    }
}

/// Selects a strategy in configuration files and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CvMode {
    #[serde(rename = "loo")]
    Loo,
    #[serde(rename = "mc")]
    MonteCarlo,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "none")]
    #[default]
    NoSplit,
    #[serde(rename = "custom")]
    Custom,
}

impl FromStr for CvMode {
    type Err = NpfgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "loo" => Ok(CvMode::Loo),
            "mc" => Ok(CvMode::MonteCarlo),
            "user" => Ok(CvMode::User),
            "none" => Ok(CvMode::NoSplit),
            "custom" => Ok(CvMode::Custom),
            other => Err(NpfgaError::config(format!("unknown cv mode '{other}'"))),
        }
    }
}

/// Cross-validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvOptions {
    pub mode: CvMode,
    /// Number of Monte-Carlo repetitions
    pub n_mccv: usize,
    /// Monte-Carlo training fraction
    pub f_mccv: f64,
    /// Test indices for `user` mode
    pub test_on: Vec<usize>,
    /// Split file for `custom` mode
    pub splits_json: Option<PathBuf>,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self {
            mode: CvMode::NoSplit,
            n_mccv: 10,
            f_mccv: 0.9,
            test_on: Vec::new(),
            splits_json: None,
        }
    }
}

impl CvOptions {
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            CvMode::MonteCarlo => {
                if self.n_mccv == 0 {
                    return Err(NpfgaError::config("n_mccv must be positive for mc cross-validation"));
                }
                if !(self.f_mccv > 0.0 && self.f_mccv <= 1.0) {
                    return Err(NpfgaError::config(format!(
                        "f_mccv must be in (0, 1], got {}",
                        self.f_mccv
                    )));
                }
            }
            CvMode::Custom if self.splits_json.is_none() => {
                return Err(NpfgaError::config("custom cross-validation needs splits_json"));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Boxed strategy with an `Iterator` face
///
/// Yields `Err` when the strategy fails before reporting itself done.
pub struct CvIter {
    inner: Box<dyn CvStrategy>,
}

impl CvIter {
    pub fn new(inner: Box<dyn CvStrategy>) -> Self {
        Self { inner }
    }

    pub fn tag(&self) -> &'static str {
        self.inner.tag()
    }

    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    pub fn n_reps(&self) -> usize {
        self.inner.n_reps()
    }

    pub fn next_split(&mut self) -> Result<CvSplit> {
        self.inner.next_split()
    }
}

impl Iterator for CvIter {
    type Item = Result<CvSplit>;

    fn next(&mut self) -> Option<Result<CvSplit>> {
        if self.inner.is_done() {
            None
        } else {
            Some(self.inner.next_split())
        }
    }
}

/// Build the strategy selected by `options` for `n_samples` samples
///
/// Monte-Carlo splits draw from their own generator, seeded once from `rng`.
pub fn cv_iter<R: Rng + ?Sized>(n_samples: usize, options: &CvOptions, rng: &mut R) -> Result<CvIter> {
    options.validate()?;
    let inner: Box<dyn CvStrategy> = match options.mode {
        CvMode::Loo => Box::new(Loo::new(n_samples)),
        CvMode::MonteCarlo => Box::new(MonteCarlo::new(
            n_samples,
            options.n_mccv,
            options.f_mccv,
            StdRng::seed_from_u64(rng.gen()),
        )),
        CvMode::User => Box::new(User::new(n_samples, &options.test_on)?),
        CvMode::NoSplit => Box::new(NoSplit::new(n_samples)),
        CvMode::Custom => {
            let path = options
                .splits_json
                .as_deref()
                .ok_or_else(|| NpfgaError::config("custom cross-validation needs splits_json"))?;
            Box::new(Custom::from_json_file(n_samples, path)?)
        }
    };
    tracing::debug!("Cross-validation '{}' with {} splits", inner.tag(), inner.n_reps());
    Ok(CvIter::new(inner))
}
