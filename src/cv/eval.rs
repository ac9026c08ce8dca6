// Accumulated cross-validation predictions, persisted as JSON

use crate::cv::metrics::Metric;
use crate::error::{NpfgaError, Result};
use crate::stats::{mean, sorted, std_dev};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// channel -> metric name (and `{metric}_std`) -> value
pub type EvaluationTable = BTreeMap<String, BTreeMap<String, f64>>;

/// Predicted and true values per channel, appended split by split
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CvEval {
    pub yp_map: BTreeMap<String, Vec<f64>>,
    pub yt_map: BTreeMap<String, Vec<f64>>,
}

impl CvEval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.yp_map.keys().map(String::as_str)
    }

    pub fn append(&mut self, channel: &str, yp: &[f64], yt: &[f64]) -> Result<()> {
        NpfgaError::check_len("cv predictions", yt.len(), yp.len())?;
        self.yp_map.entry(channel.to_string()).or_default().extend_from_slice(yp);
        self.yt_map.entry(channel.to_string()).or_default().extend_from_slice(yt);
        Ok(())
    }

    fn lists(&self, channel: &str) -> Result<(&[f64], &[f64])> {
        match (self.yp_map.get(channel), self.yt_map.get(channel)) {
            (Some(yp), Some(yt)) => {
                NpfgaError::check_len("cv predictions", yt.len(), yp.len())?;
                Ok((yp, yt))
            }
            _ => Err(NpfgaError::config(format!("unknown cv channel '{channel}'"))),
        }
    }

    /// Metric on `channel` as `(mean, std)`
    ///
    /// Without bootstrap the std is 0; with it, mean and population std are
    /// taken over `bootstrap` resamples drawn with replacement. An empty channel
    /// scores `(NaN, NaN)`.
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        channel: &str,
        metric: Metric,
        bootstrap: usize,
        rng: &mut R,
    ) -> Result<(f64, f64)> {
        let (yp, yt) = self.lists(channel)?;
        if yp.is_empty() {
            return Ok((f64::NAN, f64::NAN));
        }
        if bootstrap == 0 {
            return Ok((metric.score(yp, yt), 0.0));
        }
        let n = yp.len();
        let values: Vec<f64> = (0..bootstrap)
            .map(|_| {
                let idcs: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let p: Vec<f64> = idcs.iter().map(|&i| yp[i]).collect();
                let t: Vec<f64> = idcs.iter().map(|&i| yt[i]).collect();
                metric.score(&p, &t)
            })
            .collect();
        Ok((mean(&values), std_dev(&values)))
    }

    /// Sorted metric values over `n_samples` shuffles of the predictions
    pub fn evaluate_null<R: Rng + ?Sized>(
        &self,
        channel: &str,
        metric: Metric,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        let (yp, yt) = self.lists(channel)?;
        if yp.is_empty() {
            return Ok(Vec::new());
        }
        let mut shuffled = yp.to_vec();
        let values: Vec<f64> = (0..n_samples)
            .map(|_| {
                shuffled.shuffle(rng);
                metric.score(&shuffled, yt)
            })
            .collect();
        Ok(sorted(&values))
    }

    /// Every metric on every channel, with `{metric}_std` entries alongside
    pub fn evaluate_all<R: Rng + ?Sized>(
        &self,
        metrics: &[Metric],
        bootstrap: usize,
        rng: &mut R,
    ) -> Result<EvaluationTable> {
        let mut table = EvaluationTable::new();
        for channel in self.yp_map.keys() {
            let row = table.entry(channel.clone()).or_default();
            let mut line = format!("{channel:<9} :");
            for &metric in metrics {
                let (v, dv) = self.evaluate(channel, metric, bootstrap, rng)?;
                row.insert(metric.name().to_string(), v);
                row.insert(format!("{}_std", metric.name()), dv);
                line.push_str(&format!(" {metric}={v:+.4e} +- {dv:+.4e}"));
            }
            tracing::info!("{}", line);
        }
        Ok(table)
    }
}
