//! Persistence of cross-validation state across runs
//!
//! A run appends predictions split by split, saves them, and a later process
//! reloads and scores them.

use npfga::cv::{cv_iter, CvEval, CvMode, CvOptions, Metric};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

fn loo_state(n: usize) -> CvEval {
    let y: Vec<f64> = (0..n).map(|i| (i as f64 * 0.7).sin()).collect();
    let options = CvOptions {
        mode: CvMode::Loo,
        ..CvOptions::default()
    };
    let mut rng = StdRng::seed_from_u64(0);
    let mut eval = CvEval::new();
    for split in cv_iter(n, &options, &mut rng).unwrap() {
        let split = split.unwrap();
        let yt: Vec<f64> = split.test.iter().map(|&i| y[i]).collect();
        let yp: Vec<f64> = yt.iter().map(|v| 0.9 * v + 0.01).collect();
        eval.append("test", &yp, &yt).unwrap();
    }
    eval
}

#[test]
fn test_save_and_reload() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("eval.json");
    let eval = loo_state(12);
    eval.save(&path).unwrap();

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["yp_map"]["test"].as_array().unwrap().len(), 12);
    assert_eq!(raw["yt_map"]["test"].as_array().unwrap().len(), 12);

    let reloaded = CvEval::load(&path).unwrap();
    assert_eq!(reloaded, eval);
    assert_eq!(reloaded.channels().collect::<Vec<_>>(), vec!["test"]);
}

#[test]
fn test_reloaded_state_keeps_accumulating() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("eval.json");
    loo_state(8).save(&path).unwrap();

    let mut eval = CvEval::load(&path).unwrap();
    eval.append("test", &[1.0, 2.0], &[1.0, 2.0]).unwrap();
    eval.append("train", &[0.0], &[0.0]).unwrap();
    assert_eq!(eval.yp_map["test"].len(), 10);
    assert_eq!(eval.channels().collect::<Vec<_>>(), vec!["test", "train"]);

    let mut rng = StdRng::seed_from_u64(1);
    let (rho, std) = eval.evaluate("test", Metric::Rhop, 0, &mut rng).unwrap();
    assert!(rho > 0.99);
    assert_eq!(std, 0.0);
}

#[test]
fn test_load_rejects_malformed_json() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("eval.json");
    std::fs::write(&path, "{\"yp_map\": [1, 2]}").unwrap();
    assert!(CvEval::load(&path).is_err());
    assert!(CvEval::load(&tmp.path().join("missing.json")).is_err());
}
