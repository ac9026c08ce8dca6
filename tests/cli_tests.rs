//! Integration tests for the npfga command line
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use npfga::cv::CvEval;
use predicates::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::Path;
use tempfile::TempDir;

/// 200 controls x 3 channels of small null covariances, observed channel c0 strong
fn write_null_inputs(dir: &Path) {
    let mut rng = StdRng::seed_from_u64(5);
    let mut null = String::from("# null covariances\n");
    for _ in 0..200 {
        let row: Vec<String> = (0..3).map(|_| format!("{:.6}", rng.gen_range(-0.2..0.2))).collect();
        writeln!(null, "{}", row.join(" ")).unwrap();
    }
    std::fs::write(dir.join("null.txt"), null).unwrap();
    std::fs::write(dir.join("observed.txt"), "0.9\n0.05\n-0.1\n").unwrap();
}

fn null_test_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("npfga");
    cmd.arg("null-test")
        .arg("--null")
        .arg(dir.join("null.txt"))
        .arg("--observed")
        .arg(dir.join("observed.txt"));
    cmd
}

#[test]
fn test_null_test_text_report() {
    let tmp = TempDir::new().unwrap();
    write_null_inputs(tmp.path());

    null_test_cmd(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("# |cov| rank test"))
        .stdout(predicate::str::contains("# exceedance rank test"))
        .stdout(predicate::str::contains("Top-ranked node: 'c0'"));
}

#[test]
fn test_null_test_with_tags() {
    let tmp = TempDir::new().unwrap();
    write_null_inputs(tmp.path());
    std::fs::write(tmp.path().join("tags.txt"), "(x2*x3)\nx0\n|x1|\n").unwrap();

    null_test_cmd(tmp.path())
        .arg("--tags")
        .arg(tmp.path().join("tags.txt"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Top-ranked node: '(x2*x3)'"));
}

#[test]
fn test_null_test_tag_count_mismatch() {
    let tmp = TempDir::new().unwrap();
    write_null_inputs(tmp.path());
    std::fs::write(tmp.path().join("tags.txt"), "only_one\n").unwrap();

    null_test_cmd(tmp.path())
        .arg("--tags")
        .arg(tmp.path().join("tags.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 tags for 3 channels"));
}

#[test]
fn test_null_test_json_output() {
    let tmp = TempDir::new().unwrap();
    write_null_inputs(tmp.path());

    let output = null_test_cmd(tmp.path())
        .arg("--format")
        .arg("json")
        .arg("--tail-fraction")
        .arg("0.05")
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["tail_fraction"], 0.05);
    assert_eq!(parsed["n_samples"], 200);
    let channels = parsed["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 3);
    assert_eq!(channels[0]["tag"], "c0");
    let q0 = channels[0]["cov_q_first"].as_f64().unwrap();
    let q1 = channels[1]["cov_q_first"].as_f64().unwrap();
    assert!(q0 > q1);
}

#[test]
fn test_null_test_rejects_bad_tail_fraction() {
    let tmp = TempDir::new().unwrap();
    write_null_inputs(tmp.path());

    null_test_cmd(tmp.path())
        .arg("--tail-fraction")
        .arg("1.5")
        .assert()
        .failure()
        .stderr(predicate::str::contains("tail_fraction"));
}

#[test]
fn test_null_test_writes_dumps() {
    let tmp = TempDir::new().unwrap();
    write_null_inputs(tmp.path());
    let dump = tmp.path().join("dump");

    null_test_cmd(tmp.path()).arg("--dump-dir").arg(&dump).assert().success();

    for name in [
        "out_sis_channel_cov.hist",
        "out_exs_rank_rand.txt",
        "out_exs_rand.txt",
        "out_exs_phys.txt",
        "out_exs_rank.txt",
    ] {
        assert!(dump.join(name).exists(), "missing {name}");
    }
}

#[test]
fn test_null_test_dump_dir_from_config() {
    let tmp = TempDir::new().unwrap();
    write_null_inputs(tmp.path());
    let dump = tmp.path().join("from_config");
    let config = tmp.path().join("npfga.toml");
    std::fs::write(&config, format!("tail_fraction = 0.05\ndump_dir = {:?}\n", dump.display().to_string())).unwrap();

    null_test_cmd(tmp.path()).arg("--config").arg(&config).assert().success();
    assert!(dump.join("out_exs_rank.txt").exists());
}

#[test]
fn test_null_test_missing_input() {
    let tmp = TempDir::new().unwrap();

    null_test_cmd(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read null table"));
}

fn write_cv_state(path: &Path) {
    let mut eval = CvEval::new();
    let yt: Vec<f64> = (0..20).map(|i| i as f64).collect();
    let yp: Vec<f64> = yt.iter().map(|v| v + 0.5).collect();
    eval.append("train", &yp, &yt).unwrap();
    eval.append("test", &yp[..10], &yt[..10]).unwrap();
    eval.save(path).unwrap();
}

#[test]
fn test_cv_eval_text_defaults() {
    let tmp = TempDir::new().unwrap();
    let state = tmp.path().join("eval.json");
    write_cv_state(&state);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("npfga");
    cmd.arg("cv-eval")
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains("train"))
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("rmse=+5.0000e-1"))
        .stdout(predicate::str::contains("rhop="));
}

#[test]
fn test_cv_eval_json_metrics() {
    let tmp = TempDir::new().unwrap();
    let state = tmp.path().join("eval.json");
    write_cv_state(&state);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("npfga");
    let output = cmd
        .arg("cv-eval")
        .arg(&state)
        .arg("--metrics")
        .arg("mae,mse")
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let test = &parsed["test"];
    assert!((test["mae"].as_f64().unwrap() - 0.5).abs() < 1e-12);
    assert!((test["mse"].as_f64().unwrap() - 0.25).abs() < 1e-12);
    assert_eq!(test["mae_std"], 0.0);
    assert!(test.get("rmse").is_none());
}

#[test]
fn test_cv_eval_unknown_metric() {
    let tmp = TempDir::new().unwrap();
    let state = tmp.path().join("eval.json");
    write_cv_state(&state);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("npfga");
    cmd.arg("cv-eval")
        .arg(&state)
        .arg("--metrics")
        .arg("r2")
        .assert()
        .failure()
        .stderr(predicate::str::contains("r2"));
}

#[test]
fn test_cv_splits_default_is_single_full_split() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("npfga");
    let output = cmd.arg("cv-splits").arg("--samples").arg("5").arg("--format").arg("json").output().unwrap();
    assert!(output.status.success());

    let splits: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let splits = splits.as_array().unwrap();
    assert_eq!(splits.len(), 1);
    assert_eq!(splits[0]["info"], "cv_no_i000");
    assert_eq!(splits[0]["train"].as_array().unwrap().len(), 5);
}

#[test]
fn test_cv_splits_follow_configured_mode() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("cv.toml");
    std::fs::write(&config, "[cv]\nmode = \"loo\"\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("npfga");
    let output = cmd
        .arg("cv-splits")
        .arg("--samples")
        .arg("4")
        .arg("--format")
        .arg("json")
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());

    let splits: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let splits = splits.as_array().unwrap();
    assert_eq!(splits.len(), 4);
    for (i, split) in splits.iter().enumerate() {
        assert_eq!(split["info"], format!("cv_loo_i{i:03}"));
        assert_eq!(split["test"], serde_json::json!([i]));
    }
}

#[test]
fn test_cv_splits_monte_carlo_text() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("cv.toml");
    std::fs::write(&config, "seed = 4\n\n[cv]\nmode = \"mc\"\nn_mccv = 3\nf_mccv = 0.75\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("npfga");
    cmd.arg("cv-splits")
        .arg("--samples")
        .arg("8")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("cv_mc_i002"))
        .stdout(predicate::str::contains("train=6"))
        .stdout(predicate::str::contains("cv_mc_i003").not());
}
