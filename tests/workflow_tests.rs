//! End-to-end analysis workflows through the public API
//!
//! Target driven by the interaction x2*x3 over four roots:
//! - the significance run ranks (x2*x3) first
//! - the decomposition filter keeps it and attributes it to (x2, x3)
//! - a cross-validated ensemble on the selected feature predicts well

mod common;

use common::{interaction_data, ColumnEvaluator};
use nalgebra::DMatrix;
use npfga::config::AnalysisConfig;
use npfga::cv::{cv_iter, CvEval, CvMode, CvOptions, Metric};
use npfga::decomposition::{
    calculate_root_weights, decompose_graph, run_cov_decomposition_filter, DecompositionFallback,
};
use npfga::ensemble::{BootstrapEnsemble, ModelKind, ResampleMethod};
use npfga::graph::GraphEvaluator;
use npfga::resample::RandomizeMatrix;
use npfga::significance::{run_npfga, run_npfga_with_phasing};
use npfga::stats::argsort_desc;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn setup(n: usize, n_controls: usize, seed: u64) -> (ColumnEvaluator, DMatrix<f64>, Vec<f64>, Vec<DMatrix<f64>>) {
    let eval = ColumnEvaluator::four_roots();
    let (x, y) = interaction_data(n, seed);
    let mut rng = StdRng::seed_from_u64(seed + 1);
    let controls = RandomizeMatrix::PermWithinCols.sample(&x, n_controls, &mut rng);
    (eval, x, y, controls)
}

#[test]
fn test_significance_ranks_interaction_first() {
    let (eval, x, y, controls) = setup(150, 100, 1);
    let config = AnalysisConfig {
        tail_fraction: 0.05,
        bootstrap: 5,
        seed: Some(3),
        ..AnalysisConfig::default()
    };
    let mut rng = config.rng();
    let run = run_npfga(&eval, &x, &y, &controls, &y, &config, &mut rng).unwrap();

    assert_eq!(run.xstats.top.tag, "(x2*x3)");
    assert_eq!(run.cstats.top.tag, "(x2*x3)");
    let prod = eval.graph().find("(x2*x3)").unwrap();
    assert!(run.xq.mean[prod] > 0.95);
    assert_eq!(run.covs.std.len(), eval.graph().len());

    let best = run
        .stats
        .iter()
        .max_by(|a, b| a.1.rank.total_cmp(&b.1.rank))
        .map(|(id, _)| *id)
        .unwrap();
    assert_eq!(best, prod);
}

#[test]
fn test_phased_run_covers_graph() {
    let (eval, x, y, controls) = setup(120, 60, 4);
    let config = AnalysisConfig {
        tail_fraction: 0.05,
        ..AnalysisConfig::default()
    };
    let run = run_npfga_with_phasing(&eval, &x, &y, &controls, &y, &config).unwrap();

    // complexities: roots 0, x0^2 0.75, |x3| 1.25, products 1.75, sums 2.25
    let sizes: Vec<usize> = run.phase_nodes().iter().map(|p| p.len()).collect();
    assert_eq!(sizes, vec![4, 5, 6, 8, 10]);
    assert_eq!(run.offset_cov.len(), 5);
    // signal appears once the products enter
    assert!(run.offset_cov[3] > run.offset_cov[0]);
}

#[test]
fn test_decomposition_selects_interaction() {
    let (eval, x, y, controls) = setup(300, 30, 7);
    let g = eval.graph();
    let covs = eval.evaluate_and_correlate(&x, &y).unwrap();
    let abs: Vec<f64> = covs.iter().map(|c| c.abs()).collect();
    let order: Vec<usize> = argsort_desc(&abs).into_iter().filter(|&i| !g.node(i).is_root()).take(3).collect();
    assert_eq!(order[0], g.find("(x2*x3)").unwrap());

    let mut rng = StdRng::seed_from_u64(8);
    let outcome = run_cov_decomposition_filter(
        &eval,
        &order,
        &x,
        &y,
        &controls,
        10,
        DecompositionFallback::Fail,
        &mut rng,
    )
    .unwrap();
    assert_eq!(outcome.selected, order[0]);
    let report = &outcome.candidates[0];
    let interaction = report
        .decomposition
        .tuples
        .iter()
        .position(|t| t.len() == 2)
        .unwrap();
    assert_eq!(report.decomposition.label(interaction), "x2:x3");
    assert!(report.decomposition.mean[(interaction, 0)] > 0.6);

    let d = decompose_graph(&eval, &x, &y, &controls, 0, &mut rng).unwrap();
    let q = vec![1.0; g.len()];
    let weights = calculate_root_weights(g, &q, &d).unwrap();
    let top_two: Vec<&str> = weights.sorted_tags.iter().rev().take(2).map(String::as_str).collect();
    assert!(top_two.contains(&"x2"));
    assert!(top_two.contains(&"x3"));
}

#[test]
fn test_cross_validated_ensemble_on_selected_feature() {
    let (eval, x, y, _) = setup(120, 1, 10);
    let prod = eval.graph().find("(x2*x3)").unwrap();
    let feature = eval.evaluate_single(prod, &x).unwrap();
    let f = DMatrix::from_column_slice(feature.len(), 1, &feature);

    let options = CvOptions {
        mode: CvMode::MonteCarlo,
        n_mccv: 5,
        f_mccv: 0.8,
        ..CvOptions::default()
    };
    let mut rng = StdRng::seed_from_u64(11);
    let splits = cv_iter(y.len(), &options, &mut rng).unwrap();
    assert_eq!(splits.n_reps(), 5);

    let mut eval_state = CvEval::new();
    for split in splits {
        let split = split.unwrap();
        let y_train: Vec<f64> = split.train.iter().map(|&i| y[i]).collect();
        let y_test: Vec<f64> = split.test.iter().map(|&i| y[i]).collect();
        let mut ens = BootstrapEnsemble::new(ResampleMethod::Samples, 10, ModelKind::Lse);
        ens.fit(&f.select_rows(&split.train), &y_train, None, &mut rng).unwrap();
        let (train_pred, _) = ens.predict(&f.select_rows(&split.train)).unwrap();
        let (test_pred, _) = ens.predict(&f.select_rows(&split.test)).unwrap();
        eval_state.append("train", &train_pred, &y_train).unwrap();
        eval_state.append("test", &test_pred, &y_test).unwrap();
    }

    assert_eq!(eval_state.yp_map["test"].len(), 5 * 24);
    let (rho, _) = eval_state.evaluate("test", Metric::Rhop, 0, &mut rng).unwrap();
    assert!(rho > 0.9, "test correlation {rho}");
    let (rmse, rmse_std) = eval_state.evaluate("test", Metric::Rmse, 20, &mut rng).unwrap();
    assert!(rmse < 0.5);
    assert!(rmse_std > 0.0);

    let null = eval_state.evaluate_null("test", Metric::Rhop, 100, &mut rng).unwrap();
    assert!(null[null.len() - 1] < rho);
}
