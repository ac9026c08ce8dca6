use anyhow::{Context, Result};
use clap::Parser;
use npfga::cli::{Cli, Command, OutputFormat};
use npfga::config::AnalysisConfig;
use npfga::cv::{cv_iter, CvEval, CvSplit, Metric};
use npfga::dump::{read_matrix, read_vector};
use npfga::significance::calculate_null_and_test;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(p) => AnalysisConfig::from_toml_file(p)
            .with_context(|| format!("Failed to load configuration from {}", p.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

fn read_tags(path: Option<&Path>, n_channels: usize) -> Result<Vec<String>> {
    let Some(p) = path else {
        return Ok((0..n_channels).map(|c| format!("c{c}")).collect());
    };
    let text = std::fs::read_to_string(p).with_context(|| format!("Failed to read tags from {}", p.display()))?;
    let tags: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if tags.len() != n_channels {
        anyhow::bail!("{} tags for {} channels in {}", tags.len(), n_channels, p.display());
    }
    Ok(tags)
}

fn null_test(
    config: AnalysisConfig,
    null: &Path,
    observed: &Path,
    tags: Option<&Path>,
    dump_dir: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let null_covs = read_matrix(null).with_context(|| format!("Failed to read null table {}", null.display()))?;
    let covs = read_vector(observed).with_context(|| format!("Failed to read observed covariances {}", observed.display()))?;
    let tags = read_tags(tags, covs.len())?;

    let test = calculate_null_and_test(&covs, &null_covs, &config)?;
    let (cstats, xstats) = test.channel_stats(&tags, &covs)?;

    if let Some(dir) = dump_dir.or(config.dump_dir.clone()) {
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        test.null.write_diagnostics(&dir)?;
        test.exs_test
            .write_observed(&test.exs, &test.null.cum_channels, &dir.join("out_exs_phys.txt"))?;
        xstats.tabulate_exceedance(&dir.join("out_exs_rank.txt"))?;
    }

    match format {
        OutputFormat::Text => {
            println!("# |cov| rank test");
            print!("{}", cstats.summarize());
            println!("# exceedance rank test");
            print!("{}", xstats.summarize());
        }
        OutputFormat::Json => {
            let channels: Vec<serde_json::Value> = tags
                .iter()
                .enumerate()
                .map(|(c, tag)| {
                    serde_json::json!({
                        "tag": tag,
                        "cov": covs[c],
                        "exceedance": test.exs[c],
                        "cov_q_first": test.cov_test.q_first[c],
                        "cov_q_rank": test.cov_test.q_rank[c],
                        "exs_q_first": test.exs_test.q_first[c],
                        "exs_q_rank": test.exs_test.q_rank[c],
                    })
                })
                .collect();
            let report = serde_json::json!({
                "tail_fraction": config.tail_fraction,
                "n_samples": test.null.n_samples,
                "channels": channels,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn cv_eval(config: AnalysisConfig, input: &Path, metrics: &[String], bootstrap: usize, format: OutputFormat) -> Result<()> {
    let eval = CvEval::load(input).with_context(|| format!("Failed to load evaluation state {}", input.display()))?;
    let metrics: Vec<Metric> = if metrics.is_empty() {
        vec![Metric::Rmse, Metric::Rhop]
    } else {
        metrics.iter().map(|m| m.parse()).collect::<npfga::Result<_>>()?
    };
    let mut rng = config.rng();
    let table = eval.evaluate_all(&metrics, bootstrap, &mut rng)?;

    match format {
        OutputFormat::Text => {
            for (channel, row) in &table {
                let cells: Vec<String> = metrics
                    .iter()
                    .map(|m| {
                        format!(
                            "{}={:+.4e} +- {:.4e}",
                            m,
                            row[m.name()],
                            row[&format!("{}_std", m.name())]
                        )
                    })
                    .collect();
                println!("{:<9} : {}", channel, cells.join("  "));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
    }
    Ok(())
}

fn cv_splits(config: AnalysisConfig, n_samples: usize, format: OutputFormat) -> Result<()> {
    let mut rng = config.rng();
    let splits = cv_iter(n_samples, &config.cv, &mut rng)?.collect::<npfga::Result<Vec<CvSplit>>>()?;

    match format {
        OutputFormat::Text => {
            for split in &splits {
                let test: Vec<String> = split.test.iter().map(ToString::to_string).collect();
                println!("{:<12} train={:<5} test=[{}]", split.info, split.train.len(), test.join(" "));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&splits)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let mut config = load_config(args.config.as_deref())?;

    match args.command {
        Command::NullTest {
            null,
            observed,
            tags,
            tail_fraction,
            dump_dir,
            format,
        } => {
            if let Some(f) = tail_fraction {
                config.tail_fraction = f;
                config.validate()?;
            }
            null_test(config, &null, &observed, tags.as_deref(), dump_dir, format)
        }
        Command::CvEval {
            input,
            metrics,
            bootstrap,
            format,
        } => cv_eval(config, &input, &metrics, bootstrap, format),
        Command::CvSplits { samples, format } => cv_splits(config, samples, format),
    }
}
