//! Agro-ecological zone prediction run.
//! Samples the response raster, trains (or loads) the random forest, reports
//! cross-validation accuracy and feature importances, then imputes zones for
//! the current climate and every configured projection.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use aez_core::{run_scenarios, ImputeReport, PipelineConfig, RunCache, RunContext};
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "aez_predict", about = "Impute agro-ecological zones for current and projected climates")]
struct Args {
    /// JSON pipeline configuration; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input root holding training/ and <projection>/<period>/ rasters.
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// Parent directory of the out_aezs_* output directories.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Directory for cached samples, model and CV summary.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Raster rows processed per band.
    #[arg(long)]
    chunk_height: Option<usize>,

    /// Only impute the projection scenarios.
    #[arg(long)]
    skip_current: bool,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

// ── Run summary ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ScenarioSummary {
    scenario: String,
    output_dir: PathBuf,
    seconds: f64,
    report: ImputeReport,
}

#[derive(Serialize)]
struct RunSummary {
    samples: usize,
    training_rows: usize,
    cross_validation: String,
    feature_importances: Vec<(String, f64)>,
    scenarios: Vec<ScenarioSummary>,
}

const SUMMARY_FILE: &str = "aez_run_summary.json";

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &args.input_dir {
        config.input_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(h) = args.chunk_height {
        config.chunk_height = h;
    }
    if args.skip_current {
        config.include_current = false;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(&args)?;
    info!("Training rasters: {}", config.training_dir().display());

    let start = Instant::now();
    let ctx = RunContext::prepare(&config, RunCache::new(&config.cache_dir))
        .context("preparing samples, classifier and cross-validation")?;
    info!("Training ready in {:.1}s", start.elapsed().as_secs_f64());
    info!("{}", ctx.cv);

    let importances = ctx.importances(&config.explanatory_fields);
    info!("Feature importances:");
    for (name, pct) in &importances {
        info!("\t{:.1}% {}", pct, name);
    }

    let inputs = config.scenario_inputs();
    let options = config.impute_options();
    let mut scenarios = Vec::new();
    for scenario in config.scenarios() {
        let start = Instant::now();
        let runs = run_scenarios(
            &ctx.model,
            &inputs,
            std::slice::from_ref(&scenario),
            &config.output_dir,
            &options,
        )
        .with_context(|| format!("imputing scenario {}", scenario))?;
        let seconds = start.elapsed().as_secs_f64();
        info!("{} imputed in {:.1}s", scenario, seconds);
        scenarios.extend(runs.into_iter().map(|run| ScenarioSummary {
            scenario: run.scenario.label(),
            output_dir: run.output_dir,
            seconds,
            report: run.report,
        }));
    }

    let summary = RunSummary {
        samples: ctx.samples.len(),
        training_rows: ctx.training.len(),
        cross_validation: ctx.cv.clone(),
        feature_importances: importances,
        scenarios,
    };
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let summary_path = config.output_dir.join(SUMMARY_FILE);
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("writing {}", summary_path.display()))?;
    info!("Run summary written to {}", summary_path.display());
    Ok(())
}
