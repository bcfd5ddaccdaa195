//! asrbench - ASR benchmark driver
//!
//! The `asrbench` command evaluates speech recognition models on the ESB
//! catalog and scores the results.
//!
//! ## Commands
//!
//! - `run`: Evaluate every model on every selected work item, then score it
//! - `datasets`: List the builtin benchmark catalog
//! - `score`: Score one model over an existing results directory

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use asrbench::telemetry::level_for;
use asrbench::{
    init_tracing, AggregationStatus, BenchConfig, BenchPipeline, BenchReport, BuiltinDataset,
    CompletenessPolicy, DispatchRequest, ModelId, ProcessEvalRunner, ProcessScoreRunner,
    ScoreRequest, ScoreRunner, TimeoutAction,
};

#[derive(Parser)]
#[command(name = "asrbench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "ASR benchmark driver for the ESB datasets", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate models on the benchmark and score each one
    Run(RunArgs),

    /// List the builtin benchmark datasets
    Datasets,

    /// Score one model over results that are already on disk
    Score {
        /// Model to score
        #[arg(short, long)]
        model: String,

        #[command(flatten)]
        paths: PathArgs,
    },
}

/// Where the config file, routines and results live.
#[derive(Args, Debug, Default)]
struct PathArgs {
    /// TOML config file
    #[arg(short, long, env = "ASRBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory of the evaluation routine
    #[arg(long, env = "ASRBENCH_EVAL_DIR")]
    eval_dir: Option<PathBuf>,

    /// Results directory (relative to the evaluation directory)
    #[arg(long, env = "ASRBENCH_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Scoring directory (relative to the evaluation directory)
    #[arg(long, env = "ASRBENCH_SCORING_DIR")]
    scoring_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    #[command(flatten)]
    paths: PathArgs,

    /// Model to benchmark (repeatable)
    #[arg(short, long = "model", env = "ASRBENCH_MODELS", value_delimiter = ',')]
    models: Vec<String>,

    /// Dataset repository the work items are read from
    #[arg(long, env = "ASRBENCH_DATASET_PATH")]
    dataset_path: Option<String>,

    /// Device index; -1 for CPU
    #[arg(long, env = "ASRBENCH_DEVICE", allow_negative_numbers = true)]
    device: Option<i64>,

    /// Evaluation batch size
    #[arg(long, env = "ASRBENCH_BATCH_SIZE", allow_negative_numbers = true)]
    batch_size: Option<i64>,

    /// Samples per work item; -1 evaluates everything
    #[arg(long, env = "ASRBENCH_MAX_EVAL_SAMPLES", allow_negative_numbers = true)]
    max_eval_samples: Option<i64>,

    /// Subset of builtin datasets, comma separated (see `asrbench datasets`)
    #[arg(long, value_delimiter = ',')]
    datasets: Vec<String>,

    /// Evaluation command prefix, e.g. "python run_eval.py"
    #[arg(long)]
    eval_command: Option<String>,

    /// Seconds before a dispatch counts as hung (0 disables)
    #[arg(long, env = "ASRBENCH_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// What to do with a hung dispatch
    #[arg(long, value_enum)]
    on_timeout: Option<OnTimeout>,

    /// Whether incomplete results may still be scored
    #[arg(long, value_enum)]
    completeness: Option<Completeness>,

    /// Write the JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the dispatch plan without running anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnTimeout {
    FailItem,
    AbortRun,
}

impl From<OnTimeout> for TimeoutAction {
    fn from(value: OnTimeout) -> Self {
        match value {
            OnTimeout::FailItem => TimeoutAction::FailItem,
            OnTimeout::AbortRun => TimeoutAction::AbortRun,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Completeness {
    BestEffort,
    FailFast,
}

impl From<Completeness> for CompletenessPolicy {
    fn from(value: Completeness) -> Self {
        match value {
            Completeness::BestEffort => CompletenessPolicy::BestEffort,
            Completeness::FailFast => CompletenessPolicy::FailFast,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json, level_for(cli.verbose));

    match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Datasets => cmd_datasets(),
        Commands::Score { model, paths } => cmd_score(&model, &paths).await,
    }
}

/// Config file (or defaults) with path flags applied.
fn load_config(paths: &PathArgs) -> Result<BenchConfig> {
    let mut config = match &paths.config {
        Some(path) => BenchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BenchConfig::default(),
    };

    if let Some(dir) = &paths.eval_dir {
        config.eval.working_dir = dir.clone();
    }
    if let Some(dir) = &paths.results_dir {
        config.results_dir = dir.clone();
    }
    if let Some(dir) = &paths.scoring_dir {
        config.score.working_dir = dir.clone();
    }
    Ok(config)
}

/// Command-line values take precedence over the config file.
fn apply_run_overrides(config: &mut BenchConfig, args: &RunArgs) {
    if !args.models.is_empty() {
        config.models = args.models.clone();
    }
    if !args.datasets.is_empty() {
        config.datasets = args.datasets.clone();
    }
    if let Some(dataset_path) = &args.dataset_path {
        config.dataset_path = dataset_path.clone();
    }
    if let Some(device) = args.device {
        config.device = device;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(max_eval_samples) = args.max_eval_samples {
        config.max_eval_samples = max_eval_samples;
    }
    if let Some(command) = &args.eval_command {
        config.eval.command = command.split_whitespace().map(str::to_string).collect();
    }
    if let Some(secs) = args.timeout_secs {
        config.policy.timeout_secs = Some(secs);
    }
    if let Some(action) = args.on_timeout {
        config.policy.on_timeout = action.into();
    }
    if let Some(completeness) = args.completeness {
        config.policy.completeness = completeness.into();
    }
}

fn score_runner(config: &BenchConfig) -> Result<ProcessScoreRunner> {
    Ok(
        ProcessScoreRunner::new(config.score.command.clone(), config.scoring_dir()?)
            .with_env(config.child_env()?),
    )
}

/// Run the benchmark
async fn cmd_run(args: &RunArgs) -> Result<()> {
    let mut config = load_config(&args.paths)?;
    apply_run_overrides(&mut config, args);

    let plan = config.plan().context("Invalid benchmark configuration")?;

    if args.dry_run {
        let params = plan.validate().context("Invalid benchmark configuration")?;
        let eval = ProcessEvalRunner::new(config.eval.command.clone());
        println!("Plan digest: {}", plan.digest());
        println!("Results dir: {}", plan.results_dir.display());
        println!();
        for model in &plan.models {
            for item in &plan.items {
                let request = DispatchRequest::new(model, item, &params);
                println!("  {}", eval.command_for(&request).join(" "));
            }
            let scoring = score_runner(&config)?.command_for(&ScoreRequest {
                model_id: model.clone(),
                results_dir: plan.results_dir.clone(),
            });
            println!("  (in {}) {}", config.scoring_dir()?.display(), scoring.join(" "));
        }
        return Ok(());
    }

    let env = config.child_env()?;
    let eval = ProcessEvalRunner::new(config.eval.command.clone())
        .with_working_dir(config.eval_dir()?)
        .with_env(env);
    let pipeline = BenchPipeline::new(Arc::new(eval), Arc::new(score_runner(&config)?))
        .with_policy(config.policy());

    println!(
        "Benchmarking {} model(s) on {} work item(s)",
        plan.models.len(),
        plan.items.len()
    );
    println!("Results dir: {}", plan.results_dir.display());
    println!();

    let report = pipeline
        .run(&plan)
        .await
        .context("Benchmark run failed")?;

    print_report(&report);

    if let Some(path) = &args.report {
        write_report(&report, path)?;
        info!(path = %path.display(), "Wrote run report");
    }

    if let Some(reason) = &report.aborted {
        anyhow::bail!("Benchmark run aborted: {}", reason);
    }
    if !report.success() {
        anyhow::bail!(
            "{} of {} model(s) were not scored",
            report.failed_models().len(),
            report.models.len()
        );
    }
    Ok(())
}

fn print_report(report: &BenchReport) {
    println!("Run ID: {}", report.run_id);
    println!("Plan digest: {}", report.plan_digest);
    println!(
        "Status: {}",
        if report.success() { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", report.duration_ms);

    for model in &report.models {
        println!();
        println!("{}", model.model_id);
        for item in &model.items {
            let status = if item.passed() { "✓" } else { "✗" };
            let wer = item
                .metrics
                .wer
                .map(|w| format!(", WER {w:.2}%"))
                .unwrap_or_default();
            println!(
                "  {} {} ({}ms, exit code: {}{})",
                status,
                item.item(),
                item.duration_ms,
                item.exit_code,
                wer
            );
        }
        println!(
            "  Summary: {}/{} items passed",
            model.passed_count(),
            model.items.len()
        );
        match &model.aggregation {
            AggregationStatus::Scored { duration_ms, output } => {
                println!("  Scoring: ✓ ({}ms)", duration_ms);
                for line in output.lines() {
                    println!("    {}", line);
                }
            }
            AggregationStatus::Failed { error } => println!("  Scoring: ✗ {}", error),
            AggregationStatus::Blocked { reason, .. } => println!("  Scoring: blocked, {}", reason),
            AggregationStatus::Aborted { .. } => println!("  Scoring: skipped, run aborted"),
        }
    }

    if let Some(reason) = &report.aborted {
        println!();
        println!("Run aborted: {}", reason);
    }

    let failed = report.failed_items();
    if !failed.is_empty() {
        println!();
        println!("Failed items:");
        for (model, item) in failed {
            println!(
                "  - {} {}: {}",
                model,
                item.item(),
                item.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn write_report(report: &BenchReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(())
}

/// List the builtin catalog
fn cmd_datasets() -> Result<()> {
    println!("{:<20} {:<14} SPLIT", "NAME", "DATASET");
    for dataset in BuiltinDataset::ALL {
        println!(
            "{:<20} {:<14} {}",
            dataset.name(),
            dataset.dataset(),
            dataset.split()
        );
    }
    Ok(())
}

/// Score one model
async fn cmd_score(model: &str, paths: &PathArgs) -> Result<()> {
    let config = load_config(paths)?;
    let request = ScoreRequest {
        model_id: ModelId::parse(model)?,
        results_dir: config.results_dir()?,
    };

    let report = score_runner(&config)?
        .score(&request)
        .await
        .with_context(|| format!("Scoring failed for {}", model))?;

    print!("{}", report.stdout);
    println!("Scored {} in {}ms", report.model_id, report.duration_ms);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// Serializes tests that touch `ASRBENCH_*` variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop `ASRBENCH_*` variables so clap only sees the given flags.
    fn clear_asrbench_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("ASRBENCH_") {
                std::env::remove_var(key);
            }
        }
    }

    fn run_args(argv: &[&str]) -> RunArgs {
        let _env = env_lock();
        clear_asrbench_env();
        let mut full = vec!["asrbench", "run"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_run_flags() {
        let args = run_args(&[
            "-m",
            "nvidia/parakeet-ctc-1.1b",
            "--model",
            "nvidia/canary-1b",
            "--device",
            "-1",
            "--max-eval-samples",
            "-1",
            "--datasets",
            "ami,tedlium",
            "--completeness",
            "fail-fast",
        ]);
        assert_eq!(args.models, vec!["nvidia/parakeet-ctc-1.1b", "nvidia/canary-1b"]);
        assert_eq!(args.device, Some(-1));
        assert_eq!(args.max_eval_samples, Some(-1));
        assert_eq!(args.datasets, vec!["ami", "tedlium"]);
        assert!(matches!(args.completeness, Some(Completeness::FailFast)));
    }

    #[test]
    fn test_parse_ignores_ambient_env() {
        {
            let _env = env_lock();
            std::env::set_var("ASRBENCH_BATCH_SIZE", "7");
            std::env::set_var("ASRBENCH_MODELS", "from-env");
        }
        let args = run_args(&["-m", "demo-model"]);
        assert_eq!(args.batch_size, None);
        assert_eq!(args.models, vec!["demo-model"]);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asrbench.toml");
        std::fs::write(
            &path,
            "models = [\"from-file\"]\nbatch_size = 8\ndevice = 1\n\n[policy]\ntimeout_secs = 60\n",
        )
        .unwrap();

        let mut args = run_args(&["--batch-size", "32", "--on-timeout", "abort-run"]);
        args.paths.config = Some(path);

        let mut config = load_config(&args.paths).unwrap();
        apply_run_overrides(&mut config, &args);

        assert_eq!(config.models, vec!["from-file"]);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.device, 1);
        assert_eq!(config.policy.timeout_secs, Some(60));
        assert_eq!(config.policy.on_timeout, TimeoutAction::AbortRun);
    }

    #[test]
    fn test_eval_command_override_splits_words() {
        let args = run_args(&["--eval-command", "python -u run_eval.py"]);
        let mut config = BenchConfig::default();
        apply_run_overrides(&mut config, &args);
        assert_eq!(config.eval.command, vec!["python", "-u", "run_eval.py"]);
    }

    #[test]
    fn test_path_flags_override_config() {
        let paths = PathArgs {
            eval_dir: Some(PathBuf::from("/bench/nemo_asr")),
            scoring_dir: Some(PathBuf::from("/bench/normalizer")),
            ..PathArgs::default()
        };
        let config = load_config(&paths).unwrap();
        assert_eq!(
            config.results_dir().unwrap(),
            PathBuf::from("/bench/nemo_asr/results")
        );
        assert_eq!(config.scoring_dir().unwrap(), PathBuf::from("/bench/normalizer"));
    }

    #[tokio::test]
    async fn test_invalid_batch_size_rejected_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = run_args(&["-m", "demo-model", "--batch-size", "0"]);
        args.paths.eval_dir = Some(dir.path().to_path_buf());

        let err = cmd_run(&args).await.unwrap_err();
        assert!(format!("{err:#}").contains("batch_size"));
        assert!(!dir.path().join("results").exists());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = BenchReport {
            run_id: "run-1".to_string(),
            plan_digest: "abc".to_string(),
            results_dir: dir.path().to_path_buf(),
            started_at: chrono::Utc::now(),
            duration_ms: 0,
            models: Vec::new(),
            aborted: None,
        };
        write_report(&report, &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"run_id\": \"run-1\""));
    }
}
