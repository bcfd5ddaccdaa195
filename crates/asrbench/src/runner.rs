//! Evaluation dispatch: the `EvalRunner` capability and its process backend.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use crate::catalog::WorkItem;
use crate::error::{BenchError, BenchResult};
use crate::params::{DispatchParameters, ModelId, SampleCap};

/// Everything the evaluation routine receives for one work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchRequest {
    pub model_id: ModelId,
    pub dataset_path: String,
    pub dataset: String,
    pub split: String,
    pub device: i32,
    pub batch_size: u32,
    pub max_eval_samples: SampleCap,
}

impl DispatchRequest {
    /// Combine a model, a work item and the shared run parameters.
    pub fn new(model_id: &ModelId, item: &WorkItem, params: &DispatchParameters) -> Self {
        Self {
            model_id: model_id.clone(),
            dataset_path: params.dataset_path.clone(),
            dataset: item.dataset.clone(),
            split: item.split.clone(),
            device: params.device,
            batch_size: params.batch_size.get(),
            max_eval_samples: params.sample_cap,
        }
    }

    pub fn item(&self) -> WorkItem {
        WorkItem::new(self.dataset.clone(), self.split.clone())
    }

    /// Command-line arguments understood by `run_eval.py`.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("--model_id={}", self.model_id),
            format!("--dataset_path={}", self.dataset_path),
            format!("--dataset={}", self.dataset),
            format!("--split={}", self.split),
            format!("--device={}", self.device),
            format!("--batch_size={}", self.batch_size),
            format!("--max_eval_samples={}", self.max_eval_samples.as_raw()),
        ]
    }
}

/// Metrics the evaluation routine prints on completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalMetrics {
    /// Word error rate, in percent.
    pub wer: Option<f64>,

    /// Inverse real-time factor.
    pub rtfx: Option<f64>,

    /// Where the routine reports it saved the manifest.
    pub manifest_path: Option<PathBuf>,
}

fn wer_pattern() -> &'static Regex {
    static WER: OnceLock<Regex> = OnceLock::new();
    WER.get_or_init(|| Regex::new(r"(?m)^WER:\s*([0-9]+(?:\.[0-9]+)?)").expect("valid regex"))
}

fn rtfx_pattern() -> &'static Regex {
    static RTFX: OnceLock<Regex> = OnceLock::new();
    RTFX.get_or_init(|| Regex::new(r"(?m)^RTFX:\s*([0-9]+(?:\.[0-9]+)?)").expect("valid regex"))
}

fn manifest_pattern() -> &'static Regex {
    static MANIFEST: OnceLock<Regex> = OnceLock::new();
    MANIFEST.get_or_init(|| {
        Regex::new(r"(?m)^Results saved at path:\s*(\S.*?)\s*$").expect("valid regex")
    })
}

impl EvalMetrics {
    /// Extract metrics from the routine's stdout. Missing lines stay `None`.
    pub fn parse(stdout: &str) -> Self {
        let number = |re: &Regex| {
            re.captures_iter(stdout)
                .last()
                .and_then(|c| c[1].parse::<f64>().ok())
        };

        Self {
            wer: number(wer_pattern()),
            rtfx: number(rtfx_pattern()),
            manifest_path: manifest_pattern()
                .captures_iter(stdout)
                .last()
                .map(|c| PathBuf::from(&c[1])),
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,

    /// Metrics parsed from the routine's output.
    pub metrics: EvalMetrics,
}

impl DispatchOutcome {
    /// Whether this dispatch passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Capability that evaluates one model on one work item.
///
/// Implementations must not return before the evaluation has finished.
#[async_trait]
pub trait EvalRunner: Send + Sync {
    async fn evaluate(&self, request: &DispatchRequest) -> BenchResult<DispatchOutcome>;
}

/// Captured result of a child process.
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

/// Spawn `command` (first element is the executable) and wait for it.
///
/// The child is killed if the returned future is dropped, so callers may
/// bound it with `tokio::time::timeout`.
pub(crate) async fn run_command(
    command: &[String],
    working_dir: Option<&Path>,
    env: &BTreeMap<String, String>,
) -> std::io::Result<CommandOutput> {
    let start = Instant::now();

    let (exe, args) = command.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")
    })?;

    let mut cmd = Command::new(exe);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!(command = ?command, working_dir = ?working_dir, "Spawning process");
    let output = cmd.spawn()?.wait_with_output().await?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    })
}

/// Runs the evaluation routine as a child process per dispatch.
#[derive(Debug, Clone)]
pub struct ProcessEvalRunner {
    /// Command prefix (e.g. `python run_eval.py`); request arguments are appended.
    command: Vec<String>,

    /// Working directory of the child; artifacts land relative to it.
    working_dir: Option<PathBuf>,

    /// Extra environment for the child.
    env: BTreeMap<String, String>,
}

impl ProcessEvalRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Full command line for `request`.
    pub fn command_for(&self, request: &DispatchRequest) -> Vec<String> {
        let mut command = self.command.clone();
        command.extend(request.to_args());
        command
    }
}

#[async_trait]
impl EvalRunner for ProcessEvalRunner {
    async fn evaluate(&self, request: &DispatchRequest) -> BenchResult<DispatchOutcome> {
        if self.command.is_empty() {
            return Err(BenchError::Config("evaluation command is empty".to_string()));
        }

        let command = self.command_for(request);
        let output = run_command(&command, self.working_dir.as_deref(), &self.env)
            .await
            .map_err(|e| BenchError::DispatchFailed {
                model: request.model_id.to_string(),
                item: request.item().to_string(),
                reason: format!("failed to run {}: {e}", self.command[0]),
            })?;

        let metrics = if output.success {
            EvalMetrics::parse(&output.stdout)
        } else {
            EvalMetrics::default()
        };

        Ok(DispatchOutcome {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
            success: output.success,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn request() -> DispatchRequest {
        let params = DispatchParameters {
            dataset_path: "hf-audio/esb-datasets-test-only-sorted".to_string(),
            device: 0,
            batch_size: NonZeroU32::new(64).unwrap(),
            sample_cap: SampleCap::Unbounded,
        };
        DispatchRequest::new(
            &ModelId::from("nvidia/parakeet-ctc-1.1b"),
            &WorkItem::new("librispeech", "test.other"),
            &params,
        )
    }

    #[test]
    fn test_request_args() {
        let args = request().to_args();
        assert_eq!(args[0], "--model_id=nvidia/parakeet-ctc-1.1b");
        assert!(args.contains(&"--dataset=librispeech".to_string()));
        assert!(args.contains(&"--split=test.other".to_string()));
        assert!(args.contains(&"--batch_size=64".to_string()));
        assert!(args.contains(&"--max_eval_samples=-1".to_string()));
    }

    #[test]
    fn test_parse_metrics() {
        let stdout = "Subsampling dataset to first 64 samples !\n\
                      Results saved at path: /work/results/MODEL_x_DATASET_y_ami_test.jsonl\n\
                      RTFX: 1043.27\n\
                      WER: 15.62 %\n";
        let metrics = EvalMetrics::parse(stdout);
        assert_eq!(metrics.wer, Some(15.62));
        assert_eq!(metrics.rtfx, Some(1043.27));
        assert_eq!(
            metrics.manifest_path,
            Some(PathBuf::from("/work/results/MODEL_x_DATASET_y_ami_test.jsonl"))
        );
    }

    #[test]
    fn test_parse_metrics_missing_lines() {
        let metrics = EvalMetrics::parse("Downloading Samples: 100%\n");
        assert_eq!(metrics, EvalMetrics::default());
    }

    #[test]
    fn test_outcome_passed() {
        let outcome = DispatchOutcome {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 100,
            success: true,
            metrics: EvalMetrics::default(),
        };
        assert!(outcome.passed());

        let failed = DispatchOutcome {
            exit_code: 1,
            success: false,
            ..outcome
        };
        assert!(!failed.passed());
    }

    #[tokio::test]
    async fn test_process_runner_appends_request_args() {
        let runner = ProcessEvalRunner::new(vec!["echo".to_string()]);
        let outcome = runner.evaluate(&request()).await.expect("evaluate failed");
        assert!(outcome.passed());
        assert!(outcome.stdout.contains("--dataset=librispeech"));
        assert!(outcome.stdout.contains("--max_eval_samples=-1"));
    }

    #[tokio::test]
    async fn test_process_runner_failing_command() {
        let runner = ProcessEvalRunner::new(vec!["false".to_string()]);
        let outcome = runner.evaluate(&request()).await.expect("evaluate failed");
        assert!(!outcome.success);
        assert_ne!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn test_process_runner_missing_executable() {
        let runner = ProcessEvalRunner::new(vec!["asrbench-no-such-binary".to_string()]);
        let err = runner.evaluate(&request()).await.unwrap_err();
        assert!(matches!(err, BenchError::DispatchFailed { .. }));
    }

    #[tokio::test]
    async fn test_process_runner_uses_working_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("ASRBENCH_TEST_MARKER".to_string(), "marker-42".to_string());
        let runner = ProcessEvalRunner::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "pwd; echo $ASRBENCH_TEST_MARKER".to_string(),
        ])
        .with_working_dir(dir.path().to_path_buf())
        .with_env(env);

        let outcome = runner.evaluate(&request()).await.expect("evaluate failed");
        assert!(outcome.passed());
        assert!(outcome.stdout.contains("marker-42"));
        let canonical = dir.path().canonicalize().unwrap();
        assert!(outcome
            .stdout
            .contains(canonical.file_name().unwrap().to_str().unwrap()));
    }
}
