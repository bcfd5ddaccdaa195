//! Result aggregation: the `ScoreRunner` capability and its process backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::error::{BenchError, BenchResult};
use crate::params::ModelId;
use crate::runner::run_command;

/// Placeholder replaced by the absolute results directory.
pub const RESULTS_DIR_PLACEHOLDER: &str = "{results_dir}";

/// Placeholder replaced by the model id.
pub const MODEL_ID_PLACEHOLDER: &str = "{model_id}";

/// What the scoring routine receives for one model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreRequest {
    pub model_id: ModelId,

    /// Absolute path of the results directory.
    pub results_dir: PathBuf,
}

/// Output of the scoring routine. The metrics themselves are owned by the
/// routine; they are passed through uninterpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateReport {
    pub model_id: ModelId,
    pub results_dir: PathBuf,
    pub stdout: String,
    pub duration_ms: u64,
}

/// Capability that scores every artifact of a model.
#[async_trait]
pub trait ScoreRunner: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> BenchResult<AggregateReport>;
}

/// Runs the scoring routine as a child process inside the scoring directory.
#[derive(Debug, Clone)]
pub struct ProcessScoreRunner {
    /// Command template with `{results_dir}` and `{model_id}` placeholders.
    /// Substitution is per argument, with no quoting.
    command: Vec<String>,

    /// Directory the routine runs in (where its supporting code lives).
    scoring_dir: PathBuf,

    env: BTreeMap<String, String>,
}

impl ProcessScoreRunner {
    pub fn new(command: Vec<String>, scoring_dir: PathBuf) -> Self {
        Self {
            command,
            scoring_dir,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Command line for `request` with placeholders substituted.
    pub fn command_for(&self, request: &ScoreRequest) -> Vec<String> {
        let results_dir = request.results_dir.to_string_lossy();
        self.command
            .iter()
            .map(|arg| {
                arg.replace(RESULTS_DIR_PLACEHOLDER, &results_dir)
                    .replace(MODEL_ID_PLACEHOLDER, request.model_id.as_str())
            })
            .collect()
    }

    fn failure(&self, request: &ScoreRequest, reason: String) -> BenchError {
        BenchError::AggregationFailed {
            model: request.model_id.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl ScoreRunner for ProcessScoreRunner {
    async fn score(&self, request: &ScoreRequest) -> BenchResult<AggregateReport> {
        if self.command.is_empty() {
            return Err(self.failure(request, "scoring command is empty".to_string()));
        }
        if !self.scoring_dir.is_dir() {
            return Err(self.failure(
                request,
                format!("scoring directory not found: {}", self.scoring_dir.display()),
            ));
        }

        info!(
            model = %request.model_id,
            results_dir = %request.results_dir.display(),
            scoring_dir = %self.scoring_dir.display(),
            "Scoring results"
        );

        let command = self.command_for(request);
        let output = run_command(&command, Some(&self.scoring_dir), &self.env)
            .await
            .map_err(|e| self.failure(request, format!("failed to run {}: {e}", command[0])))?;

        if !output.success {
            return Err(self.failure(
                request,
                format!(
                    "scoring exited with code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }

        Ok(AggregateReport {
            model_id: request.model_id.clone(),
            results_dir: request.results_dir.clone(),
            stdout: output.stdout,
            duration_ms: output.duration_ms,
        })
    }
}
