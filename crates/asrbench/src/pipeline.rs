//! Benchmark pipeline: sequential dispatch per model, then one scoring pass.
//!
//! The pipeline never changes the process working directory. The scoring
//! location is handed to the scoring capability explicitly, so the working
//! context at the end of a run (including a failed one) is the one it started
//! with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifact::artifact_path;
use crate::catalog::WorkItem;
use crate::config::{DispatchPolicy, TimeoutAction};
use crate::error::{BenchError, BenchResult};
use crate::gate::{CompletenessGate, CompletenessPolicy, GateVerdict};
use crate::params::{DispatchParameters, ModelId};
use crate::plan::BenchPlan;
use crate::runner::{DispatchRequest, EvalMetrics, EvalRunner};
use crate::scorer::{AggregateReport, ScoreRequest, ScoreRunner};

/// Lines of stderr kept in a failed item's error message.
const STDERR_TAIL_LINES: usize = 5;

/// Result of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemResult {
    /// Zero-based position of the item in the plan.
    pub position: usize,

    pub dataset: String,
    pub split: String,

    /// Exit code (0 = success, -1 when no exit code is available).
    pub exit_code: i32,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,

    /// Whether the dispatch was killed by the timeout policy.
    pub timed_out: bool,

    /// Failure description (absent on success).
    pub error: Option<String>,

    pub metrics: EvalMetrics,
}

impl ItemResult {
    /// Whether this dispatch passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    pub fn item(&self) -> WorkItem {
        WorkItem::new(self.dataset.clone(), self.split.clone())
    }

    fn failed(position: usize, item: &WorkItem, duration_ms: u64, error: String) -> Self {
        Self {
            position,
            dataset: item.dataset.clone(),
            split: item.split.clone(),
            exit_code: -1,
            duration_ms,
            success: false,
            timed_out: false,
            error: Some(error),
            metrics: EvalMetrics::default(),
        }
    }
}

/// How a model's scoring pass ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregationStatus {
    /// The scoring routine completed; `output` is its stdout.
    Scored { duration_ms: u64, output: String },

    /// The scoring routine failed.
    Failed { error: String },

    /// Scoring was refused by the fail-fast completeness policy.
    Blocked {
        reason: String,
        violations: Vec<String>,
    },

    /// A dispatch timed out under the abort-run policy; scoring never ran.
    Aborted { reason: String },
}

impl AggregationStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, AggregationStatus::Scored { .. })
    }

    pub fn aborted(&self) -> bool {
        matches!(self, AggregationStatus::Aborted { .. })
    }
}

/// Per-model lifecycle: `Pending -> Dispatching* -> Aggregating -> Done`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ModelPhase {
    Pending,
    Dispatching { position: usize },
    Aggregating,
    Done,
}

impl ModelPhase {
    /// Next phase for a model with `item_count` work items.
    ///
    /// Every dispatching position is visited and aggregation is never skipped.
    pub fn advance(self, item_count: usize) -> ModelPhase {
        match self {
            ModelPhase::Pending if item_count > 0 => ModelPhase::Dispatching { position: 0 },
            ModelPhase::Pending => ModelPhase::Aggregating,
            ModelPhase::Dispatching { position } if position + 1 < item_count => {
                ModelPhase::Dispatching {
                    position: position + 1,
                }
            }
            ModelPhase::Dispatching { .. } => ModelPhase::Aggregating,
            ModelPhase::Aggregating | ModelPhase::Done => ModelPhase::Done,
        }
    }
}

/// Result of benchmarking one model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelReport {
    pub model_id: ModelId,

    /// Results of individual dispatches, in plan order.
    pub items: Vec<ItemResult>,

    /// Completeness verdict evaluated before scoring.
    pub verdict: GateVerdict,

    pub aggregation: AggregationStatus,

    /// Final lifecycle phase.
    pub phase: ModelPhase,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl ModelReport {
    /// Number of dispatches that passed.
    pub fn passed_count(&self) -> usize {
        self.items.iter().filter(|i| i.passed()).count()
    }

    /// Number of dispatches that failed.
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| !i.passed()).count()
    }

    pub fn failed_items(&self) -> Vec<&ItemResult> {
        self.items.iter().filter(|i| !i.passed()).collect()
    }

    /// Whether the model was scored.
    pub fn success(&self) -> bool {
        self.aggregation.succeeded()
    }
}

/// Result of a complete benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchReport {
    pub run_id: String,

    /// Digest of the plan's work items and parameters.
    pub plan_digest: String,

    pub results_dir: PathBuf,
    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Models that ran, in plan order. Models after an aborted one are absent.
    pub models: Vec<ModelReport>,

    /// Why the run stopped before every model ran.
    #[serde(default)]
    pub aborted: Option<String>,
}

impl BenchReport {
    /// Whether every model was scored.
    pub fn success(&self) -> bool {
        self.aborted.is_none() && self.models.iter().all(|m| m.success())
    }

    /// Models whose scoring failed or was blocked.
    pub fn failed_models(&self) -> Vec<&ModelId> {
        self.models
            .iter()
            .filter(|m| !m.success())
            .map(|m| &m.model_id)
            .collect()
    }

    /// Every failed dispatch across the run, with its model.
    pub fn failed_items(&self) -> Vec<(&ModelId, &ItemResult)> {
        self.models
            .iter()
            .flat_map(|m| m.failed_items().into_iter().map(move |i| (&m.model_id, i)))
            .collect()
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn check_completeness(
    model: &ModelId,
    items: &[WorkItem],
    results: &[ItemResult],
    params: &DispatchParameters,
    results_dir: &Path,
) -> GateVerdict {
    CompletenessGate::evaluate(items, results, |item| {
        artifact_path(results_dir, model, &params.dataset_path, item).exists()
    })
}

/// Benchmark orchestrator over injected evaluation and scoring capabilities.
pub struct BenchPipeline {
    eval_runner: Arc<dyn EvalRunner>,
    score_runner: Arc<dyn ScoreRunner>,
    policy: DispatchPolicy,
}

impl BenchPipeline {
    pub fn new(eval_runner: Arc<dyn EvalRunner>, score_runner: Arc<dyn ScoreRunner>) -> Self {
        Self {
            eval_runner,
            score_runner,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Benchmark every model of `plan`, one after another.
    ///
    /// Fails before any dispatch when the plan is invalid. Dispatch and
    /// scoring failures are recorded in the report. A timeout under
    /// [`TimeoutAction::AbortRun`] stops the run early; the report then holds
    /// every model up to and including the aborted one.
    pub async fn run(&self, plan: &BenchPlan) -> BenchResult<BenchReport> {
        let start = Instant::now();
        let params = plan.validate()?;
        let results_dir = plan.absolute_results_dir()?;
        std::fs::create_dir_all(&results_dir)?;

        let run_id = Uuid::new_v4().to_string();
        let plan_digest = plan.digest();
        let started_at = Utc::now();

        info!(
            run_id = %run_id,
            models = plan.models.len(),
            items = plan.items.len(),
            plan_digest = %&plan_digest[..12],
            "Starting benchmark run"
        );

        let mut models = Vec::with_capacity(plan.models.len());
        let mut aborted = None;
        for model in &plan.models {
            let report = self
                .run_model(model, &plan.items, &params, &results_dir)
                .await?;
            if let AggregationStatus::Aborted { reason } = &report.aggregation {
                aborted = Some(reason.clone());
            }
            models.push(report);
            if aborted.is_some() {
                break;
            }
        }

        let report = BenchReport {
            run_id,
            plan_digest,
            results_dir,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            models,
            aborted,
        };

        if let Some(reason) = &report.aborted {
            error!(run_id = %report.run_id, "Benchmark run aborted: {}", reason);
        } else if report.success() {
            info!(run_id = %report.run_id, "Benchmark run completed successfully");
        } else {
            info!(
                run_id = %report.run_id,
                failed_models = report.failed_models().len(),
                "Benchmark run failed"
            );
        }

        Ok(report)
    }

    /// Dispatch every item for `model` in order, then score it once.
    ///
    /// A timed-out dispatch under [`TimeoutAction::AbortRun`] ends the model
    /// early with [`AggregationStatus::Aborted`].
    pub async fn run_model(
        &self,
        model: &ModelId,
        items: &[WorkItem],
        params: &DispatchParameters,
        results_dir: &Path,
    ) -> BenchResult<ModelReport> {
        let start = Instant::now();
        let mut phase = ModelPhase::Pending;
        let mut results = Vec::with_capacity(items.len());

        info!(model = %model, items = items.len(), "Benchmarking model");

        for (position, item) in items.iter().enumerate() {
            phase = phase.advance(items.len());
            debug!(model = %model, phase = ?phase, "Model phase");

            let request = DispatchRequest::new(model, item, params);
            let result = self.dispatch(position, &request).await;
            let abort = result.timed_out && self.policy.on_timeout == TimeoutAction::AbortRun;
            results.push(result);

            if abort {
                let reason = results[position]
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("dispatch of {item} timed out"));
                error!(model = %model, item = %item, "Aborting run: {}", reason);
                let verdict = check_completeness(model, items, &results, params, results_dir);
                return Ok(ModelReport {
                    model_id: model.clone(),
                    items: results,
                    verdict,
                    aggregation: AggregationStatus::Aborted { reason },
                    phase,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
            }
        }

        phase = phase.advance(items.len());
        debug_assert_eq!(phase, ModelPhase::Aggregating);

        let verdict = check_completeness(model, items, &results, params, results_dir);
        if !verdict.passed {
            warn!(model = %model, "{}", verdict.message);
            for violation in &verdict.violations {
                warn!(model = %model, "{}", violation);
            }
        }

        let aggregation =
            if !verdict.passed && self.policy.completeness == CompletenessPolicy::FailFast {
                let reason = BenchError::IncompleteResults {
                    model: model.to_string(),
                    violations: verdict.violations.len(),
                }
                .to_string();
                error!(model = %model, "Scoring blocked: {}", reason);
                AggregationStatus::Blocked {
                    reason,
                    violations: verdict.violations.clone(),
                }
            } else {
                match self.aggregate(model, results_dir).await {
                    Ok(report) => AggregationStatus::Scored {
                        duration_ms: report.duration_ms,
                        output: report.stdout,
                    },
                    Err(e) => {
                        error!(model = %model, error = %e, "Scoring failed");
                        AggregationStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

        phase = phase.advance(items.len());

        Ok(ModelReport {
            model_id: model.clone(),
            items: results,
            verdict,
            aggregation,
            phase,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run one evaluation and wait for it.
    ///
    /// Runner errors, non-zero exits and timeouts all become a failed
    /// [`ItemResult`]; a timeout sets `timed_out`.
    pub async fn dispatch(&self, position: usize, request: &DispatchRequest) -> ItemResult {
        let start = Instant::now();
        let item = request.item();

        info!(
            model = %request.model_id,
            dataset = %request.dataset,
            split = %request.split,
            position,
            "Dispatching evaluation"
        );

        let evaluation = self.eval_runner.evaluate(request);
        let finished = match self.policy.timeout {
            Some(limit) => tokio::time::timeout(limit, evaluation).await.ok(),
            None => Some(evaluation.await),
        };

        let result = match finished {
            None => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let timeout = BenchError::DispatchTimedOut {
                    model: request.model_id.to_string(),
                    item: item.to_string(),
                    elapsed_ms,
                };
                ItemResult {
                    timed_out: true,
                    ..ItemResult::failed(position, &item, elapsed_ms, timeout.to_string())
                }
            }
            Some(Err(e)) => ItemResult::failed(
                position,
                &item,
                start.elapsed().as_millis() as u64,
                e.to_string(),
            ),
            Some(Ok(outcome)) => {
                let error = if outcome.passed() {
                    None
                } else {
                    let tail = stderr_tail(&outcome.stderr);
                    Some(if tail.is_empty() {
                        format!("exited with code {}", outcome.exit_code)
                    } else {
                        format!("exited with code {}: {}", outcome.exit_code, tail)
                    })
                };
                ItemResult {
                    position,
                    dataset: item.dataset.clone(),
                    split: item.split.clone(),
                    exit_code: outcome.exit_code,
                    duration_ms: outcome.duration_ms,
                    success: outcome.success,
                    timed_out: false,
                    error,
                    metrics: outcome.metrics,
                }
            }
        };

        if result.passed() {
            info!(
                model = %request.model_id,
                item = %item,
                duration_ms = result.duration_ms,
                wer = ?result.metrics.wer,
                rtfx = ?result.metrics.rtfx,
                "Evaluation finished"
            );
        } else {
            warn!(
                model = %request.model_id,
                item = %item,
                error = result.error.as_deref().unwrap_or_default(),
                "Evaluation failed"
            );
        }

        result
    }

    /// Score every artifact of `model` under `results_dir`.
    pub async fn aggregate(
        &self,
        model: &ModelId,
        results_dir: &Path,
    ) -> BenchResult<AggregateReport> {
        let request = ScoreRequest {
            model_id: model.clone(),
            results_dir: results_dir.to_path_buf(),
        };
        info!(model = %model, results_dir = %results_dir.display(), "Aggregating results");
        self.score_runner.score(&request).await
    }
}
