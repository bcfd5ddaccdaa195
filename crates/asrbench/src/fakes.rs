//! In-process fakes for the evaluation and scoring capabilities (testing only)
//!
//! `FakeEvalRunner` and `FakeScoreRunner` record every call into a shared
//! `CallJournal`, so tests can assert on the interleaving of dispatches and
//! scoring passes without launching processes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::artifact::artifact_path;
use crate::catalog::WorkItem;
use crate::error::{BenchError, BenchResult};
use crate::params::ModelId;
use crate::runner::{DispatchOutcome, DispatchRequest, EvalMetrics, EvalRunner};
use crate::scorer::{AggregateReport, ScoreRequest, ScoreRunner};

/// One recorded capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Dispatch(DispatchRequest),
    Score(ScoreRequest),
}

/// Ordered log of capability calls shared between fakes.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Dispatch requests, in order.
    pub fn dispatches(&self) -> Vec<DispatchRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Dispatch(r) => Some(r),
                RecordedCall::Score(_) => None,
            })
            .collect()
    }

    /// Score requests, in order.
    pub fn scores(&self) -> Vec<ScoreRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Score(r) => Some(r),
                RecordedCall::Dispatch(_) => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FakeEvalRunner
// ---------------------------------------------------------------------------

/// Evaluation fake that succeeds unless told otherwise.
#[derive(Debug, Clone)]
pub struct FakeEvalRunner {
    journal: CallJournal,
    failing: HashSet<WorkItem>,
    erroring: HashSet<WorkItem>,
    hanging: HashSet<WorkItem>,
    hanging_for: HashSet<(ModelId, WorkItem)>,
    artifacts_dir: Option<PathBuf>,
}

impl FakeEvalRunner {
    pub fn new(journal: CallJournal) -> Self {
        Self {
            journal,
            failing: HashSet::new(),
            erroring: HashSet::new(),
            hanging: HashSet::new(),
            hanging_for: HashSet::new(),
            artifacts_dir: None,
        }
    }

    /// Exit with code 1 for `item`.
    pub fn fail_on(mut self, item: WorkItem) -> Self {
        self.failing.insert(item);
        self
    }

    /// Return a runner error (as if the process could not be spawned) for `item`.
    pub fn error_on(mut self, item: WorkItem) -> Self {
        self.erroring.insert(item);
        self
    }

    /// Never finish for `item`.
    pub fn hang_on(mut self, item: WorkItem) -> Self {
        self.hanging.insert(item);
        self
    }

    /// Never finish for `item`, but only when evaluating `model`.
    pub fn hang_on_model(mut self, model: ModelId, item: WorkItem) -> Self {
        self.hanging_for.insert((model, item));
        self
    }

    /// Write an artifact file under `dir` for every successful dispatch.
    pub fn writing_artifacts(mut self, dir: PathBuf) -> Self {
        self.artifacts_dir = Some(dir);
        self
    }
}

#[async_trait]
impl EvalRunner for FakeEvalRunner {
    async fn evaluate(&self, request: &DispatchRequest) -> BenchResult<DispatchOutcome> {
        self.journal.push(RecordedCall::Dispatch(request.clone()));
        let item = request.item();

        if self.hanging.contains(&item)
            || self
                .hanging_for
                .contains(&(request.model_id.clone(), item.clone()))
        {
            std::future::pending::<()>().await;
        }

        if self.erroring.contains(&item) {
            return Err(BenchError::DispatchFailed {
                model: request.model_id.to_string(),
                item: item.to_string(),
                reason: "fake spawn failure".to_string(),
            });
        }

        if self.failing.contains(&item) {
            return Ok(DispatchOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("CUDA out of memory while evaluating {item}"),
                duration_ms: 1,
                success: false,
                metrics: EvalMetrics::default(),
            });
        }

        if let Some(dir) = &self.artifacts_dir {
            let path = artifact_path(dir, &request.model_id, &request.dataset_path, &item);
            std::fs::write(&path, b"{}\n")?;
        }

        Ok(DispatchOutcome {
            exit_code: 0,
            stdout: "RTFX: 100.0\nWER: 5.0 %\n".to_string(),
            stderr: String::new(),
            duration_ms: 1,
            success: true,
            metrics: EvalMetrics {
                wer: Some(5.0),
                rtfx: Some(100.0),
                manifest_path: None,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// FakeScoreRunner
// ---------------------------------------------------------------------------

/// Scoring fake that succeeds unless built with [`FakeScoreRunner::failing`].
#[derive(Debug, Clone)]
pub struct FakeScoreRunner {
    journal: CallJournal,
    fail: bool,
}

impl FakeScoreRunner {
    pub fn new(journal: CallJournal) -> Self {
        Self {
            journal,
            fail: false,
        }
    }

    pub fn failing(journal: CallJournal) -> Self {
        Self {
            journal,
            fail: true,
        }
    }
}

#[async_trait]
impl ScoreRunner for FakeScoreRunner {
    async fn score(&self, request: &ScoreRequest) -> BenchResult<AggregateReport> {
        self.journal.push(RecordedCall::Score(request.clone()));

        if self.fail {
            return Err(BenchError::AggregationFailed {
                model: request.model_id.to_string(),
                reason: "fake scoring failure".to_string(),
            });
        }

        Ok(AggregateReport {
            model_id: request.model_id.clone(),
            results_dir: request.results_dir.clone(),
            stdout: format!("scored {}", request.model_id),
            duration_ms: 1,
        })
    }
}
