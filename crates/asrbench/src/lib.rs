//! asrbench - ASR benchmark orchestration
//!
//! Drives a leaderboard-style benchmark run:
//! - Enumerates the (dataset, split) work items of the ESB catalog
//! - Dispatches one external evaluation per model and work item, in order
//! - Checks result completeness and hands the results directory to an
//!   external scoring routine once per model

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod params;
pub mod pipeline;
pub mod plan;
pub mod runner;
pub mod scorer;
pub mod telemetry;

// Re-export key types
pub use catalog::{esb_catalog, BuiltinDataset, WorkItem, DEFAULT_DATASET_PATH};
pub use config::{BenchConfig, DispatchPolicy, TimeoutAction};
pub use error::{BenchError, BenchResult};
pub use gate::{CompletenessGate, CompletenessPolicy, GateVerdict};
pub use params::{DispatchParameters, ModelId, RunParameters, SampleCap};
pub use pipeline::{
    AggregationStatus, BenchPipeline, BenchReport, ItemResult, ModelPhase, ModelReport,
};
pub use plan::BenchPlan;
pub use runner::{DispatchOutcome, DispatchRequest, EvalMetrics, EvalRunner, ProcessEvalRunner};
pub use scorer::{AggregateReport, ProcessScoreRunner, ScoreRequest, ScoreRunner};
pub use telemetry::init_tracing;
