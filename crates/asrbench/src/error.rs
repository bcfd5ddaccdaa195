//! Error taxonomy for benchmark orchestration.

/// Errors produced while planning, dispatching or scoring a benchmark run.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dispatch of {item} for model {model} failed: {reason}")]
    DispatchFailed {
        model: String,
        item: String,
        reason: String,
    },

    #[error("dispatch of {item} for model {model} timed out after {elapsed_ms}ms")]
    DispatchTimedOut {
        model: String,
        item: String,
        elapsed_ms: u64,
    },

    #[error("aggregation for model {model} failed: {reason}")]
    AggregationFailed { model: String, reason: String },

    #[error("results for model {model} are incomplete ({violations} violation(s))")]
    IncompleteResults { model: String, violations: usize },

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for benchmark operations.
pub type BenchResult<T> = std::result::Result<T, BenchError>;
