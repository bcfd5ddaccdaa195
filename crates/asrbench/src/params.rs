//! Run parameters shared by every dispatch of a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

use crate::catalog::DEFAULT_DATASET_PATH;
use crate::error::{BenchError, BenchResult};

/// Opaque identifier of a model to benchmark (e.g. `nvidia/parakeet-ctc-1.1b`).
///
/// Always trimmed. Deserializing goes through [`ModelId::parse`], so blank ids
/// are rejected there as well.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// Create a model id, rejecting blank identifiers.
    pub fn parse(raw: impl Into<String>) -> BenchResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BenchError::Config("model id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Infallible, trimming conversion. Blank ids survive it and are caught by
/// plan validation.
impl From<&str> for ModelId {
    fn from(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }
}

impl TryFrom<String> for ModelId {
    type Error = BenchError;

    fn try_from(raw: String) -> BenchResult<Self> {
        Self::parse(raw)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}

/// Cap on the number of examples evaluated per work item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "i64", into = "i64")]
pub enum SampleCap {
    /// Evaluate the whole split (raw value `-1`).
    Unbounded,

    /// Evaluate at most this many examples.
    Limit(u64),
}

impl SampleCap {
    /// Raw value understood by the evaluation routine.
    pub fn as_raw(&self) -> i64 {
        match self {
            SampleCap::Unbounded => -1,
            SampleCap::Limit(n) => i64::try_from(*n).unwrap_or(i64::MAX),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, SampleCap::Unbounded)
    }
}

impl TryFrom<i64> for SampleCap {
    type Error = BenchError;

    fn try_from(raw: i64) -> BenchResult<Self> {
        match raw {
            -1 => Ok(SampleCap::Unbounded),
            n if n >= 0 => Ok(SampleCap::Limit(n as u64)),
            n => Err(BenchError::Config(format!(
                "max_eval_samples must be -1 (no cap) or non-negative, got {n}"
            ))),
        }
    }
}

impl From<SampleCap> for i64 {
    fn from(cap: SampleCap) -> Self {
        cap.as_raw()
    }
}

impl fmt::Display for SampleCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleCap::Unbounded => f.write_str("unbounded"),
            SampleCap::Limit(n) => write!(f, "{n}"),
        }
    }
}

/// Operator-supplied run parameters, as given (unvalidated).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunParameters {
    /// Dataset repository locator.
    pub dataset_path: String,

    /// Execution target: -1 for CPU, n >= 0 for accelerator n.
    pub device: i64,

    /// Samples per batch; must be positive.
    pub batch_size: i64,

    /// -1 disables the cap, n >= 0 limits the examples evaluated.
    pub max_eval_samples: i64,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            dataset_path: DEFAULT_DATASET_PATH.to_string(),
            device: 0,
            batch_size: 64,
            max_eval_samples: -1,
        }
    }
}

impl RunParameters {
    /// Validate into the typed parameters handed to every dispatch.
    pub fn validate(&self) -> BenchResult<DispatchParameters> {
        let dataset_path = self.dataset_path.trim();
        if dataset_path.is_empty() {
            return Err(BenchError::Config("dataset_path must not be empty".to_string()));
        }

        let device = i32::try_from(self.device)
            .ok()
            .filter(|d| *d >= -1)
            .ok_or_else(|| {
                BenchError::Config(format!(
                    "device must be -1 (CPU) or an accelerator index, got {}",
                    self.device
                ))
            })?;

        let batch_size = u32::try_from(self.batch_size)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| {
                BenchError::Config(format!(
                    "batch_size must be a positive integer, got {}",
                    self.batch_size
                ))
            })?;

        let sample_cap = SampleCap::try_from(self.max_eval_samples)?;

        Ok(DispatchParameters {
            dataset_path: dataset_path.to_string(),
            device,
            batch_size,
            sample_cap,
        })
    }
}

/// Validated, read-only parameters shared across all dispatches of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchParameters {
    pub dataset_path: String,
    pub device: i32,
    pub batch_size: NonZeroU32,
    pub sample_cap: SampleCap,
}
