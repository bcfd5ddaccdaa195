//! Benchmark plan and its identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::catalog::{esb_catalog, WorkItem};
use crate::error::{BenchError, BenchResult};
use crate::params::{DispatchParameters, ModelId, RunParameters};

/// Everything a run needs: which models, which work items, with which parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BenchPlan {
    /// Models to benchmark, in order.
    pub models: Vec<ModelId>,

    /// Work items dispatched for every model, in order.
    pub items: Vec<WorkItem>,

    /// Parameters shared by every dispatch.
    pub params: RunParameters,

    /// Directory the evaluation routine writes artifacts into.
    pub results_dir: PathBuf,
}

impl BenchPlan {
    /// Plan the full ESB catalog for `models`.
    pub fn new(models: Vec<ModelId>, params: RunParameters, results_dir: PathBuf) -> Self {
        Self {
            models,
            items: esb_catalog(),
            params,
            results_dir,
        }
    }

    /// Replace the work items.
    pub fn with_items(mut self, items: Vec<WorkItem>) -> Self {
        self.items = items;
        self
    }

    /// Check the plan and return the validated dispatch parameters.
    pub fn validate(&self) -> BenchResult<DispatchParameters> {
        if self.models.is_empty() {
            return Err(BenchError::Config("no models to benchmark".to_string()));
        }
        if let Some(blank) = self.models.iter().find(|m| m.as_str().trim().is_empty()) {
            return Err(BenchError::Config(format!("invalid model id {:?}", blank.as_str())));
        }
        if self.items.is_empty() {
            return Err(BenchError::Config("no work items to dispatch".to_string()));
        }
        if self.results_dir.as_os_str().is_empty() {
            return Err(BenchError::Config("results_dir must not be empty".to_string()));
        }
        self.params.validate()
    }

    /// Results directory as an absolute path (relative paths resolve against
    /// the current directory).
    pub fn absolute_results_dir(&self) -> BenchResult<PathBuf> {
        absolutize(&self.results_dir)
    }

    /// SHA-256 digest of the ordered work items and run parameters.
    ///
    /// Models are excluded so that every model of a leaderboard shares the
    /// digest of the layout it was evaluated under.
    pub fn digest(&self) -> String {
        compute_plan_digest(&self.items, &self.params)
    }
}

pub(crate) fn absolutize(path: &Path) -> BenchResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn compute_plan_digest(items: &[WorkItem], params: &RunParameters) -> String {
    let mut hasher = Sha256::new();
    for item in items {
        hasher.update(item.dataset.as_bytes());
        hasher.update(b"\0");
        hasher.update(item.split.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(params.dataset_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(params.device.to_le_bytes());
    hasher.update(params.batch_size.to_le_bytes());
    hasher.update(params.max_eval_samples.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> BenchPlan {
        BenchPlan::new(
            vec![ModelId::from("demo-model")],
            RunParameters::default(),
            PathBuf::from("results"),
        )
    }

    #[test]
    fn test_new_plan_uses_catalog() {
        assert_eq!(plan().items, esb_catalog());
        assert!(plan().validate().is_ok());
    }

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(plan().digest(), plan().digest());
        assert_eq!(plan().digest().len(), 64);
    }

    #[test]
    fn test_digest_order_sensitive() {
        let forward = plan().with_items(vec![
            WorkItem::new("ami", "test"),
            WorkItem::new("tedlium", "test"),
        ]);
        let reversed = plan().with_items(vec![
            WorkItem::new("tedlium", "test"),
            WorkItem::new("ami", "test"),
        ]);
        assert_ne!(forward.digest(), reversed.digest());
    }

    #[test]
    fn test_digest_ignores_models() {
        let mut other = plan();
        other.models = vec![ModelId::from("other-model")];
        assert_eq!(plan().digest(), other.digest());
    }

    #[test]
    fn test_absolute_results_dir() {
        let resolved = plan().absolute_results_dir().unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("results"));
    }

    #[test]
    fn test_empty_models_rejected() {
        let mut empty = plan();
        empty.models.clear();
        assert!(matches!(empty.validate(), Err(BenchError::Config(_))));
    }

    #[test]
    fn test_blank_model_rejected() {
        let mut blank = plan();
        blank.models.push(ModelId::from("   "));
        assert!(matches!(blank.validate(), Err(BenchError::Config(_))));
    }

    #[test]
    fn test_empty_items_rejected() {
        let empty = plan().with_items(Vec::new());
        assert!(matches!(empty.validate(), Err(BenchError::Config(_))));
    }
}
