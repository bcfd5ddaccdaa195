//! Naming convention for per-item result artifacts.
//!
//! The evaluation routine writes one JSONL manifest per (model, dataset, split)
//! into the results directory as
//! `MODEL_{model}_DATASET_{dataset_path}_{dataset}_{split}.jsonl`, with `/`
//! replaced by `-` in the model, dataset path and dataset name.

use std::path::{Path, PathBuf};

use crate::catalog::WorkItem;
use crate::params::ModelId;

fn flatten(component: &str) -> String {
    component.replace('/', "-")
}

/// File name of the artifact for one work item.
pub fn artifact_file_name(model: &ModelId, dataset_path: &str, item: &WorkItem) -> String {
    format!(
        "MODEL_{}_DATASET_{}_{}_{}.jsonl",
        flatten(model.as_str()),
        flatten(dataset_path),
        flatten(&item.dataset),
        item.split
    )
}

/// Full path of the artifact for one work item under `results_dir`.
pub fn artifact_path(
    results_dir: &Path,
    model: &ModelId,
    dataset_path: &str,
    item: &WorkItem,
) -> PathBuf {
    results_dir.join(artifact_file_name(model, dataset_path, item))
}
