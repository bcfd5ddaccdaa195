//! Benchmark catalog: the ordered (dataset, split) work items.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dataset repository the ESB catalog is served from.
pub const DEFAULT_DATASET_PATH: &str = "hf-audio/esb-datasets-test-only-sorted";

/// One unit of evaluation work for a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// Dataset name within the dataset repository.
    pub dataset: String,

    /// Split of the dataset (e.g. `test`, `test.clean`).
    pub split: String,
}

impl WorkItem {
    /// Create a work item.
    pub fn new(dataset: impl Into<String>, split: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            split: split.into(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.split)
    }
}

/// Builtin ESB benchmark entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinDataset {
    /// ami / test
    Ami,

    /// earnings22 / test
    Earnings22,

    /// gigaspeech / test
    Gigaspeech,

    /// librispeech / test.clean
    LibrispeechClean,

    /// librispeech / test.other
    LibrispeechOther,

    /// spgispeech / test
    Spgispeech,

    /// tedlium / test
    Tedlium,

    /// voxpopuli / test
    Voxpopuli,
}

impl BuiltinDataset {
    /// Every builtin entry, in catalog order.
    pub const ALL: [BuiltinDataset; 8] = [
        BuiltinDataset::Ami,
        BuiltinDataset::Earnings22,
        BuiltinDataset::Gigaspeech,
        BuiltinDataset::LibrispeechClean,
        BuiltinDataset::LibrispeechOther,
        BuiltinDataset::Spgispeech,
        BuiltinDataset::Tedlium,
        BuiltinDataset::Voxpopuli,
    ];

    /// Selector name used on the command line and in config files.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinDataset::Ami => "ami",
            BuiltinDataset::Earnings22 => "earnings22",
            BuiltinDataset::Gigaspeech => "gigaspeech",
            BuiltinDataset::LibrispeechClean => "librispeech_clean",
            BuiltinDataset::LibrispeechOther => "librispeech_other",
            BuiltinDataset::Spgispeech => "spgispeech",
            BuiltinDataset::Tedlium => "tedlium",
            BuiltinDataset::Voxpopuli => "voxpopuli",
        }
    }

    /// Dataset name passed to the evaluation routine.
    pub fn dataset(&self) -> &'static str {
        match self {
            BuiltinDataset::LibrispeechClean | BuiltinDataset::LibrispeechOther => "librispeech",
            other => other.name(),
        }
    }

    /// Split passed to the evaluation routine.
    pub fn split(&self) -> &'static str {
        match self {
            BuiltinDataset::LibrispeechClean => "test.clean",
            BuiltinDataset::LibrispeechOther => "test.other",
            _ => "test",
        }
    }

    /// Look up a builtin entry by selector name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    pub fn work_item(&self) -> WorkItem {
        WorkItem::new(self.dataset(), self.split())
    }
}

/// The full ESB catalog in its fixed order.
pub fn esb_catalog() -> Vec<WorkItem> {
    BuiltinDataset::ALL.iter().map(|d| d.work_item()).collect()
}

/// Catalog entries matching `names`, kept in catalog order.
///
/// Unknown names are returned as the error value.
pub fn select(names: &[String]) -> Result<Vec<WorkItem>, String> {
    let mut wanted = Vec::with_capacity(names.len());
    for name in names {
        match BuiltinDataset::from_name(name) {
            Some(dataset) => wanted.push(dataset),
            None => return Err(name.clone()),
        }
    }

    Ok(BuiltinDataset::ALL
        .iter()
        .filter(|d| wanted.contains(d))
        .map(|d| d.work_item())
        .collect())
}
