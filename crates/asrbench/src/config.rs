//! Run configuration: TOML config file, defaults and dispatch policy.
//!
//! A config file only needs the keys it changes:
//!
//! ```toml
//! models = ["nvidia/parakeet-ctc-1.1b", "nvidia/canary-1b"]
//! batch_size = 64
//! datasets = ["ami", "librispeech_clean", "librispeech_other"]
//!
//! [policy]
//! timeout_secs = 7200
//! completeness = "fail_fast"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{self, esb_catalog, WorkItem, DEFAULT_DATASET_PATH};
use crate::error::{BenchError, BenchResult};
use crate::gate::CompletenessPolicy;
use crate::params::{ModelId, RunParameters};
use crate::plan::{absolutize, BenchPlan};

/// What to do when a dispatch exceeds its timeout.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Kill the evaluation, record the item as failed, continue the run.
    #[default]
    FailItem,

    /// Kill the evaluation and fail the whole run.
    AbortRun,
}

/// Policies applied by the pipeline around each dispatch and aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Upper bound on a single dispatch; `None` waits indefinitely.
    pub timeout: Option<Duration>,

    pub on_timeout: TimeoutAction,

    pub completeness: CompletenessPolicy,
}

/// Evaluation routine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EvalCommandConfig {
    /// Command prefix; dispatch arguments are appended.
    pub command: Vec<String>,

    /// Directory the routine runs in.
    pub working_dir: PathBuf,
}

impl Default for EvalCommandConfig {
    fn default() -> Self {
        Self {
            command: vec!["python".to_string(), "run_eval.py".to_string()],
            working_dir: PathBuf::from("."),
        }
    }
}

/// Scoring routine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScoreCommandConfig {
    /// Command template with `{results_dir}` and `{model_id}` placeholders.
    /// Keep placeholders in their own arguments; values are not quoted.
    pub command: Vec<String>,

    /// Scoring location, relative to the evaluation working directory.
    pub working_dir: PathBuf,
}

impl Default for ScoreCommandConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python".to_string(),
                "-c".to_string(),
                "import sys, eval_utils; eval_utils.score_results(sys.argv[1], sys.argv[2])"
                    .to_string(),
                "{results_dir}".to_string(),
                "{model_id}".to_string(),
            ],
            working_dir: PathBuf::from("../normalizer"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Seconds before a dispatch is considered hung; unset or 0 disables.
    pub timeout_secs: Option<u64>,
    pub on_timeout: TimeoutAction,
    pub completeness: CompletenessPolicy,
}

/// Top-level benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Models to benchmark, in order.
    pub models: Vec<String>,

    /// Builtin dataset selectors; empty means the full catalog.
    pub datasets: Vec<String>,

    pub dataset_path: String,
    pub device: i64,
    pub batch_size: i64,
    pub max_eval_samples: i64,

    /// Results directory, relative to the evaluation working directory.
    pub results_dir: PathBuf,

    /// Entries prepended to `PYTHONPATH`, relative to the evaluation working directory.
    pub python_path: Vec<String>,

    /// Extra environment for both routines.
    pub env: BTreeMap<String, String>,

    pub eval: EvalCommandConfig,
    pub score: ScoreCommandConfig,
    pub policy: PolicyConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        let params = RunParameters::default();
        Self {
            models: Vec::new(),
            datasets: Vec::new(),
            dataset_path: DEFAULT_DATASET_PATH.to_string(),
            device: params.device,
            batch_size: params.batch_size,
            max_eval_samples: params.max_eval_samples,
            results_dir: PathBuf::from("results"),
            python_path: vec!["..".to_string()],
            env: BTreeMap::new(),
            eval: EvalCommandConfig::default(),
            score: ScoreCommandConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Parse a TOML config document.
    pub fn from_toml_str(raw: &str) -> BenchResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> BenchResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn run_parameters(&self) -> RunParameters {
        RunParameters {
            dataset_path: self.dataset_path.clone(),
            device: self.device,
            batch_size: self.batch_size,
            max_eval_samples: self.max_eval_samples,
        }
    }

    pub fn model_ids(&self) -> BenchResult<Vec<ModelId>> {
        self.models.iter().map(|m| ModelId::parse(m.as_str())).collect()
    }

    /// Selected work items, in catalog order.
    pub fn work_items(&self) -> BenchResult<Vec<WorkItem>> {
        if self.datasets.is_empty() {
            return Ok(esb_catalog());
        }
        catalog::select(&self.datasets)
            .map_err(|name| BenchError::Config(format!("unknown dataset: {name}")))
    }

    /// Absolute evaluation working directory.
    pub fn eval_dir(&self) -> BenchResult<PathBuf> {
        absolutize(&self.eval.working_dir)
    }

    /// Absolute results directory.
    pub fn results_dir(&self) -> BenchResult<PathBuf> {
        Ok(self.eval_dir()?.join(&self.results_dir))
    }

    /// Absolute scoring directory.
    pub fn scoring_dir(&self) -> BenchResult<PathBuf> {
        Ok(self.eval_dir()?.join(&self.score.working_dir))
    }

    /// Environment for both child processes, with `PYTHONPATH` augmented.
    pub fn child_env(&self) -> BenchResult<BTreeMap<String, String>> {
        let mut env = self.env.clone();
        if self.python_path.is_empty() {
            return Ok(env);
        }

        let eval_dir = self.eval_dir()?;
        let mut entries: Vec<String> = self
            .python_path
            .iter()
            .map(|p| eval_dir.join(p).to_string_lossy().to_string())
            .collect();
        let inherited = env
            .get("PYTHONPATH")
            .cloned()
            .or_else(|| std::env::var("PYTHONPATH").ok())
            .filter(|p| !p.is_empty());
        entries.extend(inherited);
        env.insert("PYTHONPATH".to_string(), entries.join(":"));
        Ok(env)
    }

    pub fn policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            timeout: self
                .policy
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            on_timeout: self.policy.on_timeout,
            completeness: self.policy.completeness,
        }
    }

    /// Build the run plan described by this config.
    pub fn plan(&self) -> BenchResult<BenchPlan> {
        let plan = BenchPlan::new(self.model_ids()?, self.run_parameters(), self.results_dir()?)
            .with_items(self.work_items()?);
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BenchConfig::default();
        assert_eq!(config.dataset_path, DEFAULT_DATASET_PATH);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.max_eval_samples, -1);
        assert_eq!(config.eval.command, vec!["python", "run_eval.py"]);
        assert_eq!(config.score.working_dir, PathBuf::from("../normalizer"));
        assert_eq!(config.policy(), DispatchPolicy::default());
        assert_eq!(config.work_items().unwrap(), esb_catalog());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = BenchConfig::from_toml_str(
            r#"
            models = ["nvidia/parakeet-ctc-1.1b", "nvidia/canary-1b"]
            device = -1
            batch_size = 16
            max_eval_samples = 64
            datasets = ["librispeech_other", "ami"]

            [policy]
            timeout_secs = 3600
            on_timeout = "abort_run"
            completeness = "fail_fast"
            "#,
        )
        .expect("parse failed");

        assert_eq!(config.models.len(), 2);
        assert_eq!(config.device, -1);
        assert_eq!(config.dataset_path, DEFAULT_DATASET_PATH);
        assert_eq!(
            config.work_items().unwrap(),
            vec![
                WorkItem::new("ami", "test"),
                WorkItem::new("librispeech", "test.other")
            ]
        );

        let policy = config.policy();
        assert_eq!(policy.timeout, Some(Duration::from_secs(3600)));
        assert_eq!(policy.on_timeout, TimeoutAction::AbortRun);
        assert_eq!(policy.completeness, CompletenessPolicy::FailFast);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = BenchConfig::from_toml_str("[policy]\ntimeout_secs = 0\n").unwrap();
        assert_eq!(config.policy().timeout, None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = BenchConfig::from_toml_str("batch = 3\n").unwrap_err();
        assert!(matches!(err, BenchError::ConfigParse(_)));
    }

    #[test]
    fn test_unknown_dataset_rejected() {
        let config = BenchConfig {
            datasets: vec!["timit".to_string()],
            ..BenchConfig::default()
        };
        let err = config.work_items().unwrap_err();
        assert!(err.to_string().contains("timit"));
    }

    #[test]
    fn test_paths_resolve_against_eval_dir() {
        let config = BenchConfig {
            eval: EvalCommandConfig {
                working_dir: PathBuf::from("/bench/nemo_asr"),
                ..EvalCommandConfig::default()
            },
            ..BenchConfig::default()
        };
        assert_eq!(
            config.results_dir().unwrap(),
            PathBuf::from("/bench/nemo_asr/results")
        );
        assert_eq!(
            config.scoring_dir().unwrap(),
            PathBuf::from("/bench/nemo_asr/../normalizer")
        );
    }

    #[test]
    fn test_child_env_prepends_python_path() {
        let mut env = BTreeMap::new();
        env.insert("PYTHONPATH".to_string(), "/opt/site".to_string());
        let config = BenchConfig {
            eval: EvalCommandConfig {
                working_dir: PathBuf::from("/bench/nemo_asr"),
                ..EvalCommandConfig::default()
            },
            env,
            ..BenchConfig::default()
        };
        let env = config.child_env().unwrap();
        assert_eq!(env["PYTHONPATH"], "/bench/nemo_asr/..:/opt/site");
    }

    #[test]
    fn test_plan_from_config() {
        let config = BenchConfig {
            models: vec!["demo-model".to_string()],
            datasets: vec!["ami".to_string()],
            ..BenchConfig::default()
        };
        let plan = config.plan().unwrap();
        assert_eq!(plan.models, vec![ModelId::from("demo-model")]);
        assert_eq!(plan.items, vec![WorkItem::new("ami", "test")]);
        assert!(plan.results_dir.is_absolute());
    }

    #[test]
    fn test_default_score_command_passes_values_as_arguments() {
        use crate::scorer::{ProcessScoreRunner, ScoreRequest};

        let config = BenchConfig::default();
        let scorer = ProcessScoreRunner::new(config.score.command.clone(), PathBuf::from("."));
        let command = scorer.command_for(&ScoreRequest {
            model_id: ModelId::from("/models/o'brien.nemo"),
            results_dir: PathBuf::from("/runs/it's here/results"),
        });

        assert_eq!(command[0], "python");
        assert!(!command[2].contains("o'brien"));
        assert!(command[2].contains("sys.argv[1], sys.argv[2]"));
        assert_eq!(command[3], "/runs/it's here/results");
        assert_eq!(command[4], "/models/o'brien.nemo");
    }

    #[test]
    fn test_load_missing_file() {
        let err = BenchConfig::load(Path::new("/no/such/asrbench.toml")).unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
    }
}
