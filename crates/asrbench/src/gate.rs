//! Completeness gate evaluated before a model is scored.

use serde::{Deserialize, Serialize};

use crate::catalog::WorkItem;
use crate::pipeline::ItemResult;

/// What to do when a model's results are incomplete.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessPolicy {
    /// Report the gaps and score whatever artifacts exist.
    #[default]
    BestEffort,

    /// Refuse to score a model with any gap.
    FailFast,
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Completeness rules for a model's results.
pub struct CompletenessGate;

impl CompletenessGate {
    /// Evaluate whether every planned item produced a usable artifact.
    ///
    /// Gate rule, per planned item in order:
    /// - it must have been dispatched
    /// - its dispatch must have passed
    /// - `artifact_exists` must report its artifact present
    pub fn evaluate<F>(
        planned: &[WorkItem],
        results: &[ItemResult],
        artifact_exists: F,
    ) -> GateVerdict
    where
        F: Fn(&WorkItem) -> bool,
    {
        let mut violations = Vec::new();

        for (position, item) in planned.iter().enumerate() {
            let Some(result) = results.iter().find(|r| r.position == position) else {
                violations.push(format!("Item {} (#{}) was never dispatched", item, position));
                continue;
            };

            if !result.passed() {
                let reason = result.error.as_deref().unwrap_or("unknown error");
                violations.push(format!("Item {} (#{}) failed: {}", item, position, reason));
            } else if !artifact_exists(item) {
                violations.push(format!(
                    "Item {} (#{}) passed but wrote no result artifact",
                    item, position
                ));
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} items complete", planned.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::EvalMetrics;

    fn result(position: usize, item: &WorkItem, success: bool) -> ItemResult {
        ItemResult {
            position,
            dataset: item.dataset.clone(),
            split: item.split.clone(),
            exit_code: if success { 0 } else { 1 },
            duration_ms: 10,
            success,
            timed_out: false,
            error: if success {
                None
            } else {
                Some("exited with code 1".to_string())
            },
            metrics: EvalMetrics::default(),
        }
    }

    fn planned() -> Vec<WorkItem> {
        vec![
            WorkItem::new("ami", "test"),
            WorkItem::new("librispeech", "test.clean"),
        ]
    }

    #[test]
    fn test_complete_results_pass() {
        let planned = planned();
        let results = vec![result(0, &planned[0], true), result(1, &planned[1], true)];
        let verdict = CompletenessGate::evaluate(&planned, &results, |_| true);
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.message, "All 2 items complete");
    }

    #[test]
    fn test_failed_item_is_violation() {
        let planned = planned();
        let results = vec![result(0, &planned[0], true), result(1, &planned[1], false)];
        let verdict = CompletenessGate::evaluate(&planned, &results, |_| true);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].contains("librispeech/test.clean"));
        assert!(verdict.violations[0].contains("exited with code 1"));
    }

    #[test]
    fn test_missing_dispatch_is_violation() {
        let planned = planned();
        let results = vec![result(0, &planned[0], true)];
        let verdict = CompletenessGate::evaluate(&planned, &results, |_| true);
        assert!(!verdict.passed);
        assert!(verdict.violations[0].contains("never dispatched"));
    }

    #[test]
    fn test_missing_artifact_is_violation() {
        let planned = planned();
        let results = vec![result(0, &planned[0], true), result(1, &planned[1], true)];
        let verdict =
            CompletenessGate::evaluate(&planned, &results, |item| item.dataset != "ami");
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].contains("no result artifact"));
    }

    #[test]
    fn test_policy_serde() {
        let policy: CompletenessPolicy = serde_json::from_str("\"fail_fast\"").unwrap();
        assert_eq!(policy, CompletenessPolicy::FailFast);
        assert_eq!(CompletenessPolicy::default(), CompletenessPolicy::BestEffort);
    }
}
