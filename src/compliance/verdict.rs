use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use crate::{checkers::CheckResult, identifier::Identifier};

/// Aggregate outcome of one compliance check.
///
/// `results` holds exactly one entry per checker that was scheduled, in
/// registry order, including errored ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub identifier: Identifier,
    pub is_compliant: bool,
    pub results: Vec<CheckResult>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl ComplianceVerdict {
    pub fn new(identifier: Identifier, results: Vec<CheckResult>, request_id: String) -> Self {
        Self {
            is_compliant: aggregate(&results),
            identifier,
            results,
            timestamp: Utc::now(),
            request_id,
        }
    }

    /// Non-compliance reasons from every blocking source, in registry order
    pub fn reasons(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.blocks())
            .flat_map(|r| r.reasons.iter().cloned())
            .collect()
    }

    pub fn errored_sources(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.errored)
            .map(|r| r.source.as_str())
            .collect()
    }

    pub fn blocking_sources(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.blocks())
            .map(|r| r.source.as_str())
            .collect()
    }

    pub fn result_for(&self, source: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.source == source)
    }

    /// Re-evaluate with caller-side overrides: an errored result from a
    /// fail-closed source counts as a rejection.
    pub fn is_compliant_with(&self, policy: &FailPolicy) -> bool {
        self.is_compliant
            && !self
                .results
                .iter()
                .any(|r| r.errored && policy.is_fail_closed(&r.source))
    }
}

/// Compliant iff every result that reached a verdict is compliant.
/// Errored results are excluded (fail-open).
pub fn aggregate(results: &[CheckResult]) -> bool {
    results.iter().filter(|r| !r.errored).all(|r| r.is_compliant)
}

/// Which sources a caller treats as fail-closed
#[derive(Debug, Clone, Default)]
pub struct FailPolicy {
    fail_closed: HashSet<String>,
}

impl FailPolicy {
    pub fn fail_open() -> Self {
        Self::default()
    }

    pub fn fail_closed_for<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fail_closed: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_fail_closed(&self, source: &str) -> bool {
        self.fail_closed.contains(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::CheckFailure;
    use serde_json::json;

    fn verdict(results: Vec<CheckResult>) -> ComplianceVerdict {
        ComplianceVerdict::new(Identifier::parse("6507769592").unwrap(), results, "req-1".to_string())
    }

    #[test]
    fn test_all_clean_is_compliant() {
        let v = verdict(vec![
            CheckResult::compliant("a", json!({})),
            CheckResult::compliant("b", json!({})),
        ]);
        assert!(v.is_compliant);
        assert!(v.reasons().is_empty());
    }

    #[test]
    fn test_errored_results_are_excluded() {
        let v = verdict(vec![
            CheckResult::compliant("a", json!({})),
            CheckResult::errored("b", CheckFailure::Timeout, "slow"),
        ]);
        assert!(v.is_compliant);
        assert_eq!(v.errored_sources(), vec!["b"]);
    }

    #[test]
    fn test_flipping_one_checker_flips_aggregate() {
        let mut results = vec![
            CheckResult::compliant("a", json!({})),
            CheckResult::compliant("b", json!({})),
            CheckResult::errored("c", CheckFailure::Network, "down"),
        ];
        assert!(aggregate(&results));

        for i in 0..2 {
            let mut flipped = results.clone();
            let source = flipped[i].source.clone();
            flipped[i] = CheckResult::non_compliant(&source, vec!["listed".into()], json!({}));
            assert!(!aggregate(&flipped));
        }

        // Errored results never flip it, whatever their compliance flag says
        results[2].is_compliant = false;
        assert!(aggregate(&results));
    }

    #[test]
    fn test_reasons_are_consolidated_in_order() {
        let v = verdict(vec![
            CheckResult::non_compliant("tcpa", vec!["Litigator".into()], json!({})),
            CheckResult::compliant("external-blacklist", json!({})),
            CheckResult::non_compliant("internal-dnc", vec!["Opted out".into()], json!({})),
        ]);
        assert!(!v.is_compliant);
        assert_eq!(v.reasons(), vec!["Litigator", "Opted out"]);
        assert_eq!(v.blocking_sources(), vec!["tcpa", "internal-dnc"]);
    }

    #[test]
    fn test_fail_closed_override() {
        let v = verdict(vec![
            CheckResult::compliant("internal-dnc", json!({})),
            CheckResult::errored("tcpa", CheckFailure::Timeout, "slow"),
        ]);
        assert!(v.is_compliant_with(&FailPolicy::fail_open()));
        assert!(!v.is_compliant_with(&FailPolicy::fail_closed_for(["tcpa"])));
        assert!(v.is_compliant_with(&FailPolicy::fail_closed_for(["external-blacklist"])));
    }
}
