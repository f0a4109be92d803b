//! Scenario verdict comparison.

use serde::{Deserialize, Serialize};

/// Result of verifying a single scenario case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub case_name: String,
    pub family: String,
    pub passed: bool,
    /// Expected verdicts, `key=value` separated by spaces.
    pub expected: String,
    /// Observed verdicts for the same keys.
    pub actual: String,
    /// Mismatching keys if the case failed.
    pub diff: Option<String>,
}

impl VerificationResult {
    /// Compares `(key, expected, actual)` triples; only listed keys are checked.
    #[must_use]
    pub fn compare(
        case_name: impl Into<String>,
        family: impl Into<String>,
        checks: &[(&str, String, String)],
    ) -> Self {
        let mut expected = Vec::with_capacity(checks.len());
        let mut actual = Vec::with_capacity(checks.len());
        for (key, want, got) in checks {
            expected.push(format!("{key}={want}"));
            actual.push(format!("{key}={got}"));
        }
        let mismatches: Vec<String> = checks
            .iter()
            .filter(|(_, expected, actual)| expected != actual)
            .map(|(key, expected, actual)| format!("{key}: expected {expected}, got {actual}"))
            .collect();
        Self {
            case_name: case_name.into(),
            family: family.into(),
            passed: mismatches.is_empty(),
            expected: expected.join(" "),
            actual: actual.join(" "),
            diff: (!mismatches.is_empty()).then(|| mismatches.join("\n")),
        }
    }
}

/// Aggregate verification summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<VerificationResult>,
}

impl VerificationSummary {
    #[must_use]
    pub fn from_results(results: Vec<VerificationResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            total,
            passed,
            failed: total - passed,
            results,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_reports_each_mismatch() {
        let result = VerificationResult::compare(
            "uaf",
            "smoke",
            &[
                ("success", "true".into(), "true".into()),
                ("target_type", "JSFunction".into(), "JSObject".into()),
            ],
        );
        assert!(!result.passed);
        assert_eq!(result.expected, "success=true target_type=JSFunction");
        assert_eq!(result.actual, "success=true target_type=JSObject");
        assert_eq!(
            result.diff.as_deref(),
            Some("target_type: expected JSFunction, got JSObject")
        );
    }

    #[test]
    fn summary_counts() {
        let ok = VerificationResult::compare("a", "f", &[("k", "1".into(), "1".into())]);
        let bad = VerificationResult::compare("b", "f", &[("k", "1".into(), "2".into())]);
        let summary = VerificationSummary::from_results(vec![ok, bad]);
        assert_eq!((summary.total, summary.passed, summary.failed), (2, 1, 1));
        assert!(!summary.all_passed());
    }
}
