//! Report generation for scenario verification.

use serde::{Deserialize, Serialize};

use crate::verify::VerificationSummary;

/// Verification report over one or more scenario sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub title: String,
    /// Timestamp (UTC).
    pub timestamp: String,
    pub summary: VerificationSummary,
}

impl ScenarioReport {
    /// Render the report as markdown. Failing rows carry their first
    /// mismatch so the table reads without the JSON.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("- Timestamp: {}\n", self.timestamp));
        out.push_str(&format!("- Total: {}\n", self.summary.total));
        out.push_str(&format!("- Passed: {}\n", self.summary.passed));
        out.push_str(&format!("- Failed: {}\n\n", self.summary.failed));

        out.push_str("| Case | Family | Status | Detail |\n");
        out.push_str("|------|--------|--------|--------|\n");
        for r in &self.summary.results {
            let status = if r.passed { "PASS" } else { "FAIL" };
            let detail = r
                .diff
                .as_deref()
                .and_then(|diff| diff.lines().next())
                .unwrap_or("")
                .replace('|', "\\|");
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                r.case_name, r.family, status, detail
            ));
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::VerificationResult;

    #[test]
    fn markdown_lists_each_case() {
        let summary = VerificationSummary::from_results(vec![
            VerificationResult::compare("uaf", "smoke", &[("success", "true".into(), "true".into())]),
            VerificationResult::compare("ovf", "smoke", &[("success", "true".into(), "false".into())]),
        ]);
        let report = ScenarioReport {
            title: "Grooming scenarios".to_string(),
            timestamp: "2026-10-18T00:00:00.000Z".to_string(),
            summary,
        };
        let md = report.to_markdown();
        assert!(md.starts_with("# Grooming scenarios\n"));
        assert!(md.contains("- Failed: 1\n"));
        assert!(md.contains("| uaf | smoke | PASS |  |\n"));
        assert!(md.contains("| ovf | smoke | FAIL | success: expected true, got false |\n"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["summary"]["total"], 2);
    }
}
