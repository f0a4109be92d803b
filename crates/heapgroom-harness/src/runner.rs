//! Scenario execution engine.

use std::time::Instant;

use heapgroom_core::{
    BugDescriptor, EligibilityTable, GroomError, GroomReport, GroomingEngine, LayoutCatalog,
    ObjectRegistry, parse_trace,
};

use crate::fixtures::{ScenarioCase, ScenarioSet};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome, StreamKind};
use crate::verify::VerificationResult;

/// Runs scenario sets through the grooming pipeline and collects verdicts.
pub struct ScenarioRunner {
    /// Name of the verification campaign.
    pub campaign: String,
    /// Eligibility table shared by every case.
    pub eligibility: EligibilityTable,
}

impl ScenarioRunner {
    #[must_use]
    pub fn new(campaign: impl Into<String>) -> Self {
        Self {
            campaign: campaign.into(),
            eligibility: EligibilityTable::default(),
        }
    }

    /// Run every case in a set.
    pub fn run(&self, set: &ScenarioSet) -> Vec<VerificationResult> {
        set.cases
            .iter()
            .map(|case| verify_case(&set.family, case, &self.execute(case)))
            .collect()
    }

    /// Run every case, logging a start/verdict pair per case plus the
    /// selected simulation's engine records.
    pub fn run_logged(
        &self,
        set: &ScenarioSet,
        emitter: &mut LogEmitter,
    ) -> std::io::Result<Vec<VerificationResult>> {
        let mut results = Vec::with_capacity(set.cases.len());
        for case in &set.cases {
            emitter.emit_entry(
                LogEntry::new("", LogLevel::Info, "scenario_start")
                    .with_stream(StreamKind::Scenario)
                    .with_case(&case.name)
                    .with_details(serde_json::json!({
                        "campaign": self.campaign,
                        "family": set.family,
                    })),
            )?;
            let started = Instant::now();
            let execution = self.execute(case);
            if let Ok(report) = &execution {
                emitter.emit_engine_records(&report.lifecycle_log())?;
            }
            let result = verify_case(&set.family, case, &execution);
            let (level, outcome) = match (&execution, result.passed) {
                (_, true) => (LogLevel::Info, Outcome::Pass),
                (Err(_), false) => (LogLevel::Error, Outcome::Error),
                (Ok(_), false) => (LogLevel::Warn, Outcome::Fail),
            };
            let mut verdict = LogEntry::new("", level, "scenario_verdict")
                .with_stream(StreamKind::Scenario)
                .with_case(&case.name)
                .with_outcome(outcome)
                .with_duration_ms(started.elapsed().as_millis() as u64);
            if let Some(diff) = &result.diff {
                verdict = verdict.with_details(serde_json::json!({ "diff": diff }));
            }
            emitter.emit_entry(verdict)?;
            results.push(result);
        }
        emitter.flush()?;
        Ok(results)
    }

    /// Builds an engine from the case's inputs and plans.
    pub fn execute(&self, case: &ScenarioCase) -> Result<GroomReport, GroomError> {
        let config = case.config.clone().unwrap_or_default();
        config.validate()?;
        let layouts = match &case.layouts {
            Some(overrides) => {
                LayoutCatalog::default().merged_with(LayoutCatalog::from_raw(overrides)?)
            }
            None => LayoutCatalog::default(),
        };
        // Bug kind errors take precedence over trace errors.
        let bug = BugDescriptor::parse(&case.bug)?;
        let events = parse_trace(&case.trace)?;
        let registry = ObjectRegistry::from_raw(&case.registry, &config.classifier()?)?;
        let engine = GroomingEngine::new(&config, registry, self.eligibility.clone(), layouts)?
            .with_patterns(case.patterns.clone().unwrap_or_default());
        engine.plan(&bug, &events)
    }
}

fn render_slots(slots: &std::collections::BTreeMap<usize, usize>) -> String {
    let body = slots
        .iter()
        .map(|(bucket, count)| format!("{bucket}:{count}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}

fn or_none<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Compares the expected verdicts against one execution.
fn verify_case(
    family: &str,
    case: &ScenarioCase,
    execution: &Result<GroomReport, GroomError>,
) -> VerificationResult {
    let expect = &case.expect;
    let mut checks: Vec<(&str, String, String)> = Vec::new();

    let report = match execution {
        Ok(report) => report,
        Err(err) => {
            let expected = expect.error.clone().unwrap_or_else(|| "none".to_string());
            checks.push(("error", expected, err.class().to_string()));
            let mut result = VerificationResult::compare(&case.name, family, &checks);
            if !result.passed {
                result.diff = Some(format!(
                    "{}\n{err}",
                    result.diff.unwrap_or_default()
                ));
            }
            return result;
        }
    };

    let best = report.best_outcome();
    if let Some(error) = &expect.error {
        checks.push(("error", error.clone(), "none".to_string()));
    }
    if let Some(success) = expect.success {
        let actual = best.is_some_and(|outcome| outcome.success);
        checks.push(("success", success.to_string(), actual.to_string()));
    }
    if let Some(count) = expect.chain_count {
        checks.push(("chain_count", count.to_string(), report.chains.len().to_string()));
    }
    if let Some(target) = &expect.target_type {
        let actual = best.map(|outcome| outcome.chain.target.object_type.clone());
        checks.push(("target_type", target.clone(), or_none(actual)));
    }
    if let Some(payload) = &expect.payload_type {
        let actual = best.map(|outcome| outcome.chain.payload.object_type.clone());
        checks.push(("payload_type", payload.clone(), or_none(actual)));
    }
    if let Some(bucket) = expect.bucket_size {
        let actual = best.map(|outcome| outcome.chain.bucket_size);
        checks.push(("bucket_size", bucket.to_string(), or_none(actual)));
    }
    if let Some(slots) = &expect.slot_sizes {
        checks.push((
            "slot_sizes",
            render_slots(slots),
            render_slots(&report.analysis.slot_sizes),
        ));
    }
    if let Some(count) = expect.outcome_count {
        checks.push(("outcome_count", count.to_string(), report.outcomes.len().to_string()));
    }
    if let Some(steps) = expect.pre_steps {
        let actual = best.map(|outcome| outcome.strategy.pre_allocations.len());
        checks.push(("pre_steps", steps.to_string(), or_none(actual)));
    }
    if let Some(hits) = expect.freelist_hits {
        checks.push((
            "freelist_hits",
            hits.to_string(),
            report.analysis.replay.hits.to_string(),
        ));
    }
    VerificationResult::compare(&case.name, family, &checks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(cases: &str) -> ScenarioSet {
        ScenarioSet::from_json(&format!(
            r#"{{"version":"v1","family":"unit","captured_at":"2026-10-01T00:00:00Z","cases":{cases}}}"#
        ))
        .expect("valid scenario json")
    }

    #[test]
    fn uaf_case_passes() {
        let set = set(
            r#"[{
                "name":"uaf_callable",
                "trace":[
                    {"type":"JSFunction","size":64,"action":"alloc","address":4096},
                    {"type":"JSFunction","size":64,"action":"free","address":4096}
                ],
                "registry":[{"type":"JSFunction","size":64},{"type":"ArrayBuffer","size":32}],
                "bug":{"kind":"use-after-free","target_size":64},
                "expect":{"success":true,"chain_count":1,"target_type":"JSFunction","payload_type":"JSFunction","bucket_size":64}
            }]"#,
        );
        let results = ScenarioRunner::new("unit").run(&set);
        assert_eq!(results.len(), 1);
        assert!(results[0].passed, "{:?}", results[0].diff);
    }

    #[test]
    fn expected_error_passes_and_unexpected_error_fails() {
        let set = set(
            r#"[
                {"name":"bad_kind","bug":{"kind":"double-free","target_size":64},"expect":{"error":"unsupported_bug_kind"}},
                {"name":"surprise","trace":[{"type":"A","size":-4,"action":"alloc"}],"bug":{"kind":"overflow","target_size":64},"expect":{"success":true}}
            ]"#,
        );
        let results = ScenarioRunner::new("unit").run(&set);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].actual, "error=invalid_operation");
        assert!(results[1].diff.as_deref().unwrap().contains("index 0"));
    }

    #[test]
    fn negative_registry_size_is_invalid_input() {
        let set = set(
            r#"[{
                "name":"negative_size",
                "registry":[{"type":"TypedArray","size":-48}],
                "bug":{"kind":"overflow","target_size":48},
                "expect":{"error":"invalid_input"}
            }]"#,
        );
        let results = ScenarioRunner::new("unit").run(&set);
        assert!(results[0].passed, "{:?}", results[0].diff);
    }

    #[test]
    fn case_patterns_are_simulated() {
        let set = set(
            r#"[{
                "name":"pattern_reclaims",
                "registry":[{"type":"TypedArray","size":48}],
                "bug":{"kind":"overflow","target_size":48},
                "patterns":{"reclaim":[{
                    "pre_allocations":[{"object_type":"Array","size":48,"count":2}],
                    "target_placement":{"object_type":"TypedArray","size":48,"count":1},
                    "post_allocations":[]
                }]},
                "expect":{"success":true,"outcome_count":2,"pre_steps":1}
            }]"#,
        );
        let results = ScenarioRunner::new("unit").run(&set);
        assert!(results[0].passed, "{:?}", results[0].diff);
    }

    #[test]
    fn mismatch_is_reported() {
        let set = set(
            r#"[{
                "name":"wrong_payload",
                "registry":[{"type":"TypedArray","size":48}],
                "bug":{"kind":"overflow","target_size":48},
                "expect":{"payload_type":"DataView","success":false}
            }]"#,
        );
        let results = ScenarioRunner::new("unit").run(&set);
        assert!(!results[0].passed);
        assert_eq!(
            results[0].diff.as_deref(),
            Some("payload_type: expected DataView, got ArrayBuffer")
        );
    }
}
