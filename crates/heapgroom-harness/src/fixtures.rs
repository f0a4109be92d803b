//! Scenario fixture loading and management.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use heapgroom_core::{
    EngineConfig, PatternRegistry, RawBugDescriptor, RawLayoutCatalog, RawObjectDescriptor,
    RawTraceEvent,
};

use crate::error::{HarnessError, Result};

/// Verdicts a scenario expects. Unset fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioExpectation {
    /// Engine error class (`invalid_input`, `invalid_operation`,
    /// `unsupported_bug_kind`, `layout`) the case must fail with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_count: Option<usize>,
    /// Target type of the selected outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_size: Option<usize>,
    /// Inferred slot sizes (bucket → count).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_sizes: Option<BTreeMap<usize, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freelist_hits: Option<u64>,
    /// Simulated (chain, strategy) pairs, registered patterns included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_count: Option<usize>,
    /// Pre-allocation steps of the selected strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_steps: Option<usize>,
}

/// One grooming scenario: inputs plus expected verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioCase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trace: Vec<RawTraceEvent>,
    #[serde(default)]
    pub registry: Vec<RawObjectDescriptor>,
    pub bug: RawBugDescriptor,
    /// Per-case engine configuration; defaults when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<EngineConfig>,
    /// Layout overrides merged over the built-in catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layouts: Option<RawLayoutCatalog>,
    /// Known grooming patterns tried after each synthesized strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<PatternRegistry>,
    pub expect: ScenarioExpectation,
}

/// A collection of scenarios for one family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSet {
    pub version: String,
    pub family: String,
    #[serde(default)]
    pub captured_at: String,
    pub cases: Vec<ScenarioCase>,
}

impl ScenarioSet {
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|err| HarnessError::Input {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Loads one file, or every `*.json` in a directory (sorted by path).
    pub fn load_all(path: &Path) -> Result<Vec<Self>> {
        if path.is_file() {
            return Ok(vec![Self::from_file(path)?]);
        }
        let mut paths: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect();
        paths.sort();
        let mut sets = Vec::new();
        for path in paths {
            match Self::from_file(&path) {
                Ok(set) => sets.push(set),
                Err(err) => eprintln!("Skipping {}: {err}", path.display()),
            }
        }
        if sets.is_empty() {
            return Err(HarnessError::Input {
                path: path.to_path_buf(),
                reason: "no scenario JSON files found".to_string(),
            });
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_case_parses_with_defaults() {
        let set = ScenarioSet::from_json(
            r#"{
                "version":"v1",
                "family":"smoke",
                "cases":[{"name":"empty","bug":{"kind":"overflow","target_size":32},"expect":{"chain_count":0}}]
            }"#,
        )
        .unwrap();
        let case = &set.cases[0];
        assert!(case.trace.is_empty());
        assert!(case.config.is_none());
        assert_eq!(case.expect.chain_count, Some(0));
        assert_eq!(case.expect.success, None);
    }

    #[test]
    fn expectation_omits_unset_fields() {
        let expect = ScenarioExpectation {
            success: Some(true),
            ..ScenarioExpectation::default()
        };
        let json = serde_json::to_value(&expect).unwrap();
        assert_eq!(json, serde_json::json!({"success": true}));
    }
}
