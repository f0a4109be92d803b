//! Scenario harness for heapgroom.
//!
//! This crate provides:
//! - Scenario fixtures: traces, registries and bugs with expected verdicts
//! - Scenario runner: drive the grooming pipeline and compare outcomes
//! - Structured logging: JSONL entries, schema validation and artifact digests
//! - Report generation: markdown + JSON verification reports

#![forbid(unsafe_code)]

pub mod error;
pub mod fixtures;
pub mod report;
pub mod runner;
pub mod structured_log;
pub mod verify;

pub use error::HarnessError;
pub use fixtures::{ScenarioCase, ScenarioExpectation, ScenarioSet};
pub use report::ScenarioReport;
pub use runner::ScenarioRunner;
pub use verify::{VerificationResult, VerificationSummary};
