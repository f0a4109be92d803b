//! CLI entrypoint for the heapgroom scenario harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use heapgroom_core::{
    AllocatorAnalyzer, BugDescriptor, EligibilityTable, EngineConfig, GroomingEngine,
    LayoutCatalog, ObjectRegistry, PatternRegistry, RawBugDescriptor, RawObjectDescriptor,
    RawTraceEvent, parse_trace,
};
use heapgroom_harness::error::Result as HarnessResult;
use heapgroom_harness::structured_log::{
    ArtifactIndex, LogEmitter, LogEntry, LogLevel, Outcome, StreamKind, now_utc,
    validate_log_file,
};
use heapgroom_harness::{
    HarnessError, ScenarioReport, ScenarioRunner, ScenarioSet, VerificationSummary,
};

/// Heap grooming strategy tooling.
#[derive(Debug, Parser)]
#[command(name = "heapgroom-harness")]
#[command(about = "Trace analysis, strategy planning and scenario verification for heapgroom")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze an allocation trace: slot sizes, reuse and freelist replay.
    Replay {
        /// Trace JSON (array of `{type,size,action,address?,timestamp?}`).
        #[arg(long)]
        trace: PathBuf,
        /// Override the bucket alignment.
        #[arg(long)]
        alignment: Option<usize>,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Plan a grooming strategy for one bug against a trace and registry.
    Groom {
        #[arg(long)]
        trace: PathBuf,
        /// Registry JSON (array of vulnerable object descriptors).
        #[arg(long)]
        registry: PathBuf,
        /// Bug kind: overflow, underflow or use-after-free.
        #[arg(long)]
        bug_kind: String,
        #[arg(long)]
        target_size: i64,
        #[arg(long)]
        overflow_size: Option<i64>,
        /// Layout catalog JSON merged over the built-in layouts.
        #[arg(long)]
        layouts: Option<PathBuf>,
        /// Known grooming patterns (`{"name": [strategy, ...]}`) tried per chain.
        #[arg(long)]
        patterns: Option<PathBuf>,
        /// Engine config JSON; `HEAPGROOM_*` variables apply on top.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Report JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Codegen plan JSON for the selected outcome.
        #[arg(long)]
        codegen_output: Option<PathBuf>,
        /// Visualizer snapshot JSON for the selected outcome.
        #[arg(long)]
        snapshot_output: Option<PathBuf>,
        /// Structured JSONL log of the replay and the selected simulation.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Verify the engine against scenario fixtures.
    Verify {
        /// Scenario JSON file or directory of scenario files.
        #[arg(long)]
        fixture: PathBuf,
        /// Output report path (markdown; JSON is written alongside).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Optional fixed timestamp string for deterministic report generation.
        #[arg(long)]
        timestamp: Option<String>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Validate a structured JSONL log against the schema.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> HarnessResult<T> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|err| HarnessError::Input {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn load_config(path: Option<&Path>) -> HarnessResult<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_json(&std::fs::read_to_string(path)?)?
            .with_env_overrides(|key| std::env::var(key).ok()),
        None => EngineConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn write_or_print(
    path: Option<&Path>,
    content: &str,
    index: &mut ArtifactIndex,
    kind: &str,
) -> std::io::Result<()> {
    match path {
        Some(path) => {
            eprintln!("Writing {kind} to {}", path.display());
            std::fs::write(path, content)?;
            index.add_bytes(path.display().to_string(), kind, content.as_bytes());
            Ok(())
        }
        None => {
            println!("{content}");
            Ok(())
        }
    }
}

/// Writes `<first output>.artifacts.json` when anything went to disk.
fn write_artifact_index(index: &ArtifactIndex, anchor: Option<&Path>) -> HarnessResult<()> {
    if let Some(anchor) = anchor
        && !index.artifacts.is_empty()
    {
        let path = anchor.with_extension("artifacts.json");
        std::fs::write(&path, index.to_json()?)?;
        eprintln!("Artifact index: {}", path.display());
    }
    Ok(())
}

fn run_id() -> String {
    format!("run-{}", now_utc().replace([':', '.'], "-"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            trace,
            alignment,
            output,
        } => {
            eprintln!("Replaying trace {}", trace.display());
            let mut config = EngineConfig::from_env();
            if let Some(alignment) = alignment {
                config.alignment = alignment;
            }
            let raw: Vec<RawTraceEvent> = read_json(&trace)?;
            let events = parse_trace(&raw)?;
            let analysis = AllocatorAnalyzer::new(&config)?.analyze(&events)?;
            eprintln!(
                "Replay complete: events={}, buckets={}, hits={}, misses={}",
                events.len(),
                analysis.slot_sizes.len(),
                analysis.replay.hits,
                analysis.replay.misses
            );
            let mut index = ArtifactIndex::new(run_id());
            let json = serde_json::to_string_pretty(&analysis)?;
            write_or_print(output.as_deref(), &json, &mut index, "trace_analysis")?;
            write_artifact_index(&index, output.as_deref())?;
        }
        Command::Groom {
            trace,
            registry,
            bug_kind,
            target_size,
            overflow_size,
            layouts,
            patterns,
            config,
            output,
            codegen_output,
            snapshot_output,
            log,
        } => {
            let config = load_config(config.as_deref())?;
            let classifier = config.classifier()?;
            let bug = BugDescriptor::parse(&RawBugDescriptor {
                kind: bug_kind,
                overflow_size,
                target_size,
            })?;
            let events = parse_trace(&read_json::<Vec<RawTraceEvent>>(&trace)?)?;
            let objects: Vec<RawObjectDescriptor> = read_json(&registry)?;
            let registry = ObjectRegistry::from_raw(&objects, &classifier)?;
            let layouts = match layouts {
                Some(path) => {
                    let overrides = LayoutCatalog::from_json(&std::fs::read_to_string(&path)?)?;
                    LayoutCatalog::default().merged_with(overrides)
                }
                None => LayoutCatalog::default(),
            };
            let patterns = match patterns {
                Some(path) => PatternRegistry::from_json(&std::fs::read_to_string(&path)?)?,
                None => PatternRegistry::default(),
            };
            eprintln!(
                "Planning {} (target_size={}) over {} events and {} registry objects",
                bug.kind,
                bug.target_size,
                events.len(),
                registry.len()
            );
            let engine =
                GroomingEngine::new(&config, registry, EligibilityTable::default(), layouts)?
                    .with_patterns(patterns);
            let report = engine.plan(&bug, &events)?;

            match report.best_outcome() {
                Some(best) => eprintln!(
                    "Selected {} -> {} in bucket {} (success={}, chains={})",
                    best.chain.payload.object_type,
                    best.chain.target.object_type,
                    best.chain.bucket_size,
                    best.success,
                    report.chains.len()
                ),
                None => eprintln!("No eligible chains for {}", bug.kind),
            }
            for factor in &report.assessment.factors {
                eprintln!("  factor: {factor}");
            }
            for advice in &report.assessment.recommendations {
                eprintln!("  recommendation: {advice}");
            }

            let mut index = ArtifactIndex::new(run_id());
            if let Some(plan) = report.codegen_plan()
                && let Some(path) = codegen_output.as_deref()
            {
                write_or_print(Some(path), &plan.to_json_pretty()?, &mut index, "codegen_plan")?;
            }
            if let Some(export) = report.visualizer_export()
                && let Some(path) = snapshot_output.as_deref()
            {
                write_or_print(
                    Some(path),
                    &export.to_json_pretty()?,
                    &mut index,
                    "visualizer_snapshots",
                )?;
            }
            if let Some(log_path) = log.as_deref() {
                let mut emitter = LogEmitter::to_file(log_path, index.run_id.as_str())?;
                emitter.emit_engine_records(&report.lifecycle_log())?;
                let outcome = match report.best_outcome() {
                    Some(best) if best.success => Outcome::Pass,
                    _ => Outcome::Fail,
                };
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "groom_complete")
                        .with_stream(StreamKind::Groom)
                        .with_outcome(outcome)
                        .with_artifacts(index.artifacts.iter().map(|a| a.path.clone()).collect()),
                )?;
                emitter.flush()?;
                index.add_file(log_path, "structured_log")?;
            }
            let json = serde_json::to_string_pretty(&report)?;
            write_or_print(output.as_deref(), &json, &mut index, "groom_report")?;
            write_artifact_index(
                &index,
                output
                    .as_deref()
                    .or(codegen_output.as_deref())
                    .or(snapshot_output.as_deref())
                    .or(log.as_deref()),
            )?;
        }
        Command::Verify {
            fixture,
            report,
            timestamp,
            log,
        } => {
            eprintln!("Verifying against scenarios in {}", fixture.display());
            let sets = ScenarioSet::load_all(&fixture)?;
            let runner = ScenarioRunner::new("scenario-verify");

            let mut results = Vec::new();
            match log.as_deref() {
                Some(log_path) => {
                    let mut emitter = LogEmitter::to_file(log_path, &run_id())?;
                    for set in &sets {
                        results.extend(runner.run_logged(set, &mut emitter)?);
                    }
                }
                None => {
                    for set in &sets {
                        results.extend(runner.run(set));
                    }
                }
            }

            // Stabilize report ordering for reproducible output hashing.
            results.sort_by(|a, b| {
                a.family
                    .cmp(&b.family)
                    .then_with(|| a.case_name.cmp(&b.case_name))
            });

            let summary = VerificationSummary::from_results(results);
            let report_doc = ScenarioReport {
                title: String::from("heapgroom Scenario Report"),
                timestamp: timestamp.unwrap_or_else(now_utc),
                summary,
            };

            eprintln!(
                "Verification complete: total={}, passed={}, failed={}",
                report_doc.summary.total, report_doc.summary.passed, report_doc.summary.failed
            );
            for failed in report_doc.summary.results.iter().filter(|r| !r.passed) {
                eprintln!(
                    "  FAIL {}::{}: {}",
                    failed.family,
                    failed.case_name,
                    failed.diff.as_deref().unwrap_or("")
                );
            }

            if let Some(report_path) = report {
                eprintln!("Writing report to {}", report_path.display());
                std::fs::write(&report_path, report_doc.to_markdown())?;
                let json_path = report_path.with_extension("json");
                std::fs::write(&json_path, report_doc.to_json())?;
            }

            if !report_doc.summary.all_passed() {
                return Err(HarnessError::VerificationFailed {
                    failed: report_doc.summary.failed,
                    total: report_doc.summary.total,
                }
                .into());
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for error in &errors {
                eprintln!("{error}");
            }
            eprintln!(
                "Validated {}: lines={}, errors={}",
                log.display(),
                lines,
                errors.len()
            );
            if !errors.is_empty() {
                return Err(HarnessError::InvalidLog {
                    lines,
                    errors: errors.len(),
                }
                .into());
            }
        }
    }

    Ok(())
}
