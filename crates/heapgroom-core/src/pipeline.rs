//! End-to-end grooming pipeline.
//!
//! `trace → analysis → candidates → chains → ranking → strategies →
//! parallel simulation → best outcome`. Every simulation starts from the
//! freelist the trace replay left behind, so the observed heap shapes the
//! verdict.
//!
//! Each chain is simulated with its synthesized strategy first, then with
//! every registered pattern matching the target size.

use serde::Serialize;

use crate::analyzer::{AllocatorAnalyzer, TraceAnalysis, TraceEvent};
use crate::chain::{ChainEngine, ExploitabilityAssessment, RankedChain};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::export::{CodegenPlan, VisualizerExport};
use crate::layout::LayoutCatalog;
use crate::log::EngineLogRecord;
use crate::model::FreelistState;
use crate::registry::{BugDescriptor, EligibilityTable, ObjectRegistry};
use crate::strategy::{PatternRegistry, SimulationOutcome, StrategySynthesizer};

/// Everything one `plan` call produced.
#[derive(Debug, Clone, Serialize)]
pub struct GroomReport {
    pub bug: BugDescriptor,
    pub analysis: TraceAnalysis,
    pub chains: Vec<RankedChain>,
    pub assessment: ExploitabilityAssessment,
    pub outcomes: Vec<SimulationOutcome>,
    /// Index into `outcomes` of the selected outcome.
    pub best: Option<usize>,
}

impl GroomReport {
    pub fn best_outcome(&self) -> Option<&SimulationOutcome> {
        self.best.and_then(|index| self.outcomes.get(index))
    }

    pub fn initial_freelist(&self) -> &FreelistState {
        &self.analysis.replay.state
    }

    pub fn codegen_plan(&self) -> Option<CodegenPlan> {
        self.best_outcome()
            .map(|outcome| CodegenPlan::new(&outcome.chain, &outcome.strategy))
    }

    pub fn visualizer_export(&self) -> Option<VisualizerExport> {
        self.best_outcome()
            .map(|outcome| VisualizerExport::from_result(&outcome.result, self.initial_freelist()))
    }

    /// Replay log followed by the selected simulation's log.
    pub fn lifecycle_log(&self) -> Vec<EngineLogRecord> {
        let mut log = self.analysis.replay.log.clone();
        if let Some(outcome) = self.best_outcome() {
            log.extend(outcome.log.iter().cloned());
        }
        log
    }
}

#[derive(Debug, Clone)]
pub struct GroomingEngine {
    analyzer: AllocatorAnalyzer,
    chains: ChainEngine,
    synthesizer: StrategySynthesizer,
    registry: ObjectRegistry,
    patterns: PatternRegistry,
}

impl GroomingEngine {
    pub fn new(
        config: &EngineConfig,
        registry: ObjectRegistry,
        eligibility: EligibilityTable,
        layouts: LayoutCatalog,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = config.classifier()?;
        // Registry buckets must agree with the engine's classifier.
        let registry = ObjectRegistry::new(registry.iter().cloned().collect(), &classifier)?;
        Ok(Self {
            analyzer: AllocatorAnalyzer::new(config)?,
            chains: ChainEngine::new(eligibility, layouts, classifier.clone(), config.ranking)
                .with_vtables(config.known_vtables.iter().copied().collect()),
            synthesizer: StrategySynthesizer::new(config.grooming.clone(), classifier),
            registry,
            patterns: PatternRegistry::new(),
        })
    }

    #[must_use]
    pub fn with_patterns(mut self, patterns: PatternRegistry) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn analyzer(&self) -> &AllocatorAnalyzer {
        &self.analyzer
    }

    pub fn chains(&self) -> &ChainEngine {
        &self.chains
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn plan(&self, bug: &BugDescriptor, events: &[TraceEvent]) -> Result<GroomReport> {
        let analysis = self.analyzer.analyze(events)?;
        let chains = self.chains.discover(bug, &self.registry);
        let assessment = self.chains.assess(bug, &self.registry, &chains);
        let mut candidates = Vec::with_capacity(chains.len());
        for ranked in &chains {
            let chain = &ranked.chain;
            candidates.push((chain.clone(), self.synthesizer.synthesize(chain)));
            for pattern in self.patterns.patterns_for_size(chain.target.size) {
                candidates.push((chain.clone(), pattern.clone()));
            }
        }
        let outcomes = self
            .synthesizer
            .simulate_all(&candidates, &analysis.replay.state)?;
        let best = StrategySynthesizer::select_best(&outcomes)
            .and_then(|best| outcomes.iter().position(|outcome| std::ptr::eq(outcome, best)));
        Ok(GroomReport {
            bug: *bug,
            analysis,
            chains,
            assessment,
            outcomes,
            best,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketClassifier;
    use crate::classification::ObjectClass;
    use crate::model::{AllocationSpec, GroomingStrategy};
    use crate::registry::{BugKind, VulnerableObjectDescriptor};

    fn registry() -> ObjectRegistry {
        let classifier = BucketClassifier::default();
        ObjectRegistry::new(
            vec![
                VulnerableObjectDescriptor::new("JSFunction", 64, &classifier).unwrap(),
                VulnerableObjectDescriptor::new("ArrayBuffer", 32, &classifier).unwrap(),
            ],
            &classifier,
        )
        .unwrap()
    }

    fn engine(config: &EngineConfig) -> GroomingEngine {
        GroomingEngine::new(
            config,
            registry(),
            EligibilityTable::default(),
            LayoutCatalog::default(),
        )
        .unwrap()
    }

    #[test]
    fn uaf_plan_selects_callable_target() {
        let events = vec![
            TraceEvent::alloc("JSFunction", 64, Some(0x100)),
            TraceEvent::free("JSFunction", 64, 0x100),
        ];
        let bug = BugDescriptor::new(BugKind::UseAfterFree, 64).unwrap();
        let report = engine(&EngineConfig::default()).plan(&bug, &events).unwrap();

        assert_eq!(report.chains.len(), 1);
        let best = report.best_outcome().unwrap();
        assert!(best.success);
        assert_eq!(best.chain.payload.object_type, "JSFunction");
        // The freed trace chunk is reused by the first filler.
        assert_eq!(best.result.allocations[0].address, 0x100);
        assert_eq!(report.initial_freelist().len_in(64), 1);

        let plan = report.codegen_plan().unwrap();
        assert_eq!(plan.chain_fingerprint, best.chain.fingerprint());
        let export = report.visualizer_export().unwrap();
        assert_eq!(export.snapshots.len(), 9);
        assert!(report.lifecycle_log().len() > 9);
    }

    #[test]
    fn assessment_reports_factors_for_the_best_chain() {
        let classifier = BucketClassifier::default();
        let registry = ObjectRegistry::new(
            vec![
                VulnerableObjectDescriptor::new("JSFunction", 0x44, &classifier)
                    .unwrap()
                    .with_fields(["code", "context"])
                    .with_vtable_offset(0)
                    .with_vtable_address(0x40_1000),
                VulnerableObjectDescriptor::new("Uint8Array", 0x44, &classifier).unwrap(),
            ],
            &classifier,
        )
        .unwrap();
        let config = EngineConfig {
            known_vtables: vec![0x40_1000],
            ..EngineConfig::default()
        };
        let engine = GroomingEngine::new(
            &config,
            registry,
            EligibilityTable::default(),
            LayoutCatalog::default(),
        )
        .unwrap();
        // 0x44 is neither a dangerous nor a harmless size.
        let bug = BugDescriptor::new(BugKind::UseAfterFree, 0x44).unwrap();
        let report = engine.plan(&bug, &[]).unwrap();

        assert_eq!(report.chains[0].object_class, ObjectClass::Dangerous);
        let assessment = &report.assessment;
        assert_eq!(assessment.overall_permille, 900);
        assert_eq!(
            assessment.factors,
            vec![
                "JSFunction is dangerous",
                "Vtable manipulation possible",
                "Vtable 0x401000 is known",
                "Found 2 corruptible fields",
            ]
        );
        assert_eq!(
            assessment.recommendations,
            vec![
                "Consider using heap spraying to increase reliability",
                "Spray with Uint8Array",
            ]
        );
        assert_eq!(assessment.spray_candidates, vec!["Uint8Array"]);
        assert!(assessment.overwrite_chains.is_empty());
    }

    #[test]
    fn registered_pattern_rescues_a_failing_chain() {
        let classifier = BucketClassifier::default();
        let registry = ObjectRegistry::new(
            vec![VulnerableObjectDescriptor::new("TypedArray", 48, &classifier).unwrap()],
            &classifier,
        )
        .unwrap();
        let mut patterns = PatternRegistry::new();
        patterns.register_pattern(
            "typed-array-reclaim",
            GroomingStrategy {
                pre_allocations: vec![AllocationSpec::new("Array", 48, 2)],
                target_placement: AllocationSpec::new("TypedArray", 48, 1),
                post_allocations: Vec::new(),
                triggers: Vec::new(),
            },
        );
        let engine = GroomingEngine::new(
            &EngineConfig::default(),
            registry,
            EligibilityTable::default(),
            LayoutCatalog::default(),
        )
        .unwrap()
        .with_patterns(patterns);
        let bug = BugDescriptor::new(BugKind::Overflow, 48).unwrap();
        let report = engine.plan(&bug, &[]).unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.outcomes[0].success);
        assert_eq!(report.best, Some(1));
        assert_eq!(report.best_outcome().unwrap().strategy.pre_allocation_total(), 2);
        assert_eq!(
            report.assessment.recommendations,
            vec!["Ensure proper alignment of target objects"]
        );
    }

    #[test]
    fn no_candidates_yields_no_best() {
        let bug = BugDescriptor::new(BugKind::Overflow, 256).unwrap();
        let engine = GroomingEngine::new(
            &EngineConfig::default(),
            ObjectRegistry::default(),
            EligibilityTable::default(),
            LayoutCatalog::default(),
        )
        .unwrap();
        let report = engine.plan(&bug, &[]).unwrap();
        assert!(report.chains.is_empty());
        assert!(report.best.is_none());
        assert_eq!(report.assessment.factors, vec!["No suitable target objects found"]);
        assert_eq!(report.assessment.overall_permille, 0);
        assert!(report.codegen_plan().is_none());
    }

    #[test]
    fn registry_is_reclassified_with_engine_alignment() {
        let config = EngineConfig {
            alignment: 64,
            ..EngineConfig::default()
        };
        let buckets: Vec<_> = engine(&config).registry().iter().map(|o| o.bucket_size).collect();
        assert_eq!(buckets, vec![64, 64]);
    }
}
