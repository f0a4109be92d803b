//! Grooming strategy synthesis and evaluation.
//!
//! A synthesized strategy fills the chain's bucket, places the payload, then
//! plugs the bucket again. Success is positional: with FIFO freelist growth
//! and first-fit reuse, the placement is the allocation right after the
//! pre-allocations, so `allocations[pre_total]` must be the target object.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bucket::{BucketClassifier, BucketSize};
use crate::chain::ExploitChain;
use crate::config::GroomingPolicy;
use crate::error::Result;
use crate::log::EngineLogRecord;
use crate::model::{
    AllocationSpec, FreelistState, GroomingStrategy, HeapSnapshot, SimulationResult, TriggerSpec,
};
use crate::registry::BugKind;
use crate::simulator::HeapSimulator;

/// One simulated (chain, strategy) pair and its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationOutcome {
    pub chain: ExploitChain,
    pub strategy: GroomingStrategy,
    pub result: SimulationResult,
    pub success: bool,
    pub final_freelist: FreelistState,
    pub final_snapshot: HeapSnapshot,
    #[serde(skip)]
    pub log: Vec<EngineLogRecord>,
}

impl SimulationOutcome {
    pub fn target_bucket(&self) -> BucketSize {
        self.chain.bucket_size
    }

    /// Freelist entries left in the target bucket after the run.
    pub fn unconsumed_in_target(&self) -> usize {
        self.final_freelist.len_in(self.target_bucket())
    }
}

#[derive(Debug, Clone)]
pub struct StrategySynthesizer {
    policy: GroomingPolicy,
    classifier: BucketClassifier,
}

impl StrategySynthesizer {
    pub fn new(policy: GroomingPolicy, classifier: BucketClassifier) -> Self {
        Self { policy, classifier }
    }

    /// Fill, place, plug.
    ///
    /// An overflow longer than the target gets a second pre-allocation
    /// filler sized to the excess, so the bytes written past the target land
    /// in filler objects.
    pub fn synthesize(&self, chain: &ExploitChain) -> GroomingStrategy {
        let filler = |size, count| AllocationSpec::new(&self.policy.filler_type, size, count);
        let mut pre_allocations = vec![filler(chain.bucket_size, self.policy.pre_allocation_count)];
        if let Some(excess) = chain
            .overflow_size
            .and_then(|size| size.checked_sub(chain.target.size))
            .filter(|&excess| excess > 0)
        {
            pre_allocations.push(filler(excess, self.policy.pre_allocation_count));
        }
        let mut strategy = GroomingStrategy {
            pre_allocations,
            target_placement: AllocationSpec::new(
                &chain.payload.object_type,
                chain.payload.size,
                1,
            ),
            post_allocations: vec![filler(chain.bucket_size, self.policy.post_allocation_count)],
            triggers: Vec::new(),
        };
        if self.policy.gc_on_use_after_free && chain.kind == BugKind::UseAfterFree {
            strategy = strategy.with_trigger(TriggerSpec::gc());
        }
        if let Some(name) = &self.policy.trigger_event {
            strategy = strategy.with_trigger(TriggerSpec::event(name.as_str()));
        }
        strategy
    }

    /// Whether the allocation right after `strategy`'s pre-allocations is
    /// the target object.
    pub fn evaluate(
        result: &SimulationResult,
        chain: &ExploitChain,
        strategy: &GroomingStrategy,
    ) -> bool {
        Self::evaluate_at(result, chain, strategy.pre_allocation_total())
    }

    /// Positional check at `pre_total`, the number of pre-allocations the run
    /// issued. A target at any other index does not count.
    pub fn evaluate_at(result: &SimulationResult, chain: &ExploitChain, pre_total: usize) -> bool {
        result.allocations.get(pre_total).is_some_and(|record| {
            record.object_type == chain.target.object_type
                && record.requested_size == chain.target.size
        })
    }

    /// Runs one strategy on a private simulator seeded with `initial`.
    pub fn simulate(
        &self,
        chain: &ExploitChain,
        strategy: &GroomingStrategy,
        initial: &FreelistState,
    ) -> Result<SimulationOutcome> {
        let mut simulator = HeapSimulator::new(self.classifier.clone(), initial.clone());
        simulator.run(strategy)?;
        let final_snapshot = simulator.snapshot();
        let (result, final_freelist, log) = simulator.finish();
        let success = Self::evaluate(&result, chain, strategy);
        Ok(SimulationOutcome {
            chain: chain.clone(),
            strategy: strategy.clone(),
            result,
            success,
            final_freelist,
            final_snapshot,
            log,
        })
    }

    /// Simulates every candidate in parallel; output order matches input order.
    pub fn simulate_all(
        &self,
        candidates: &[(ExploitChain, GroomingStrategy)],
        initial: &FreelistState,
    ) -> Result<Vec<SimulationOutcome>> {
        candidates
            .par_iter()
            .map(|(chain, strategy)| self.simulate(chain, strategy, initial))
            .collect()
    }

    /// First successful outcome, else the one leaving the fewest entries in
    /// its target bucket. Ties go to the earliest outcome.
    pub fn select_best(outcomes: &[SimulationOutcome]) -> Option<&SimulationOutcome> {
        if let Some(success) = outcomes.iter().find(|outcome| outcome.success) {
            return Some(success);
        }
        outcomes
            .iter()
            .enumerate()
            .min_by_key(|(index, outcome)| (outcome.unconsumed_in_target(), *index))
            .map(|(_, outcome)| outcome)
    }
}

/// Named strategies known to work on a target, tried after the synthesized one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternRegistry {
    patterns: BTreeMap<String, Vec<GroomingStrategy>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{"name": [strategy, ...], ...}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Adds `strategy` under `name`; a name may hold several strategies.
    pub fn register_pattern(&mut self, name: impl Into<String>, strategy: GroomingStrategy) {
        self.patterns.entry(name.into()).or_default().push(strategy);
    }

    /// Strategies with any allocation step of exactly `size` bytes, by name
    /// and then registration order.
    pub fn patterns_for_size(&self, size: usize) -> Vec<&GroomingStrategy> {
        self.patterns
            .values()
            .flatten()
            .filter(|strategy| {
                strategy
                    .pre_allocations
                    .iter()
                    .chain(std::iter::once(&strategy.target_placement))
                    .chain(&strategy.post_allocations)
                    .any(|spec| spec.size == size)
            })
            .collect()
    }
}
