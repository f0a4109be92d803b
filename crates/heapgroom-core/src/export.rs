//! JSON exports for downstream tools.
//!
//! [`CodegenPlan`] is what a script generator consumes: a flat, ordered step
//! list keyed by the chain fingerprint. [`VisualizerExport`] is a per-step
//! heap occupancy series rebuilt from a simulation's timeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chain::ExploitChain;
use crate::error::Result;
use crate::model::{
    AllocationRecord, AllocationSpec, FreelistEntry, FreelistState, GroomingStrategy,
    HeapSnapshot, SimulationResult, TimelineEntry, TimelineOp, TimelineResult, TriggerKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    Placement,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum CodegenStep {
    Allocate {
        phase: Phase,
        object_type: String,
        size: usize,
        count: usize,
    },
    Trigger {
        kind: TriggerKind,
        parameters: BTreeMap<String, String>,
    },
}

impl CodegenStep {
    fn allocate(phase: Phase, spec: &AllocationSpec) -> Self {
        Self::Allocate {
            phase,
            object_type: spec.object_type.clone(),
            size: spec.size,
            count: spec.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodegenPlan {
    pub chain_fingerprint: String,
    pub steps: Vec<CodegenStep>,
}

impl CodegenPlan {
    pub fn new(chain: &ExploitChain, strategy: &GroomingStrategy) -> Self {
        let mut steps = Vec::with_capacity(
            strategy.pre_allocations.len()
                + strategy.post_allocations.len()
                + strategy.triggers.len()
                + 1,
        );
        steps.extend(
            strategy
                .pre_allocations
                .iter()
                .map(|spec| CodegenStep::allocate(Phase::Pre, spec)),
        );
        steps.push(CodegenStep::allocate(Phase::Placement, &strategy.target_placement));
        steps.extend(
            strategy
                .post_allocations
                .iter()
                .map(|spec| CodegenStep::allocate(Phase::Post, spec)),
        );
        steps.extend(strategy.triggers.iter().map(|trigger| CodegenStep::Trigger {
            kind: trigger.kind,
            parameters: trigger.parameters.clone(),
        }));
        Self {
            chain_fingerprint: chain.fingerprint(),
            steps,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Occupancy series for the visualizer: `snapshots[i]` is the heap right
/// after `timeline[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizerExport {
    pub snapshots: Vec<HeapSnapshot>,
    pub timeline: Vec<TimelineEntry>,
}

impl VisualizerExport {
    /// Rebuilds per-step snapshots by replaying `result` over `initial`,
    /// the freelist the simulation started from.
    pub fn from_result(result: &SimulationResult, initial: &FreelistState) -> Self {
        let mut freelist = initial.clone();
        let mut records: Vec<AllocationRecord> = Vec::with_capacity(result.allocations.len());
        let mut snapshots = Vec::with_capacity(result.timeline.len());

        for entry in &result.timeline {
            match (&entry.operation, entry.result) {
                (
                    TimelineOp::Alloc { .. },
                    TimelineResult::Hit { address } | TimelineResult::Miss { address },
                ) => {
                    if let Some(record) = result
                        .allocations
                        .iter()
                        .find(|r| r.timestamp == entry.timestamp)
                    {
                        if matches!(entry.result, TimelineResult::Hit { .. }) {
                            freelist.remove_address(record.bucket_size, address);
                        }
                        records.push(AllocationRecord {
                            freed: false,
                            ..record.clone()
                        });
                    }
                }
                (TimelineOp::Free { address }, _) => {
                    if let Some(record) = records
                        .iter_mut()
                        .rev()
                        .find(|r| r.address == *address && !r.freed)
                    {
                        record.freed = true;
                        freelist.push_free(
                            record.bucket_size,
                            FreelistEntry {
                                address: *address,
                                size: record.requested_size,
                            },
                        );
                    }
                }
                _ => {}
            }
            snapshots.push(HeapSnapshot::capture(entry.timestamp, &records, &freelist));
        }

        Self {
            snapshots,
            timeline: result.timeline.clone(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketClassifier;
    use crate::chain::PayloadSpec;
    use crate::model::TriggerSpec;
    use crate::registry::{BugKind, VulnerableObjectDescriptor};
    use crate::simulator::HeapSimulator;

    fn uaf_chain() -> ExploitChain {
        let target =
            VulnerableObjectDescriptor::new("JSFunction", 64, &BucketClassifier::default()).unwrap();
        ExploitChain {
            kind: BugKind::UseAfterFree,
            bucket_size: 64,
            target,
            payload: PayloadSpec {
                object_type: "JSFunction".into(),
                size: 64,
                layout: Default::default(),
            },
            overflow_size: None,
        }
    }

    fn strategy() -> GroomingStrategy {
        GroomingStrategy {
            pre_allocations: vec![AllocationSpec::new("Array", 64, 5)],
            target_placement: AllocationSpec::new("JSFunction", 64, 1),
            post_allocations: vec![AllocationSpec::new("Array", 64, 3)],
            triggers: vec![TriggerSpec::timeout(100)],
        }
    }

    #[test]
    fn codegen_plan_shape() {
        let chain = uaf_chain();
        let plan = CodegenPlan::new(&chain, &strategy());
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["chain_fingerprint"], chain.fingerprint());
        let steps = json["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0]["op"], "allocate");
        assert_eq!(steps[0]["phase"], "pre");
        assert_eq!(steps[0]["count"], 5);
        assert_eq!(steps[1]["phase"], "placement");
        assert_eq!(steps[1]["object_type"], "JSFunction");
        assert_eq!(steps[2]["phase"], "post");
        assert_eq!(steps[3]["op"], "trigger");
        assert_eq!(steps[3]["kind"], "timeout");
        assert_eq!(steps[3]["parameters"]["delay_ms"], "100");
    }

    #[test]
    fn visualizer_replays_one_snapshot_per_step() {
        let mut initial = FreelistState::new();
        initial.push_free(64, FreelistEntry { address: 0x8000, size: 64 });
        let mut sim = HeapSimulator::new(BucketClassifier::default(), initial.clone());
        let a = sim.allocate("Array", 64).unwrap();
        let b = sim.allocate("Array", 64).unwrap();
        sim.free(b).unwrap();
        sim.allocate("JSFunction", 60).unwrap();
        sim.free(a).unwrap();
        let last = sim.snapshot();
        let (result, _, _) = sim.finish();

        let export = VisualizerExport::from_result(&result, &initial);
        assert_eq!(export.snapshots.len(), export.timeline.len());
        let occupancy: Vec<_> = export
            .snapshots
            .iter()
            .map(|s| (s.buckets[&64].occupied, s.buckets[&64].free))
            .collect();
        assert_eq!(occupancy, vec![(1, 0), (2, 0), (1, 1), (2, 0), (1, 1)]);
        assert_eq!(export.snapshots.last(), Some(&last));
    }

    #[test]
    fn visualizer_json_shape() {
        let mut sim = HeapSimulator::new(BucketClassifier::default(), FreelistState::new());
        sim.run(&strategy()).unwrap();
        let (result, _, _) = sim.finish();
        let export = VisualizerExport::from_result(&result, &FreelistState::new());
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["snapshots"].as_array().unwrap().len(), 10);
        assert_eq!(json["snapshots"][8]["buckets"]["64"]["occupied"], 9);
        assert_eq!(json["snapshots"][8]["total_allocated"], 9 * 64);
        assert_eq!(json["timeline"][9]["operation"]["op"], "trigger");
    }
}
