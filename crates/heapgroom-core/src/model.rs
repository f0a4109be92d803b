//! Heap state model.
//!
//! Passive data shared by every component: allocation records, per-bucket
//! freelists, grooming strategies, simulation timelines and heap snapshots.
//! Nothing here decides policy; the analyzer and the simulator own the only
//! mutable instances.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bucket::BucketSize;

/// Opaque allocation handle. Compared for equality only.
pub type Address = usize;

/// One simulated allocation. Never removed; `freed` flips on free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub address: Address,
    pub requested_size: usize,
    pub bucket_size: BucketSize,
    pub object_type: String,
    /// Monotonic counter, not wall-clock time.
    pub timestamp: u64,
    #[serde(default)]
    pub freed: bool,
}

/// A freed chunk waiting for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreelistEntry {
    pub address: Address,
    pub size: usize,
}

/// Per-bucket freelists.
///
/// Frees append to the tail; reuse scans from the head for the first entry
/// with enough capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreelistState {
    buckets: BTreeMap<BucketSize, VecDeque<FreelistEntry>>,
}

impl FreelistState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a freed chunk to the tail of `bucket`'s list.
    pub fn push_free(&mut self, bucket: BucketSize, entry: FreelistEntry) {
        self.buckets.entry(bucket).or_default().push_back(entry);
    }

    /// Removes and returns the first entry in `bucket` with `size >= requested`.
    pub fn take_first_fit(&mut self, bucket: BucketSize, requested: usize) -> Option<FreelistEntry> {
        let list = self.buckets.get_mut(&bucket)?;
        let pos = list.iter().position(|entry| entry.size >= requested)?;
        list.remove(pos)
    }

    /// Removes the entry for `address` from `bucket`, wherever it sits.
    pub fn remove_address(&mut self, bucket: BucketSize, address: Address) -> Option<FreelistEntry> {
        let list = self.buckets.get_mut(&bucket)?;
        let pos = list.iter().position(|entry| entry.address == address)?;
        list.remove(pos)
    }

    /// Entries currently queued in `bucket`.
    pub fn entries(&self, bucket: BucketSize) -> impl Iterator<Item = &FreelistEntry> {
        self.buckets.get(&bucket).into_iter().flatten()
    }

    pub fn len_in(&self, bucket: BucketSize) -> usize {
        self.buckets.get(&bucket).map_or(0, VecDeque::len)
    }

    pub fn total_entries(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_entries() == 0
    }

    /// Buckets that have ever held an entry, in ascending size order.
    pub fn buckets(&self) -> impl Iterator<Item = (BucketSize, &VecDeque<FreelistEntry>)> {
        self.buckets.iter().map(|(&bucket, list)| (bucket, list))
    }
}

/// `count` allocations of `object_type` with `size` bytes each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSpec {
    pub object_type: String,
    pub size: usize,
    pub count: usize,
}

impl AllocationSpec {
    pub fn new(object_type: impl Into<String>, size: usize, count: usize) -> Self {
        Self {
            object_type: object_type.into(),
            size,
            count,
        }
    }
}

/// What the host should do between allocation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Gc,
    Timeout,
    Event,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gc => "gc",
            Self::Timeout => "timeout",
            Self::Event => "event",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub kind: TriggerKind,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TriggerSpec {
    /// Forces a collection pass.
    pub fn gc() -> Self {
        Self {
            kind: TriggerKind::Gc,
            parameters: BTreeMap::new(),
        }
    }

    pub fn timeout(delay_ms: u64) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("delay_ms".to_string(), delay_ms.to_string());
        Self {
            kind: TriggerKind::Timeout,
            parameters,
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("name".to_string(), name.into());
        Self {
            kind: TriggerKind::Event,
            parameters,
        }
    }
}

/// Ordered grooming plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroomingStrategy {
    pub pre_allocations: Vec<AllocationSpec>,
    pub target_placement: AllocationSpec,
    pub post_allocations: Vec<AllocationSpec>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
}

impl GroomingStrategy {
    /// Appends a trigger after the post-allocation phase.
    #[must_use]
    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Number of individual allocations issued before the placement.
    pub fn pre_allocation_total(&self) -> usize {
        self.pre_allocations.iter().map(|spec| spec.count).sum()
    }

    /// Number of individual allocations issued by the whole strategy.
    pub fn allocation_total(&self) -> usize {
        self.pre_allocation_total()
            + self.target_placement.count
            + self.post_allocations.iter().map(|spec| spec.count).sum::<usize>()
    }
}

impl fmt::Display for GroomingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pre-allocations:")?;
        for spec in &self.pre_allocations {
            writeln!(
                f,
                "- allocate {} {}(s) of size {}",
                spec.count, spec.object_type, spec.size
            )?;
        }
        writeln!(f, "Placement:")?;
        writeln!(
            f,
            "- allocate {} {}(s) of size {}",
            self.target_placement.count,
            self.target_placement.object_type,
            self.target_placement.size
        )?;
        writeln!(f, "Post-allocations:")?;
        for spec in &self.post_allocations {
            writeln!(
                f,
                "- allocate {} {}(s) of size {}",
                spec.count, spec.object_type, spec.size
            )?;
        }
        write!(f, "Triggers:")?;
        if self.triggers.is_empty() {
            write!(f, "\n- none")?;
        }
        for trigger in &self.triggers {
            write!(f, "\n- {}", trigger.kind)?;
            for (key, value) in &trigger.parameters {
                write!(f, " {key}={value}")?;
            }
        }
        Ok(())
    }
}

/// Operation recorded in a simulation timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TimelineOp {
    Alloc { object_type: String, size: usize },
    Free { address: Address },
    Trigger { kind: TriggerKind },
}

/// What the modeled allocator did for a timeline operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum TimelineResult {
    /// Served from the bucket's freelist.
    Hit { address: Address },
    /// Carved from fresh memory.
    Miss { address: Address },
    Freed { address: Address },
    Triggered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: u64,
    pub operation: TimelineOp,
    pub result: TimelineResult,
}

/// Outcome of replaying a strategy against the heap model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub allocations: Vec<AllocationRecord>,
    pub timeline: Vec<TimelineEntry>,
}

/// Free/occupied chunk counts for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOccupancy {
    pub free: usize,
    pub occupied: usize,
}

/// Point-in-time view of the heap for the visualizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapSnapshot {
    pub timestamp: u64,
    pub buckets: BTreeMap<BucketSize, BucketOccupancy>,
    /// Bucket bytes held by live records.
    pub total_allocated: usize,
    /// Bytes queued on freelists.
    pub total_free: usize,
}

impl HeapSnapshot {
    /// Builds a snapshot from a record log and the freelist it produced.
    pub fn capture(timestamp: u64, records: &[AllocationRecord], freelist: &FreelistState) -> Self {
        let mut snapshot = Self {
            timestamp,
            ..Self::default()
        };
        for record in records.iter().filter(|r| !r.freed) {
            snapshot.buckets.entry(record.bucket_size).or_default().occupied += 1;
            snapshot.total_allocated += record.bucket_size;
        }
        for (bucket, list) in freelist.buckets() {
            if list.is_empty() {
                continue;
            }
            snapshot.buckets.entry(bucket).or_default().free += list.len();
            snapshot.total_free += list.iter().map(|entry| entry.size).sum::<usize>();
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(address: Address, size: usize) -> FreelistEntry {
        FreelistEntry { address, size }
    }

    #[test]
    fn first_fit_scans_by_capacity_not_position() {
        let mut state = FreelistState::new();
        state.push_free(64, entry(0x100, 40));
        state.push_free(64, entry(0x200, 64));
        state.push_free(64, entry(0x300, 64));

        let hit = state.take_first_fit(64, 50).unwrap();
        assert_eq!(hit.address, 0x200);
        assert_eq!(state.len_in(64), 2);

        let addresses: Vec<_> = state.entries(64).map(|e| e.address).collect();
        assert_eq!(addresses, vec![0x100, 0x300]);
    }

    #[test]
    fn first_fit_misses_on_unknown_bucket() {
        let mut state = FreelistState::new();
        assert!(state.take_first_fit(128, 100).is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn strategy_counts() {
        let strategy = GroomingStrategy {
            pre_allocations: vec![AllocationSpec::new("Array", 64, 5)],
            target_placement: AllocationSpec::new("JSFunction", 64, 1),
            post_allocations: vec![AllocationSpec::new("Array", 64, 3)],
            triggers: Vec::new(),
        };
        assert_eq!(strategy.pre_allocation_total(), 5);
        assert_eq!(strategy.allocation_total(), 9);
    }

    #[test]
    fn strategy_description_lists_every_phase() {
        let strategy = GroomingStrategy {
            pre_allocations: vec![AllocationSpec::new("Array", 64, 5)],
            target_placement: AllocationSpec::new("JSFunction", 64, 1),
            post_allocations: vec![AllocationSpec::new("Array", 64, 3)],
            triggers: Vec::new(),
        }
        .with_trigger(TriggerSpec::timeout(250));
        let text = strategy.to_string();
        assert!(text.contains("- allocate 5 Array(s) of size 64"));
        assert!(text.contains("- allocate 1 JSFunction(s) of size 64"));
        assert!(text.contains("- timeout delay_ms=250"));
    }

    #[test]
    fn snapshot_counts_live_and_free() {
        let records = vec![
            AllocationRecord {
                address: 0x1000,
                requested_size: 40,
                bucket_size: 48,
                object_type: "Array".into(),
                timestamp: 1,
                freed: false,
            },
            AllocationRecord {
                address: 0x1030,
                requested_size: 48,
                bucket_size: 48,
                object_type: "Array".into(),
                timestamp: 2,
                freed: true,
            },
        ];
        let mut freelist = FreelistState::new();
        freelist.push_free(48, entry(0x1030, 48));

        let snapshot = HeapSnapshot::capture(3, &records, &freelist);
        assert_eq!(snapshot.buckets[&48], BucketOccupancy { free: 1, occupied: 1 });
        assert_eq!(snapshot.total_allocated, 48);
        assert_eq!(snapshot.total_free, 48);
    }

    #[test]
    fn timeline_serializes_tagged() {
        let entry = TimelineEntry {
            timestamp: 4,
            operation: TimelineOp::Alloc {
                object_type: "Array".into(),
                size: 64,
            },
            result: TimelineResult::Hit { address: 0x40 },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["operation"]["op"], "alloc");
        assert_eq!(json["result"]["result"], "hit");
        assert_eq!(json["result"]["address"], 0x40);
    }
}
