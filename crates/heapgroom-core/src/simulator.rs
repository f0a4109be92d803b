//! Private heap model used to replay grooming strategies.
//!
//! Each simulator owns its freelist, record log and clock outright; callers
//! that want to try several strategies against the same starting heap clone
//! the initial [`FreelistState`] into one simulator per strategy.

use std::collections::BTreeMap;

use crate::bucket::{BucketClassifier, BucketSize};
use crate::error::{GroomError, Result};
use crate::log::{EngineLogLevel, EngineLogRecord, LifecycleLog, LogCounters, LogEvent};
use crate::model::{
    Address, AllocationRecord, AllocationSpec, FreelistEntry, FreelistState, GroomingStrategy,
    HeapSnapshot, SimulationResult, TimelineEntry, TimelineOp, TimelineResult, TriggerSpec,
};

/// First address handed out for fresh (non-reused) chunks.
pub const FRESH_BASE: Address = 0x1000;

#[derive(Debug, Clone)]
pub struct HeapSimulator {
    classifier: BucketClassifier,
    freelist: FreelistState,
    records: Vec<AllocationRecord>,
    /// Address → index into `records` of the live allocation at that address.
    live: BTreeMap<Address, usize>,
    timeline: Vec<TimelineEntry>,
    clock: u64,
    next_fresh: Address,
    hits: u64,
    misses: u64,
    log: LifecycleLog,
}

impl HeapSimulator {
    pub fn new(classifier: BucketClassifier, initial: FreelistState) -> Self {
        // Reused chunks keep their addresses; keep fresh ones clear of them.
        let next_fresh = initial
            .buckets()
            .flat_map(|(bucket, list)| {
                list.iter()
                    .map(move |entry| entry.address.saturating_add(bucket))
            })
            .filter(|&end| end < usize::MAX / 2)
            .fold(FRESH_BASE, Address::max);
        Self {
            classifier,
            freelist: initial,
            records: Vec::new(),
            live: BTreeMap::new(),
            timeline: Vec::new(),
            clock: 0,
            next_fresh,
            hits: 0,
            misses: 0,
            log: LifecycleLog::new("simulator"),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn counters(&self) -> LogCounters {
        LogCounters {
            freelist_total: self.freelist.total_entries(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    /// Allocates one `object_type` of `size` bytes.
    ///
    /// Reuses the first freelist entry in the size's bucket with enough
    /// capacity; otherwise carves a fresh chunk.
    pub fn allocate(&mut self, object_type: &str, size: usize) -> Result<Address> {
        let bucket = self.classifier.bucket_of(size)?;
        let timestamp = self.tick();
        let (address, result, level, outcome) = match self.freelist.take_first_fit(bucket, size) {
            Some(entry) => {
                self.hits += 1;
                let address = entry.address;
                (address, TimelineResult::Hit { address }, EngineLogLevel::Trace, "hit")
            }
            None => {
                let address = self.carve(bucket)?;
                self.misses += 1;
                (address, TimelineResult::Miss { address }, EngineLogLevel::Debug, "miss")
            }
        };
        self.log.record(
            LogEvent::new(level, "alloc", outcome)
                .at(Some(address), Some(size), Some(bucket))
                .details(format!("type={object_type} t={timestamp}")),
            self.counters(),
        );

        self.live.insert(address, self.records.len());
        self.records.push(AllocationRecord {
            address,
            requested_size: size,
            bucket_size: bucket,
            object_type: object_type.to_string(),
            timestamp,
            freed: false,
        });
        self.timeline.push(TimelineEntry {
            timestamp,
            operation: TimelineOp::Alloc {
                object_type: object_type.to_string(),
                size,
            },
            result,
        });
        Ok(address)
    }

    fn carve(&mut self, bucket: BucketSize) -> Result<Address> {
        let address = self.next_fresh;
        self.next_fresh = address
            .checked_add(bucket)
            .ok_or_else(|| GroomError::invalid_input("fresh address", address))?;
        Ok(address)
    }

    /// Frees the live allocation at `address`, appending it to its bucket's freelist.
    pub fn free(&mut self, address: Address) -> Result<()> {
        let Some(index) = self.live.remove(&address) else {
            let reason = if self.records.iter().any(|r| r.address == address) {
                format!("double free of {address:#x}")
            } else {
                format!("free of unknown address {address:#x}")
            };
            self.log.record(
                LogEvent::new(EngineLogLevel::Error, "free", "rejected")
                    .at(Some(address), None, None)
                    .details(reason.clone()),
                self.counters(),
            );
            return Err(GroomError::invalid_operation(self.timeline.len(), reason));
        };
        let timestamp = self.tick();
        let record = &mut self.records[index];
        record.freed = true;
        let bucket = record.bucket_size;
        // Entries keep the freed request size, as trace replay does.
        let size = record.requested_size;
        self.freelist.push_free(bucket, FreelistEntry { address, size });
        self.timeline.push(TimelineEntry {
            timestamp,
            operation: TimelineOp::Free { address },
            result: TimelineResult::Freed { address },
        });
        self.log.record(
            LogEvent::new(EngineLogLevel::Trace, "free", "appended")
                .at(Some(address), Some(size), Some(bucket))
                .details(format!("bucket_len={}", self.freelist.len_in(bucket))),
            self.counters(),
        );
        Ok(())
    }

    /// Records a trigger. The model has no collector, so the heap is unchanged.
    pub fn trigger(&mut self, trigger: &TriggerSpec) {
        let timestamp = self.tick();
        self.timeline.push(TimelineEntry {
            timestamp,
            operation: TimelineOp::Trigger { kind: trigger.kind },
            result: TimelineResult::Triggered,
        });
        let details = trigger
            .parameters
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        self.log.record(
            LogEvent::new(EngineLogLevel::Info, "trigger", "recorded")
                .details(format!("kind={} {details}", trigger.kind).trim_end().to_string()),
            self.counters(),
        );
    }

    fn allocate_spec(&mut self, spec: &AllocationSpec) -> Result<()> {
        for _ in 0..spec.count {
            self.allocate(&spec.object_type, spec.size)?;
        }
        Ok(())
    }

    /// Replays pre-allocations, the placement, post-allocations, then triggers.
    pub fn run(&mut self, strategy: &GroomingStrategy) -> Result<()> {
        for spec in &strategy.pre_allocations {
            self.allocate_spec(spec)?;
        }
        self.allocate_spec(&strategy.target_placement)?;
        for spec in &strategy.post_allocations {
            self.allocate_spec(spec)?;
        }
        for trigger in &strategy.triggers {
            self.trigger(trigger);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot::capture(self.clock, &self.records, &self.freelist)
    }

    pub fn freelist(&self) -> &FreelistState {
        &self.freelist
    }

    pub fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    pub fn log(&self) -> &[EngineLogRecord] {
        self.log.records()
    }

    /// Consumes the simulator, returning its result, final freelist and log.
    pub fn finish(self) -> (SimulationResult, FreelistState, Vec<EngineLogRecord>) {
        (
            SimulationResult {
                allocations: self.records,
                timeline: self.timeline,
            },
            self.freelist,
            self.log.into_records(),
        )
    }
}
