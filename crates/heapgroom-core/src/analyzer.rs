//! Allocator analyzer.
//!
//! Consumes allocation traces and derives:
//! - the append-only allocation record log,
//! - slot-size frequencies (with a noise filter),
//! - a replayed per-bucket freelist with per-operation hit/miss outcomes,
//! - reuse statistics, free→realloc pairs, slot statistics and the observed
//!   request-size range of every bucket.
//!
//! The analyzer holds configuration only. Every call takes its input and
//! returns fresh state, so concurrent callers never share a freelist.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::bucket::{BucketClassifier, BucketSize, natural_alignment};
use crate::config::EngineConfig;
use crate::error::{GroomError, Result};
use crate::log::{EngineLogLevel, EngineLogRecord, LifecycleLog, LogCounters, LogEvent};
use crate::model::{Address, AllocationRecord, FreelistEntry, FreelistState};

/// Handles for allocations whose trace record carried no address start here,
/// well above anything a capture tool reports.
pub const SYNTHETIC_HANDLE_BASE: Address = usize::MAX / 2 + 1;

/// Trace record as delivered by the capture collaborator, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTraceEvent {
    #[serde(rename = "type", alias = "object_type")]
    pub object_type: String,
    pub size: i64,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceAction {
    Alloc,
    Free,
}

/// Validated trace operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub object_type: String,
    pub size: usize,
    pub action: TraceAction,
    pub address: Option<Address>,
    pub timestamp: u64,
}

impl TraceEvent {
    pub fn alloc(object_type: impl Into<String>, size: usize, address: Option<Address>) -> Self {
        Self {
            object_type: object_type.into(),
            size,
            action: TraceAction::Alloc,
            address,
            timestamp: 0,
        }
    }

    pub fn free(object_type: impl Into<String>, size: usize, address: Address) -> Self {
        Self {
            object_type: object_type.into(),
            size,
            action: TraceAction::Free,
            address: Some(address),
            timestamp: 0,
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn check(&self, index: usize) -> Result<()> {
        if self.size == 0 {
            return Err(GroomError::invalid_operation(index, "size must be positive"));
        }
        if self.action == TraceAction::Free && self.address.is_none() {
            return Err(GroomError::invalid_operation(index, "free without address"));
        }
        Ok(())
    }
}

/// Validates raw records into typed events.
///
/// Missing timestamps default to the record's index.
pub fn parse_trace(raw: &[RawTraceEvent]) -> Result<Vec<TraceEvent>> {
    raw.iter()
        .enumerate()
        .map(|(index, record)| {
            if record.size <= 0 {
                return Err(GroomError::invalid_operation(
                    index,
                    format!("size must be positive, got {}", record.size),
                ));
            }
            let action = match record.action.to_ascii_lowercase().as_str() {
                "alloc" => TraceAction::Alloc,
                "free" => TraceAction::Free,
                other => {
                    return Err(GroomError::invalid_operation(
                        index,
                        format!("unknown action '{other}'"),
                    ));
                }
            };
            let size = usize::try_from(record.size)
                .map_err(|_| GroomError::invalid_operation(index, "size out of range"))?;
            let event = TraceEvent {
                object_type: record.object_type.clone(),
                size,
                action,
                address: record.address,
                timestamp: record.timestamp.unwrap_or(index as u64),
            };
            event.check(index)?;
            Ok(event)
        })
        .collect()
}

/// Result of one freelist replay step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    pub index: usize,
    pub action: TraceAction,
    pub bucket: BucketSize,
    pub address: Option<Address>,
    /// `Some(true)` for a freelist hit, `Some(false)` for a miss, `None` for frees.
    pub hit: Option<bool>,
}

/// Replayed freelist state plus everything observed on the way.
#[derive(Debug, Clone, Serialize)]
pub struct FreelistReplay {
    pub state: FreelistState,
    pub outcomes: Vec<ReplayOutcome>,
    pub hits: u64,
    pub misses: u64,
    pub frees: u64,
    pub log: Vec<EngineLogRecord>,
}

/// Address reuse within one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReuseStats {
    pub total_allocations: usize,
    pub unique_addresses: usize,
    /// `(total - unique) / total`, in permille.
    pub reuse_permille: u16,
}

/// A free and the first later allocation that got the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReusePair {
    pub free_index: usize,
    pub alloc_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStatistics {
    pub count: usize,
    pub alignment: usize,
    pub occupied_chunks: usize,
    pub free_chunks: usize,
}

/// Smallest and largest request observed in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeRange {
    pub min: usize,
    pub max: usize,
}

/// Everything the analyzer derives from one trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceAnalysis {
    pub records: Vec<AllocationRecord>,
    pub slot_sizes: BTreeMap<BucketSize, usize>,
    pub slot_statistics: BTreeMap<BucketSize, SlotStatistics>,
    pub reuse_patterns: BTreeMap<BucketSize, ReuseStats>,
    pub reuse_pairs: BTreeMap<BucketSize, Vec<ReusePair>>,
    pub bucket_boundaries: BTreeMap<BucketSize, SizeRange>,
    pub replay: FreelistReplay,
}

/// Stateless trace analyzer.
#[derive(Debug, Clone)]
pub struct AllocatorAnalyzer {
    classifier: BucketClassifier,
    noise_threshold_permille: u16,
}

impl AllocatorAnalyzer {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            classifier: config.classifier()?,
            noise_threshold_permille: config.slot_noise_threshold_permille,
        })
    }

    pub fn classifier(&self) -> &BucketClassifier {
        &self.classifier
    }

    /// Builds the append-only record log for a trace.
    ///
    /// A free flips `freed` on the most recent live record with the same
    /// address; frees of addresses with no live record leave the log alone.
    pub fn records_from_trace(&self, events: &[TraceEvent]) -> Result<Vec<AllocationRecord>> {
        let mut records: Vec<AllocationRecord> = Vec::new();
        let mut live: BTreeMap<Address, usize> = BTreeMap::new();

        for (index, event) in events.iter().enumerate() {
            event.check(index)?;
            match event.action {
                TraceAction::Alloc => {
                    let address = event
                        .address
                        .unwrap_or(SYNTHETIC_HANDLE_BASE.wrapping_add(index));
                    live.insert(address, records.len());
                    records.push(AllocationRecord {
                        address,
                        requested_size: event.size,
                        bucket_size: self.classifier.bucket_of(event.size)?,
                        object_type: event.object_type.clone(),
                        timestamp: event.timestamp,
                        freed: false,
                    });
                }
                TraceAction::Free => {
                    let Some(address) = event.address else {
                        continue;
                    };
                    if let Some(slot) = live.remove(&address) {
                        records[slot].freed = true;
                    }
                }
            }
        }
        Ok(records)
    }

    /// Per-bucket allocation counts, keeping buckets above the noise threshold.
    pub fn infer_slot_sizes(
        &self,
        records: &[AllocationRecord],
    ) -> Result<BTreeMap<BucketSize, usize>> {
        let mut counts: BTreeMap<BucketSize, usize> = BTreeMap::new();
        for record in records {
            *counts
                .entry(self.classifier.bucket_of(record.requested_size)?)
                .or_default() += 1;
        }
        let total = records.len();
        let threshold = usize::from(self.noise_threshold_permille);
        counts.retain(|_, &mut count| count.saturating_mul(1000) > total.saturating_mul(threshold));
        Ok(counts)
    }

    /// Replays `events` against an empty freelist.
    pub fn simulate_freelist(&self, events: &[TraceEvent]) -> Result<FreelistReplay> {
        self.simulate_freelist_from(FreelistState::new(), events)
    }

    /// Replays `events` starting from `initial`.
    ///
    /// Frees append to the tail of their bucket. Allocations take the first
    /// entry with enough capacity (hit) or leave the state untouched (miss).
    pub fn simulate_freelist_from(
        &self,
        initial: FreelistState,
        events: &[TraceEvent],
    ) -> Result<FreelistReplay> {
        let mut state = initial;
        let mut log = LifecycleLog::new("replay");
        let mut outcomes = Vec::with_capacity(events.len());
        let (mut hits, mut misses, mut frees) = (0u64, 0u64, 0u64);

        for (index, event) in events.iter().enumerate() {
            event.check(index)?;
            let bucket = self.classifier.bucket_of(event.size)?;
            let outcome = match event.action {
                TraceAction::Alloc => match state.take_first_fit(bucket, event.size) {
                    Some(entry) => {
                        hits += 1;
                        log.record(
                            LogEvent::new(EngineLogLevel::Trace, "alloc", "hit")
                                .at(Some(entry.address), Some(event.size), Some(bucket))
                                .details(format!("index={index} type={}", event.object_type)),
                            LogCounters {
                                freelist_total: state.total_entries(),
                                hits,
                                misses,
                            },
                        );
                        ReplayOutcome {
                            index,
                            action: TraceAction::Alloc,
                            bucket,
                            address: Some(entry.address),
                            hit: Some(true),
                        }
                    }
                    None => {
                        misses += 1;
                        log.record(
                            LogEvent::new(EngineLogLevel::Debug, "alloc", "miss")
                                .at(event.address, Some(event.size), Some(bucket))
                                .details(format!(
                                    "index={index} type={} bucket_len={}",
                                    event.object_type,
                                    state.len_in(bucket)
                                )),
                            LogCounters {
                                freelist_total: state.total_entries(),
                                hits,
                                misses,
                            },
                        );
                        ReplayOutcome {
                            index,
                            action: TraceAction::Alloc,
                            bucket,
                            address: event.address,
                            hit: Some(false),
                        }
                    }
                },
                TraceAction::Free => {
                    let address = event
                        .address
                        .ok_or_else(|| GroomError::invalid_operation(index, "free without address"))?;
                    state.push_free(
                        bucket,
                        FreelistEntry {
                            address,
                            size: event.size,
                        },
                    );
                    frees += 1;
                    log.record(
                        LogEvent::new(EngineLogLevel::Trace, "free", "appended")
                            .at(Some(address), Some(event.size), Some(bucket))
                            .details(format!("index={index} bucket_len={}", state.len_in(bucket))),
                        LogCounters {
                            freelist_total: state.total_entries(),
                            hits,
                            misses,
                        },
                    );
                    ReplayOutcome {
                        index,
                        action: TraceAction::Free,
                        bucket,
                        address: Some(address),
                        hit: None,
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(FreelistReplay {
            state,
            outcomes,
            hits,
            misses,
            frees,
            log: log.into_records(),
        })
    }

    /// Address reuse per bucket, for buckets with at least two allocations.
    pub fn detect_reuse_patterns(
        &self,
        records: &[AllocationRecord],
    ) -> Result<BTreeMap<BucketSize, ReuseStats>> {
        let mut by_bucket: BTreeMap<BucketSize, Vec<Address>> = BTreeMap::new();
        for record in records {
            by_bucket
                .entry(self.classifier.bucket_of(record.requested_size)?)
                .or_default()
                .push(record.address);
        }

        Ok(by_bucket
            .into_iter()
            .filter(|(_, addresses)| addresses.len() >= 2)
            .map(|(bucket, addresses)| {
                let total = addresses.len();
                let unique = addresses.iter().collect::<BTreeSet<_>>().len();
                let reuse_permille = ((total - unique) * 1000 / total) as u16;
                (
                    bucket,
                    ReuseStats {
                        total_allocations: total,
                        unique_addresses: unique,
                        reuse_permille,
                    },
                )
            })
            .collect())
    }

    /// For every free, the first later allocation that reused its address.
    pub fn reuse_pairs(&self, events: &[TraceEvent]) -> Result<BTreeMap<BucketSize, Vec<ReusePair>>> {
        let mut pairs: BTreeMap<BucketSize, Vec<ReusePair>> = BTreeMap::new();
        for (free_index, event) in events.iter().enumerate() {
            event.check(free_index)?;
            if event.action != TraceAction::Free {
                continue;
            }
            let reused = events
                .iter()
                .enumerate()
                .skip(free_index + 1)
                .find(|(_, later)| later.action == TraceAction::Alloc && later.address == event.address);
            if let Some((alloc_index, _)) = reused {
                pairs
                    .entry(self.classifier.bucket_of(event.size)?)
                    .or_default()
                    .push(ReusePair {
                        free_index,
                        alloc_index,
                    });
            }
        }
        Ok(pairs)
    }

    /// Allocation counts and end-of-trace chunk occupancy per bucket.
    pub fn slot_statistics(
        &self,
        events: &[TraceEvent],
    ) -> Result<BTreeMap<BucketSize, SlotStatistics>> {
        #[derive(Default)]
        struct Tally {
            count: usize,
            occupied: BTreeSet<Address>,
            free: BTreeSet<Address>,
        }

        let mut tallies: BTreeMap<BucketSize, Tally> = BTreeMap::new();
        for (index, event) in events.iter().enumerate() {
            event.check(index)?;
            let tally = tallies
                .entry(self.classifier.bucket_of(event.size)?)
                .or_default();
            match (event.action, event.address) {
                (TraceAction::Alloc, address) => {
                    tally.count += 1;
                    if let Some(address) = address {
                        tally.free.remove(&address);
                        tally.occupied.insert(address);
                    }
                }
                (TraceAction::Free, Some(address)) => {
                    if tally.occupied.remove(&address) {
                        tally.free.insert(address);
                    }
                }
                (TraceAction::Free, None) => {}
            }
        }

        Ok(tallies
            .into_iter()
            .map(|(bucket, tally)| {
                (
                    bucket,
                    SlotStatistics {
                        count: tally.count,
                        alignment: natural_alignment(bucket),
                        occupied_chunks: tally.occupied.len(),
                        free_chunks: tally.free.len(),
                    },
                )
            })
            .collect())
    }

    /// Observed request-size range per bucket.
    pub fn bucket_boundaries(
        &self,
        records: &[AllocationRecord],
    ) -> Result<BTreeMap<BucketSize, SizeRange>> {
        let mut ranges: BTreeMap<BucketSize, SizeRange> = BTreeMap::new();
        for record in records {
            let size = record.requested_size;
            ranges
                .entry(self.classifier.bucket_of(size)?)
                .and_modify(|range| {
                    range.min = range.min.min(size);
                    range.max = range.max.max(size);
                })
                .or_insert(SizeRange { min: size, max: size });
        }
        Ok(ranges)
    }

    /// Runs every analysis over one trace.
    pub fn analyze(&self, events: &[TraceEvent]) -> Result<TraceAnalysis> {
        let records = self.records_from_trace(events)?;
        Ok(TraceAnalysis {
            slot_sizes: self.infer_slot_sizes(&records)?,
            slot_statistics: self.slot_statistics(events)?,
            reuse_patterns: self.detect_reuse_patterns(&records)?,
            reuse_pairs: self.reuse_pairs(events)?,
            bucket_boundaries: self.bucket_boundaries(&records)?,
            replay: self.simulate_freelist(events)?,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> AllocatorAnalyzer {
        AllocatorAnalyzer::new(&EngineConfig::default()).unwrap()
    }

    fn raw(object_type: &str, size: i64, action: &str, address: Option<Address>) -> RawTraceEvent {
        RawTraceEvent {
            object_type: object_type.to_string(),
            size,
            action: action.to_string(),
            address,
            timestamp: None,
        }
    }

    #[test]
    fn parse_trace_rejects_malformed_records() {
        let err = parse_trace(&[raw("Array", 16, "alloc", None), raw("Array", -4, "alloc", None)])
            .unwrap_err();
        assert!(matches!(err, GroomError::InvalidOperation { index: 1, .. }));

        let err = parse_trace(&[raw("Array", 16, "realloc", Some(1))]).unwrap_err();
        assert!(matches!(err, GroomError::InvalidOperation { index: 0, .. }));

        let err = parse_trace(&[raw("Array", 16, "free", None)]).unwrap_err();
        assert!(matches!(err, GroomError::InvalidOperation { index: 0, .. }));
    }

    #[test]
    fn parse_trace_defaults_timestamp_to_index() {
        let events = parse_trace(&[
            raw("Array", 16, "alloc", Some(0x10)),
            raw("Array", 16, "FREE", Some(0x10)),
        ])
        .unwrap();
        assert_eq!(events[0].timestamp, 0);
        assert_eq!(events[1].timestamp, 1);
        assert_eq!(events[1].action, TraceAction::Free);
    }

    #[test]
    fn raw_trace_reads_type_key() {
        let events: Vec<RawTraceEvent> =
            serde_json::from_str(r#"[{"type":"JSObject","size":48,"action":"alloc","address":4096}]"#)
                .unwrap();
        assert_eq!(events[0].object_type, "JSObject");
        assert_eq!(events[0].address, Some(4096));
    }

    #[test]
    fn records_flip_freed_on_latest_live_record() {
        let events = vec![
            TraceEvent::alloc("Array", 32, Some(0x100)),
            TraceEvent::free("Array", 32, 0x100),
            TraceEvent::alloc("JSObject", 30, Some(0x100)),
            TraceEvent::free("Array", 32, 0xdead),
        ];
        let records = analyzer().records_from_trace(&events).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].freed);
        assert!(!records[1].freed);
        assert_eq!(records[1].bucket_size, 32);
    }

    #[test]
    fn alloc_without_address_gets_synthetic_handle() {
        let events = vec![TraceEvent::alloc("Array", 8, None)];
        let records = analyzer().records_from_trace(&events).unwrap();
        assert_eq!(records[0].address, SYNTHETIC_HANDLE_BASE);
    }

    #[test]
    fn infer_slot_sizes_empty_is_empty() {
        assert!(analyzer().infer_slot_sizes(&[]).unwrap().is_empty());
    }

    #[test]
    fn replay_reports_hits_and_misses() {
        let events = vec![
            TraceEvent::alloc("Array", 64, Some(0x1000)),
            TraceEvent::free("Array", 64, 0x1000),
            TraceEvent::alloc("JSFunction", 60, None),
            TraceEvent::alloc("JSFunction", 60, None),
        ];
        let replay = analyzer().simulate_freelist(&events).unwrap();
        let hits: Vec<_> = replay.outcomes.iter().map(|o| o.hit).collect();
        assert_eq!(hits, vec![Some(false), None, Some(true), Some(false)]);
        assert_eq!(replay.outcomes[2].address, Some(0x1000));
        assert_eq!(replay.hits, 1);
        assert_eq!(replay.misses, 2);
        assert_eq!(replay.frees, 1);
        assert!(replay.state.is_empty());
        assert_eq!(replay.log.len(), 4);
        assert_eq!(replay.log[2].outcome, "hit");
    }

    #[test]
    fn replay_free_appends_to_tail() {
        let events = vec![
            TraceEvent::free("Array", 48, 0x1),
            TraceEvent::free("Array", 48, 0x2),
            TraceEvent::free("Array", 40, 0x3),
        ];
        let replay = analyzer().simulate_freelist(&events).unwrap();
        let order: Vec<_> = replay.state.entries(48).map(|e| e.address).collect();
        assert_eq!(order, vec![0x1, 0x2, 0x3]);
    }

    #[test]
    fn replay_uses_capacity_not_position() {
        let events = vec![
            TraceEvent::free("Array", 40, 0x1),
            TraceEvent::free("Array", 48, 0x2),
            TraceEvent::alloc("Array", 44, None),
        ];
        let replay = analyzer().simulate_freelist(&events).unwrap();
        assert_eq!(replay.outcomes[2].address, Some(0x2));
        let left: Vec<_> = replay.state.entries(48).map(|e| e.address).collect();
        assert_eq!(left, vec![0x1]);
    }

    #[test]
    fn replay_from_initial_state() {
        let mut initial = FreelistState::new();
        initial.push_free(
            64,
            FreelistEntry {
                address: 0xabc,
                size: 64,
            },
        );
        let replay = analyzer()
            .simulate_freelist_from(initial, &[TraceEvent::alloc("JSObject", 64, None)])
            .unwrap();
        assert_eq!(replay.outcomes[0].address, Some(0xabc));
        assert_eq!(replay.hits, 1);
    }

    #[test]
    fn replay_rejects_zero_size() {
        let err = analyzer()
            .simulate_freelist(&[TraceEvent::alloc("Array", 0, None)])
            .unwrap_err();
        assert!(matches!(err, GroomError::InvalidOperation { index: 0, .. }));
    }

    #[test]
    fn reuse_patterns_and_pairs() {
        let events = vec![
            TraceEvent::alloc("Array", 32, Some(0xa)),
            TraceEvent::free("Array", 32, 0xa),
            TraceEvent::alloc("Array", 32, Some(0xb)),
            TraceEvent::alloc("Array", 32, Some(0xa)),
            TraceEvent::alloc("Big", 512, Some(0xc)),
        ];
        let analyzer = analyzer();
        let records = analyzer.records_from_trace(&events).unwrap();
        let reuse = analyzer.detect_reuse_patterns(&records).unwrap();
        assert_eq!(
            reuse[&32],
            ReuseStats {
                total_allocations: 3,
                unique_addresses: 2,
                reuse_permille: 333,
            }
        );
        assert!(!reuse.contains_key(&512));

        let pairs = analyzer.reuse_pairs(&events).unwrap();
        assert_eq!(
            pairs[&32],
            vec![ReusePair {
                free_index: 1,
                alloc_index: 3,
            }]
        );
    }

    #[test]
    fn slot_statistics_track_occupancy() {
        let events = vec![
            TraceEvent::alloc("Array", 96, Some(0x1)),
            TraceEvent::alloc("Array", 96, Some(0x2)),
            TraceEvent::free("Array", 96, 0x1),
            TraceEvent::free("Array", 96, 0x99),
        ];
        let stats = analyzer().slot_statistics(&events).unwrap();
        assert_eq!(
            stats[&96],
            SlotStatistics {
                count: 2,
                alignment: 32,
                occupied_chunks: 1,
                free_chunks: 1,
            }
        );
    }

    #[test]
    fn bucket_boundaries_track_min_max() {
        let events = vec![
            TraceEvent::alloc("A", 33, None),
            TraceEvent::alloc("A", 48, None),
            TraceEvent::alloc("A", 40, None),
            TraceEvent::alloc("B", 8, None),
        ];
        let analyzer = analyzer();
        let records = analyzer.records_from_trace(&events).unwrap();
        let bounds = analyzer.bucket_boundaries(&records).unwrap();
        assert_eq!(bounds[&48], SizeRange { min: 33, max: 48 });
        assert_eq!(bounds[&16], SizeRange { min: 8, max: 8 });
    }

    #[test]
    fn analyze_bundles_everything() {
        let events: Vec<_> = (0..10)
            .map(|i| TraceEvent::alloc("Array", 48, Some(0x1000 + i * 48)).at(i as u64))
            .collect();
        let analysis = analyzer().analyze(&events).unwrap();
        assert_eq!(analysis.records.len(), 10);
        assert_eq!(analysis.slot_sizes[&48], 10);
        assert_eq!(analysis.replay.misses, 10);
        assert_eq!(analysis.slot_statistics[&48].occupied_chunks, 10);
    }
}
