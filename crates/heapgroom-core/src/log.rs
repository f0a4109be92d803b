//! Engine lifecycle records.
//!
//! The analyzer replay and the heap simulator append one record per
//! decision (freelist hit, miss, free, trigger). Records carry a snapshot of
//! the owner's counters so a log can be read without the state it came from.
//! The harness turns these into JSONL entries.

use serde::Serialize;

/// Lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineLogRecord {
    /// Monotonic decision id within one log.
    pub decision_id: u64,
    /// Correlation id (`core::<component>::<event>::<id>`).
    pub trace_id: String,
    pub level: EngineLogLevel,
    /// Emitting component (`replay`, `simulator`).
    pub component: &'static str,
    /// Event kind (`alloc`, `free`, `trigger`, ...).
    pub event: &'static str,
    pub address: Option<usize>,
    pub size: Option<usize>,
    pub bucket: Option<usize>,
    /// Machine-readable outcome label (`hit`, `miss`, `appended`, ...).
    pub outcome: &'static str,
    pub details: String,
    /// Snapshot: freelist entries across all buckets.
    pub freelist_total: usize,
    /// Snapshot: freelist hits so far.
    pub hits: u64,
    /// Snapshot: freelist misses so far.
    pub misses: u64,
}

/// Counters mirrored into every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounters {
    pub freelist_total: usize,
    pub hits: u64,
    pub misses: u64,
}

/// One event to be recorded.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: EngineLogLevel,
    pub event: &'static str,
    pub address: Option<usize>,
    pub size: Option<usize>,
    pub bucket: Option<usize>,
    pub outcome: &'static str,
    pub details: String,
}

impl LogEvent {
    pub fn new(level: EngineLogLevel, event: &'static str, outcome: &'static str) -> Self {
        Self {
            level,
            event,
            address: None,
            size: None,
            bucket: None,
            outcome,
            details: String::new(),
        }
    }

    #[must_use]
    pub fn at(mut self, address: Option<usize>, size: Option<usize>, bucket: Option<usize>) -> Self {
        self.address = address;
        self.size = size;
        self.bucket = bucket;
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Append-only lifecycle log owned by a single replay or simulation.
#[derive(Debug, Clone)]
pub struct LifecycleLog {
    component: &'static str,
    next_decision_id: u64,
    records: Vec<EngineLogRecord>,
}

impl LifecycleLog {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            next_decision_id: 1,
            records: Vec::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    pub fn record(&mut self, event: LogEvent, counters: LogCounters) {
        let decision_id = self.next_id();
        let trace_id = format!(
            "core::{}::{}::{:016x}",
            self.component, event.event, decision_id
        );
        self.records.push(EngineLogRecord {
            decision_id,
            trace_id,
            level: event.level,
            component: self.component,
            event: event.event,
            address: event.address,
            size: event.size,
            bucket: event.bucket,
            outcome: event.outcome,
            details: event.details,
            freelist_total: counters.freelist_total,
            hits: counters.hits,
            misses: counters.misses,
        });
    }

    pub fn records(&self) -> &[EngineLogRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<EngineLogRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_ids_are_monotonic() {
        let mut log = LifecycleLog::new("replay");
        let counters = LogCounters::default();
        log.record(
            LogEvent::new(EngineLogLevel::Trace, "alloc", "miss"),
            counters,
        );
        log.record(
            LogEvent::new(EngineLogLevel::Trace, "free", "appended").at(Some(0x10), Some(32), Some(32)),
            LogCounters {
                freelist_total: 1,
                hits: 0,
                misses: 1,
            },
        );
        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[1].decision_id, 2);
        assert_eq!(records[1].trace_id, "core::replay::free::0000000000000002");
        assert_eq!(records[1].freelist_total, 1);
        assert_eq!(records[1].bucket, Some(32));
    }
}
