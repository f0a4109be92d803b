//! # heapgroom-core
//!
//! Heap-grooming strategy engine over a bucketed allocator model.
//!
//! The crate classifies request sizes into buckets, replays allocation
//! traces against per-bucket freelists, matches a memory-safety bug to
//! exploitable registry objects, and synthesizes and simulates grooming
//! strategies that place a payload next to the vulnerable object. No
//! `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod analyzer;
pub mod bucket;
pub mod chain;
pub mod classification;
pub mod config;
pub mod error;
pub mod export;
pub mod layout;
pub mod log;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod simulator;
pub mod strategy;

pub use analyzer::{AllocatorAnalyzer, RawTraceEvent, TraceAnalysis, TraceEvent, parse_trace};
pub use bucket::{BucketClassifier, BucketSize};
pub use chain::{ChainEngine, ExploitChain, ExploitabilityAssessment, PayloadSpec, RankedChain};
pub use classification::{ObjectClass, VtableRegistry};
pub use config::{ChainRanking, EngineConfig, GroomingPolicy};
pub use error::{GroomError, Result};
pub use export::{CodegenPlan, VisualizerExport};
pub use layout::{FakeObjectLayout, LayoutCatalog, RawLayoutCatalog};
pub use model::{FreelistState, GroomingStrategy, HeapSnapshot, SimulationResult};
pub use pipeline::{GroomReport, GroomingEngine};
pub use registry::{
    BugDescriptor, BugKind, EligibilityTable, ObjectRegistry, RawBugDescriptor, RawObjectDescriptor,
};
pub use simulator::HeapSimulator;
pub use strategy::{PatternRegistry, SimulationOutcome, StrategySynthesizer};
