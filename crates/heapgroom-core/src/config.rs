//! Engine configuration.
//!
//! All model fidelity knobs and grooming heuristics live here. Defaults
//! reproduce the reference model (16-byte alignment, 5% slot noise filter,
//! 5 pre-allocations, 3 post-allocations, discovery-order ranking).
//!
//! Configuration comes from three layers, later layers winning:
//! - [`EngineConfig::default`]
//! - a JSON document (partial documents are fine, see [`EngineConfig::from_json`])
//! - `HEAPGROOM_*` environment variables ([`EngineConfig::with_env_overrides`])
//!
//! Environment values that do not parse are ignored and the previous layer's
//! value is kept.

use serde::{Deserialize, Serialize};

use crate::bucket::{BucketClassifier, DEFAULT_ALIGNMENT};
use crate::error::{GroomError, Result};

pub const ENV_ALIGNMENT: &str = "HEAPGROOM_ALIGNMENT";
pub const ENV_PRE_ALLOCATIONS: &str = "HEAPGROOM_PRE_ALLOCATIONS";
pub const ENV_POST_ALLOCATIONS: &str = "HEAPGROOM_POST_ALLOCATIONS";
pub const ENV_CHAIN_RANKING: &str = "HEAPGROOM_CHAIN_RANKING";
pub const ENV_GC_ON_UAF: &str = "HEAPGROOM_GC_ON_UAF";
pub const ENV_TRIGGER_EVENT: &str = "HEAPGROOM_TRIGGER_EVENT";

/// How discovered chains are ordered before synthesis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRanking {
    /// Registry order, unchanged.
    #[default]
    Discovery,
    /// Stable descending sort by exploitability score.
    Exploitability,
}

impl ChainRanking {
    /// Parse from string (case-insensitive). Unknown values map to `Discovery`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "exploitability" | "score" | "scored" => Self::Exploitability,
            _ => Self::Discovery,
        }
    }
}

/// Grooming heuristics. Tunable policy, not derived optima.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroomingPolicy {
    /// Filler allocations issued before the placement.
    pub pre_allocation_count: usize,
    /// Filler allocations issued after the placement.
    pub post_allocation_count: usize,
    /// Object type used for filler allocations.
    pub filler_type: String,
    /// Append a `gc` trigger to use-after-free strategies.
    pub gc_on_use_after_free: bool,
    /// Host event dispatched after the post-allocations, for every strategy.
    pub trigger_event: Option<String>,
}

impl Default for GroomingPolicy {
    fn default() -> Self {
        Self {
            pre_allocation_count: 5,
            post_allocation_count: 3,
            filler_type: "Array".to_string(),
            gc_on_use_after_free: false,
            trigger_event: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub alignment: usize,
    /// Optional explicit size-class table (see [`BucketClassifier::with_table`]).
    pub bucket_table: Option<Vec<usize>>,
    /// Buckets at or below this share of a trace (permille) are noise.
    pub slot_noise_threshold_permille: u16,
    pub grooming: GroomingPolicy,
    pub ranking: ChainRanking,
    /// Vtable addresses known to the caller, e.g. from an info leak.
    pub known_vtables: Vec<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            bucket_table: None,
            slot_noise_threshold_permille: 50,
            grooming: GroomingPolicy::default(),
            ranking: ChainRanking::Discovery,
            known_vtables: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Parses a (possibly partial) JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `HEAPGROOM_*` overrides read through `lookup`.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(alignment) = lookup(ENV_ALIGNMENT).and_then(|v| parse_positive(&v)) {
            self.alignment = alignment;
        }
        if let Some(count) = lookup(ENV_PRE_ALLOCATIONS).and_then(|v| v.trim().parse().ok()) {
            self.grooming.pre_allocation_count = count;
        }
        if let Some(count) = lookup(ENV_POST_ALLOCATIONS).and_then(|v| v.trim().parse().ok()) {
            self.grooming.post_allocation_count = count;
        }
        if let Some(ranking) = lookup(ENV_CHAIN_RANKING) {
            self.ranking = ChainRanking::from_str_loose(ranking.trim());
        }
        if let Some(flag) = lookup(ENV_GC_ON_UAF) {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.grooming.gc_on_use_after_free = true,
                "0" | "false" | "no" | "off" => self.grooming.gc_on_use_after_free = false,
                _ => {}
            }
        }
        if let Some(event) = lookup(ENV_TRIGGER_EVENT) {
            let event = event.trim();
            self.grooming.trigger_event = (!event.is_empty()).then(|| event.to_string());
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.classifier().map(|_| ())?;
        if self.slot_noise_threshold_permille >= 1000 {
            return Err(GroomError::invalid_input(
                "slot_noise_threshold_permille",
                self.slot_noise_threshold_permille,
            ));
        }
        if self.grooming.filler_type.trim().is_empty() {
            return Err(GroomError::invalid_input("filler_type", "<empty>"));
        }
        if self
            .grooming
            .trigger_event
            .as_deref()
            .is_some_and(|event| event.trim().is_empty())
        {
            return Err(GroomError::invalid_input("trigger_event", "<empty>"));
        }
        Ok(())
    }

    /// Classifier for this configuration's alignment and table.
    pub fn classifier(&self) -> Result<BucketClassifier> {
        match &self.bucket_table {
            Some(table) => BucketClassifier::with_table(self.alignment, table.clone()),
            None => BucketClassifier::new(self.alignment),
        }
    }
}

fn parse_positive(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok()?,
        None => raw.parse().ok()?,
    };
    (parsed > 0).then_some(parsed)
}
