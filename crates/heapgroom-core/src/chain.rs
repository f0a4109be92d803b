//! Exploit chain discovery.
//!
//! A chain pairs a target object (the one the bug corrupts) with a payload
//! object placed in the same bucket to exploit the corruption. Candidates
//! come from the registry filtered by the bug kind's eligible types; the
//! payload is always the kind's first eligible type, sized like the target
//! so both land in one bucket.

use serde::{Deserialize, Serialize};

use crate::bucket::{BucketClassifier, BucketSize};
use crate::classification::{self, ObjectClass, VtableRegistry};
use crate::config::ChainRanking;
use crate::layout::{FakeObjectLayout, LayoutCatalog};
use crate::registry::{
    BugDescriptor, BugKind, EligibilityTable, ObjectRegistry, VulnerableObjectDescriptor,
};

/// Object placed to exploit the corrupted target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSpec {
    pub object_type: String,
    pub size: usize,
    /// Fake-object layout mimicking the target type.
    pub layout: FakeObjectLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitChain {
    pub kind: BugKind,
    pub target: VulnerableObjectDescriptor,
    pub payload: PayloadSpec,
    pub bucket_size: BucketSize,
    /// Bytes the bug writes, for overflow and underflow chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow_size: Option<usize>,
}

fn put(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn put_usize(hasher: &mut blake3::Hasher, value: usize) {
    put(hasher, &(value as u64).to_le_bytes());
}

fn put_opt(hasher: &mut blake3::Hasher, value: Option<usize>) {
    match value {
        Some(value) => put_usize(hasher, value),
        None => put(hasher, &[]),
    }
}

/// +100 per corruptible field, at most +300.
fn field_bonus(fields: usize) -> usize {
    fields.saturating_mul(100).min(300)
}

impl ExploitChain {
    /// blake3 digest (hex) over every field, each length-prefixed.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        put(&mut hasher, self.kind.as_str().as_bytes());

        let target = &self.target;
        put(&mut hasher, target.object_type.as_bytes());
        put_usize(&mut hasher, target.size);
        put_usize(&mut hasher, target.bucket_size);
        put_usize(&mut hasher, target.corruptible_fields.len());
        for field in &target.corruptible_fields {
            put(&mut hasher, field.as_bytes());
        }
        put_opt(&mut hasher, target.vtable_offset);
        put_opt(&mut hasher, target.vtable_address);

        put(&mut hasher, self.payload.object_type.as_bytes());
        put_usize(&mut hasher, self.payload.size);
        // BTreeMap iteration is ordered by field name.
        put_usize(&mut hasher, self.payload.layout.len());
        for (field, &offset) in &self.payload.layout {
            put(&mut hasher, field.as_bytes());
            put_usize(&mut hasher, offset);
        }

        put_usize(&mut hasher, self.bucket_size);
        put_opt(&mut hasher, self.overflow_size);
        hasher.finalize().to_hex().to_string()
    }
}

/// Chain plus the score it was ranked with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedChain {
    pub chain: ExploitChain,
    /// Exploitability in permille, at most 1000.
    pub score_permille: u16,
    pub object_class: ObjectClass,
}

/// Bug-level summary derived from the best-scoring chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExploitabilityAssessment {
    /// Best chain score; 0 without chains.
    pub overall_permille: u16,
    pub factors: Vec<String>,
    pub recommendations: Vec<String>,
    /// Registry types of exactly the target size that are fit for spraying.
    pub spray_candidates: Vec<String>,
    /// Type chains the overflow runs through, when an overflow size is known.
    pub overwrite_chains: Vec<Vec<String>>,
}

/// Matches bugs to registry candidates and builds chains.
#[derive(Debug, Clone)]
pub struct ChainEngine {
    eligibility: EligibilityTable,
    layouts: LayoutCatalog,
    classifier: BucketClassifier,
    ranking: ChainRanking,
    vtables: VtableRegistry,
}

impl ChainEngine {
    pub fn new(
        eligibility: EligibilityTable,
        layouts: LayoutCatalog,
        classifier: BucketClassifier,
        ranking: ChainRanking,
    ) -> Self {
        Self {
            eligibility,
            layouts,
            classifier,
            ranking,
            vtables: VtableRegistry::new(),
        }
    }

    #[must_use]
    pub fn with_vtables(mut self, vtables: VtableRegistry) -> Self {
        self.vtables = vtables;
        self
    }

    /// Registry entries whose type is eligible for the bug's kind, in registry order.
    pub fn find_candidates(
        &self,
        bug: &BugDescriptor,
        registry: &ObjectRegistry,
    ) -> Vec<VulnerableObjectDescriptor> {
        registry
            .iter()
            .filter(|object| self.eligibility.is_eligible(bug.kind, &object.object_type))
            .cloned()
            .collect()
    }

    /// Chain for one candidate, or `None` when the kind has no eligible payload.
    pub fn build_chain(
        &self,
        bug: &BugDescriptor,
        candidate: &VulnerableObjectDescriptor,
    ) -> Option<ExploitChain> {
        let payload_type = self.eligibility.default_payload(bug.kind)?;
        Some(ExploitChain {
            kind: bug.kind,
            target: candidate.clone(),
            payload: PayloadSpec {
                object_type: payload_type.to_string(),
                size: candidate.size,
                layout: self.layouts.layout_for(&candidate.object_type),
            },
            bucket_size: candidate.bucket_size,
            overflow_size: bug
                .overflow_size
                .filter(|_| bug.kind != BugKind::UseAfterFree),
        })
    }

    /// Candidates → chains → ranking, in one pass.
    pub fn discover(&self, bug: &BugDescriptor, registry: &ObjectRegistry) -> Vec<RankedChain> {
        let chains = self
            .find_candidates(bug, registry)
            .iter()
            .filter_map(|candidate| self.build_chain(bug, candidate))
            .collect();
        self.rank_chains(bug, chains)
    }

    /// Orders chains per the configured [`ChainRanking`].
    ///
    /// `Discovery` keeps the input order; `Exploitability` is a stable
    /// descending sort by score, so equal scores keep discovery order.
    pub fn rank_chains(&self, bug: &BugDescriptor, chains: Vec<ExploitChain>) -> Vec<RankedChain> {
        let mut ranked: Vec<RankedChain> = chains
            .into_iter()
            .map(|chain| RankedChain {
                score_permille: self.exploitability(bug, &chain.target),
                object_class: ObjectClass::of(&chain.target),
                chain,
            })
            .collect();
        if self.ranking == ChainRanking::Exploitability {
            ranked.sort_by(|a, b| b.score_permille.cmp(&a.score_permille));
        }
        ranked
    }

    /// Heuristic exploitability score in permille.
    ///
    /// - size equal to the bug's target size: +300 (smaller: +200)
    /// - corruptible fields: +100 each, at most +300
    /// - known vtable offset: +200
    /// - same bucket as the target size: +200
    pub fn exploitability(&self, bug: &BugDescriptor, target: &VulnerableObjectDescriptor) -> u16 {
        let mut score: usize = 0;
        if target.size == bug.target_size {
            score += 300;
        } else if target.size < bug.target_size {
            score += 200;
        }
        score += field_bonus(target.corruptible_fields.len());
        if target.vtable_offset.is_some() {
            score += 200;
        }
        if self
            .classifier
            .bucket_of(bug.target_size)
            .is_ok_and(|bucket| bucket == target.bucket_size)
        {
            score += 200;
        }
        score.min(1000) as u16
    }

    /// Factors and recommendations for the bug as a whole.
    ///
    /// The best chain is the first one with the highest score, whatever the
    /// ranking order.
    pub fn assess(
        &self,
        bug: &BugDescriptor,
        registry: &ObjectRegistry,
        ranked: &[RankedChain],
    ) -> ExploitabilityAssessment {
        let spray_candidates: Vec<String> =
            classification::spray_candidates(registry, bug.target_size)
                .into_iter()
                .map(|object| object.object_type.clone())
                .collect();
        let overwrite_chains = match (bug.kind, bug.overflow_size) {
            (BugKind::Overflow | BugKind::Underflow, Some(size)) => {
                classification::overwrite_chains(registry, bug.target_size, size)
            }
            _ => Vec::new(),
        };

        let Some(best) = ranked.iter().reduce(|best, next| {
            if next.score_permille > best.score_permille {
                next
            } else {
                best
            }
        }) else {
            return ExploitabilityAssessment {
                factors: vec!["No suitable target objects found".to_string()],
                spray_candidates,
                overwrite_chains,
                ..ExploitabilityAssessment::default()
            };
        };

        let target = &best.chain.target;
        let mut factors = vec![format!("{} is {}", target.object_type, best.object_class)];
        if target.vtable_offset.is_some() {
            factors.push("Vtable manipulation possible".to_string());
        }
        if let Some(address) = target.vtable_address
            && self.vtables.is_known(address)
        {
            factors.push(format!("Vtable {address:#x} is known"));
        }
        if !target.corruptible_fields.is_empty() {
            factors.push(format!(
                "Found {} corruptible fields",
                target.corruptible_fields.len()
            ));
        }
        if let Some(size) = bug.overflow_size
            && !overwrite_chains.is_empty()
        {
            factors.push(format!(
                "{} overwrite chains cover {size} bytes",
                overwrite_chains.len()
            ));
        }

        let advice = match bug.kind {
            BugKind::UseAfterFree => "Consider using heap spraying to increase reliability",
            BugKind::Overflow | BugKind::Underflow => "Ensure proper alignment of target objects",
        };
        let mut recommendations = vec![advice.to_string()];
        if !spray_candidates.is_empty() {
            recommendations.push(format!("Spray with {}", spray_candidates.join(", ")));
        }

        ExploitabilityAssessment {
            overall_permille: best.score_permille,
            factors,
            recommendations,
            spray_candidates,
            overwrite_chains,
        }
    }
}
