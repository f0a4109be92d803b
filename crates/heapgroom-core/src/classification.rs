//! Object classification.
//!
//! Registry objects are sorted into three classes by size and vtable
//! presence. Classes drive spray candidate selection and the overwrite
//! chains an overflow can walk through.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Address;
use crate::registry::{ObjectRegistry, VulnerableObjectDescriptor};

/// Sizes of common metadata-bearing objects.
pub const DANGEROUS_SIZES: [usize; 7] = [0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80];

/// Sizes typically safe to overwrite.
pub const HARMLESS_SIZES: [usize; 4] = [0x10, 0x18, 0x28, 0x38];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    /// Carries a vtable or sits in a metadata-heavy size.
    Dangerous,
    Harmless,
    /// Anything else: fit for filling a bucket.
    SprayCandidate,
}

impl ObjectClass {
    /// A vtable wins over size; dangerous sizes win over harmless ones.
    pub fn classify(size: usize, has_vtable: bool) -> Self {
        if has_vtable || DANGEROUS_SIZES.contains(&size) {
            Self::Dangerous
        } else if HARMLESS_SIZES.contains(&size) {
            Self::Harmless
        } else {
            Self::SprayCandidate
        }
    }

    pub fn of(object: &VulnerableObjectDescriptor) -> Self {
        Self::classify(object.size, object.vtable_offset.is_some())
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dangerous => "dangerous",
            Self::Harmless => "harmless",
            Self::SprayCandidate => "spray_candidate",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry objects of exactly `target_size` bytes classed as spray candidates.
pub fn spray_candidates(
    registry: &ObjectRegistry,
    target_size: usize,
) -> Vec<&VulnerableObjectDescriptor> {
    registry
        .iter()
        .filter(|object| {
            object.size == target_size && ObjectClass::of(object) == ObjectClass::SprayCandidate
        })
        .collect()
}

/// Type chains an overflow of `overwrite_size` bytes can run through.
///
/// Each chain starts at a non-harmless object of at most `target_size`
/// bytes and greedily appends the first non-harmless registry object that
/// still fits, until the chain covers `overwrite_size`. Chains that fall
/// short are dropped. Output follows registry order.
pub fn overwrite_chains(
    registry: &ObjectRegistry,
    target_size: usize,
    overwrite_size: usize,
) -> Vec<Vec<String>> {
    let reachable: Vec<_> = registry
        .iter()
        .filter(|object| ObjectClass::of(object) != ObjectClass::Harmless)
        .collect();
    reachable
        .iter()
        .filter(|start| start.size <= target_size)
        .filter_map(|start| {
            let mut chain = vec![start.object_type.clone()];
            let mut covered = start.size;
            while covered < overwrite_size {
                let Some(next) = reachable
                    .iter()
                    .find(|object| covered + object.size <= overwrite_size)
                else {
                    break;
                };
                chain.push(next.object_type.clone());
                covered += next.size;
            }
            (covered >= overwrite_size).then_some(chain)
        })
        .collect()
}

/// Known vtable addresses, e.g. recovered from a leak.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VtableRegistry {
    known: BTreeSet<Address>,
}

impl VtableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the address was already known.
    pub fn register(&mut self, address: Address) -> bool {
        self.known.insert(address)
    }

    pub fn is_known(&self, address: Address) -> bool {
        self.known.contains(&address)
    }
}

impl FromIterator<Address> for VtableRegistry {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut registry = Self::new();
        for address in iter {
            registry.register(address);
        }
        registry
    }
}
